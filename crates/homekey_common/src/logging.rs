use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `structured` switches the formatter
/// from human-readable to newline-delimited JSON, for environments that ship logs
/// to a collector rather than a terminal.
pub fn init(structured: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );

    if structured {
        builder.json().init();
    } else {
        builder.init();
    }
}
