//! Entry point (spec.md §1, §5): loads configuration, wires every component,
//! installs SIGINT/SIGTERM handlers, and runs until shutdown. No CLI flags
//! beyond the implicit configuration path `Settings::new` resolves.

use std::error::Error;

use homekey_common::config::Settings;
use homekey_service::app::run_bridge_relay;
use homekey_service::App;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::new()?;

    homekey_common::logging::init(settings.logging.structured);

    let app = App::build(&settings).await?;
    info!("HomeKey reader service started");

    let relay = tokio::spawn(run_bridge_relay(app.authenticated_rx, app.bridge));

    homekey_service::shutdown::wait_for_shutdown_signal().await?;
    relay.abort();
    homekey_service::shutdown::shutdown(app.nfc_thread, app.sessions).await;

    info!("HomeKey reader service stopped");
    Ok(())
}
