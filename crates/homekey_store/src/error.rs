/// A flush (to file or REST) failed. The in-memory mutation is retained; the next
/// successful flush carries it forward (spec.md §4.1, §7).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read persisted state: {0}")]
    Read(String),
    #[error("failed to write persisted state: {0}")]
    Write(String),
    #[error("malformed persisted state: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("REST oracle returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
