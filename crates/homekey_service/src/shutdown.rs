//! Signal handling and graceful shutdown (spec.md §5, §10): wait for
//! SIGINT/SIGTERM, then stop the NFC thread and the BLE sessions, each bounded
//! by a deadline so a stuck driver or peripheral can't hang the process.

use std::sync::Arc;
use std::time::Duration;

use homekey_bridge::SessionManager;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::info;
use tracing::warn;

use crate::nfc_thread::NfcThreadHandle;

const NFC_JOIN_DEADLINE: Duration = Duration::from_secs(5);
const BLE_DISCONNECT_DEADLINE: Duration = Duration::from_secs(5);

/// Resolves once SIGINT or SIGTERM arrives.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    Ok(())
}

/// Stops the NFC thread and every active BLE session, each deadline-bounded
/// so shutdown always completes even if a component is wedged (spec.md §5).
pub async fn shutdown(nfc_thread: NfcThreadHandle, sessions: Arc<SessionManager>) {
    let join = tokio::task::spawn_blocking(move || nfc_thread.join());
    if tokio::time::timeout(NFC_JOIN_DEADLINE, join).await.is_err() {
        warn!("NFC thread did not stop within the shutdown deadline");
    }

    if tokio::time::timeout(BLE_DISCONNECT_DEADLINE, sessions.disconnect_all()).await.is_err() {
        warn!("BLE sessions did not disconnect within the shutdown deadline");
    }
}
