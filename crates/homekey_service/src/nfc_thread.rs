//! Runs `homekey_nfc::PollingLoop` on a dedicated OS thread (spec.md §5: "Do
//! not make the NFC loop itself async"). The loop's own code is `async` so it
//! composes with `homekey_protocol::Engine`, but it gets a single-threaded
//! tokio runtime all to itself rather than sharing the one driving HTTP and
//! BLE, so a blocking real driver call underneath `ContactlessFrontend` never
//! stalls the rest of the service.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use homekey_nfc::PollingLoop;
use tracing::error;

pub struct NfcThreadHandle {
    stop: Arc<std::sync::atomic::AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl NfcThreadHandle {
    /// Requests the loop stop after its current iteration and blocks until
    /// the thread exits. Intended to run inside `tokio::task::spawn_blocking`
    /// so the caller's async runtime isn't blocked by `JoinHandle::join`.
    pub fn join(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                error!("NFC polling thread panicked");
            }
        }
    }
}

/// Spawns the polling loop on a named OS thread, returning a handle that can
/// request a graceful stop.
pub fn spawn_polling_loop(polling_loop: Arc<PollingLoop>) -> std::io::Result<NfcThreadHandle> {
    let stop = polling_loop.stop_handle();

    let join_handle = std::thread::Builder::new().name("homekey-nfc".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(error) => {
                error!(%error, "failed to start NFC thread runtime");
                return;
            }
        };
        runtime.block_on(polling_loop.run());
    })?;

    Ok(NfcThreadHandle { stop, join_handle: Some(join_handle) })
}
