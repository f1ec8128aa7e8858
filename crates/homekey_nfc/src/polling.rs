//! The NFC polling loop (spec.md §4.4): senses a target, activates it into
//! ISO-DEP, runs the HomeKey transaction, and hands any authenticated endpoint
//! off to the lock activation bridge without blocking on it.
//!
//! This loop is meant to run on its own dedicated OS thread (spec.md §5,
//! "Do not make the NFC loop itself async: the driver bindings are blocking and
//! cancellation during a radio transaction is unsafe") — `homekey_service` gives
//! it a single-threaded runtime of its own rather than sharing the one that
//! drives HTTP and BLE. The loop's own code is `async` only so that it composes
//! with `homekey_protocol::Engine` and is unit-testable without a real runtime
//! thread.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use homekey_protocol::{Ecp, Engine, ProtocolError, TransactionResult};
use homekey_store::KeyMaterialStore;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::frontend::{ContactlessFrontend, NfcError, SensedTarget};

const FIELD_POLL_INTERVAL: Duration = Duration::from_millis(500);
const COOL_DOWN: Duration = Duration::from_secs(2);

/// Outcome of a single loop iteration, exposed for testing; production code
/// only cares about the logging and hand-off side effects `run_iteration`
/// already performed.
#[derive(Debug)]
pub enum IterationOutcome {
    NoTarget,
    NonIsoDep,
    Authenticated(TransactionResult),
    NotAuthenticated,
    TransactionError(ProtocolError),
}

pub struct PollingLoop {
    frontend: Arc<dyn ContactlessFrontend>,
    store: Arc<dyn KeyMaterialStore>,
    engine: Arc<Engine>,
    authenticated_tx: UnboundedSender<TransactionResult>,
    stop: Arc<AtomicBool>,
    express: bool,
    throttle: Duration,
}

impl PollingLoop {
    pub fn new(
        frontend: Arc<dyn ContactlessFrontend>,
        store: Arc<dyn KeyMaterialStore>,
        engine: Arc<Engine>,
        authenticated_tx: UnboundedSender<TransactionResult>,
        express: bool,
        throttle: Duration,
    ) -> Self {
        PollingLoop { frontend, store, engine, authenticated_tx, stop: Arc::new(AtomicBool::new(false)), express, throttle }
    }

    /// A handle the owner can use to request a stop; checked between
    /// iterations (spec.md §4.4, "Cancellation: a stop flag is checked between
    /// iterations. I/O in-flight is allowed to complete.").
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub async fn run(&self) {
        while !self.stop.load(Ordering::Relaxed) {
            match self.run_iteration().await {
                Ok(_) => {}
                Err(NfcError::NotConfigured) => {
                    debug!("reader key unconfigured, NFC loop idling");
                    tokio::time::sleep(self.throttle).await;
                }
                Err(NfcError::Io(error)) => {
                    warn!(%error, "contactless front-end I/O error");
                    tokio::time::sleep(self.throttle).await;
                }
            }
        }
    }

    /// One iteration of the loop described in spec.md §4.4. Returns
    /// `Err(NfcError::NotConfigured)` without calling `sense` when the reader
    /// key is unconfigured (scenario 1, spec.md §8).
    pub async fn run_iteration(&self) -> Result<IterationOutcome, NfcError> {
        let started = Instant::now();

        let reader_key = self.store.get_reader_private_key().await;
        if !reader_key.is_configured() {
            return Err(NfcError::NotConfigured);
        }

        let ecp_home = Ecp::home(reader_key.group_identifier(), self.express);

        let sensed = match self.frontend.sense(&ecp_home).await? {
            Some(target) => target,
            None => {
                self.throttle_remaining(started).await;
                return Ok(IterationOutcome::NoTarget);
            }
        };

        let tag = match sensed {
            SensedTarget::IsoDep(tag) => tag,
            SensedTarget::NonIsoDep => {
                self.wait_for_field_clear().await;
                return Ok(IterationOutcome::NonIsoDep);
            }
        };

        let outcome = match self.engine.run(tag.as_ref()).await {
            Ok(result) => {
                info!(
                    flow = ?result.flow,
                    issuer_id = ?result.issuer_id,
                    endpoint_id = ?result.endpoint_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "HomeKey transaction authenticated"
                );
                let _ = self.authenticated_tx.send(result.clone());
                IterationOutcome::Authenticated(result)
            }
            Err(ProtocolError::NotAuthenticated) => {
                info!("HomeKey transaction completed without recognizing the endpoint");
                IterationOutcome::NotAuthenticated
            }
            Err(error) => {
                warn!(%error, "HomeKey transaction failed");
                IterationOutcome::TransactionError(error)
            }
        };

        self.wait_for_field_clear().await;
        tokio::time::sleep(COOL_DOWN).await;
        Ok(outcome)
    }

    async fn throttle_remaining(&self, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed < self.throttle {
            tokio::time::sleep(self.throttle - elapsed).await;
        }
    }

    async fn wait_for_field_clear(&self) {
        while self.frontend.is_present().await {
            tokio::time::sleep(FIELD_POLL_INTERVAL).await;
        }
    }
}
