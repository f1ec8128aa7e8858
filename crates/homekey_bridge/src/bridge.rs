//! The lock activation bridge itself (spec.md §4.8): given an endpoint the
//! NFC transaction engine just authenticated, looks up its issuer, asks the
//! oracle which lock to talk to, and hands the BLE session manager the
//! first message to write. A pure relay — it applies no authentication or
//! locking semantics of its own.

use std::sync::Arc;

use homekey_store::EndpointId;
use homekey_store::KeyMaterialStore;
use tracing::warn;

use crate::manager::SessionManager;
use crate::oracle::OracleClient;
use crate::BleError;
use crate::OracleError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("authenticated endpoint has no issuer on record")]
    NoIssuer,
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Ble(#[from] BleError),
}

pub struct LockActivationBridge {
    store: Arc<dyn KeyMaterialStore>,
    oracle: Arc<OracleClient>,
    sessions: Arc<SessionManager>,
}

impl LockActivationBridge {
    pub fn new(store: Arc<dyn KeyMaterialStore>, oracle: Arc<OracleClient>, sessions: Arc<SessionManager>) -> Self {
        LockActivationBridge { store, oracle, sessions }
    }

    /// Called by the NFC loop after a HomeKey transaction authenticates
    /// `endpoint_id`. The loop does not wait for this to finish (spec.md
    /// §4.4, §5) — callers should `tokio::spawn` it.
    pub async fn on_authenticated(&self, endpoint_id: EndpointId) -> Result<(), BridgeError> {
        let issuer = self.store.get_issuer_by_endpoint(endpoint_id).await.ok_or(BridgeError::NoIssuer)?;
        let issuer_id_hex = hex::encode(issuer.id.0);

        let connection = self.oracle.homekey_authenticated(&issuer_id_hex).await?;
        if let Err(error) =
            self.sessions.initiate(connection.serial, connection.message, Some(issuer_id_hex)).await
        {
            warn!(%error, serial = connection.serial, "failed to activate lock over BLE");
            return Err(error.into());
        }
        Ok(())
    }
}
