//! Wires configuration into a running instance: the key-material store, the
//! HomeKey transaction engine and NFC polling loop, the HAP control-point
//! service, and the lock-activation bridge over BLE/REST (spec.md §1, §5).

use std::sync::Arc;

use homekey_bridge::DeviceRegistry;
use homekey_bridge::LockActivationBridge;
use homekey_bridge::OracleClient;
use homekey_bridge::SessionManager;
use homekey_common::config::Settings;
use homekey_common::generator::SystemGenerator;
use homekey_nfc::NullFrontend;
use homekey_nfc::PollingLoop;
use homekey_protocol::Engine;
use homekey_protocol::TransactionResult;
use homekey_store::FileStore;
use homekey_store::KeyMaterialStore;
use homekey_store::RestStore;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use crate::control_point::ControlPointHandler;
use crate::nfc_thread;
use crate::nfc_thread::NfcThreadHandle;
use crate::service::HomeKeyService;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to open key-material store: {0}")]
    Store(#[from] homekey_store::StoreError),
    #[error("failed to start BLE device registry: {0}")]
    Ble(#[from] homekey_bridge::BleError),
    #[error("failed to build lock-activation oracle client: {0}")]
    Oracle(#[from] homekey_bridge::OracleError),
    #[error("failed to spawn NFC polling thread: {0}")]
    NfcThread(#[from] std::io::Error),
}

/// Everything a running process needs: the service surface for a HAP
/// accessory stack, the NFC thread handle, and the BLE session manager for
/// shutdown. `authenticated_rx` is drained by the caller, forwarding every
/// authenticated transaction to `bridge.on_authenticated`.
pub struct App {
    pub service: Arc<HomeKeyService>,
    pub bridge: Arc<LockActivationBridge>,
    pub sessions: Arc<SessionManager>,
    pub nfc_thread: NfcThreadHandle,
    pub authenticated_rx: UnboundedReceiver<TransactionResult>,
}

impl App {
    pub async fn build(settings: &Settings) -> Result<Self, AppError> {
        let store: Arc<dyn KeyMaterialStore> = if settings.homekey.use_api_repository {
            RestStore::connect(settings.homekey.api_base_url.clone(), settings.homekey.api_secret.clone()).await?
        } else {
            FileStore::open(&settings.homekey.persist).await?
        };

        let control_point =
            ControlPointHandler::new(store.clone(), Arc::new(SystemGenerator), settings.homekey.compat_duplicate_on_add);
        let service = Arc::new(HomeKeyService::new(store.clone(), control_point, settings.homekey.finish));

        let engine = Arc::new(Engine::new(store.clone(), settings.homekey.flow));
        let (authenticated_tx, authenticated_rx) = tokio::sync::mpsc::unbounded_channel();
        let polling_loop = Arc::new(PollingLoop::new(
            Arc::new(NullFrontend),
            store.clone(),
            engine,
            authenticated_tx,
            settings.homekey.express,
            settings.homekey.throttle_polling_duration(),
        ));
        let nfc_thread = nfc_thread::spawn_polling_loop(polling_loop)?;

        let registry = DeviceRegistry::new().await?;
        let oracle = Arc::new(OracleClient::new(settings.homekey.api_base_url.clone())?);
        let sessions = SessionManager::new(registry, Arc::clone(&oracle));
        let bridge = Arc::new(LockActivationBridge::new(store, oracle, Arc::clone(&sessions)));

        Ok(App { service, bridge, sessions, nfc_thread, authenticated_rx })
    }
}

/// Drains `authenticated_rx`, handing each transaction to the bridge without
/// blocking the NFC loop on BLE/REST round-trips (spec.md §4.4, §4.8).
pub async fn run_bridge_relay(mut authenticated_rx: UnboundedReceiver<TransactionResult>, bridge: Arc<LockActivationBridge>) {
    while let Some(result) = authenticated_rx.recv().await {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            if let Err(error) = bridge.on_authenticated(result.endpoint_id).await {
                warn!(%error, endpoint_id = ?result.endpoint_id, "failed to activate lock after HomeKey authentication");
            }
        });
    }
}
