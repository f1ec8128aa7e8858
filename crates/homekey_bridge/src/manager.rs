//! Keeps at most one active BLE session per lock serial and relays every
//! inbound notification to the oracle, acting on whatever it replies with
//! (spec.md §4.8 step 3-4, §4.9, §5).

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::info;
use tracing::warn;

use crate::client;
use crate::client::BleSession;
use crate::oracle::BleInstruction;
use crate::oracle::OracleClient;
use crate::registry::DeviceRegistry;
use crate::BleError;

/// Serializes concurrent `initiate` calls for the same serial so two
/// transactions targeting the same lock don't race each other into opening
/// two GATT connections (spec.md §5: "in-flight connects serialized via
/// futures map").
pub struct SessionManager {
    registry: Arc<DeviceRegistry>,
    oracle: Arc<OracleClient>,
    sessions: Mutex<HashMap<u32, Arc<BleSession>>>,
    connect_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(registry: Arc<DeviceRegistry>, oracle: Arc<OracleClient>) -> Arc<Self> {
        Arc::new(SessionManager {
            registry,
            oracle,
            sessions: Mutex::new(HashMap::new()),
            connect_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Reuses an existing session for `serial` if there is one, otherwise
    /// connects, then writes `initial_message` (spec.md §4.8 step 3).
    pub async fn initiate(
        self: &Arc<Self>,
        serial: u32,
        initial_message: Vec<u8>,
        issuer_id_hex: Option<String>,
    ) -> Result<(), BleError> {
        let lock = self.connect_lock_for(serial).await;
        let _guard = lock.lock().await;

        let session = match self.sessions.lock().await.get(&serial).cloned() {
            Some(session) => session,
            None => {
                let session = Arc::new(client::connect(&self.registry, serial).await?);
                self.sessions.lock().await.insert(serial, Arc::clone(&session));
                self.spawn_notification_relay(Arc::clone(&session), issuer_id_hex.clone());
                session
            }
        };

        session.write(&initial_message).await
    }

    async fn connect_lock_for(&self, serial: u32) -> Arc<Mutex<()>> {
        Arc::clone(self.connect_locks.lock().await.entry(serial).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    /// Every RX notification is POSTed to the oracle; the bridge applies no
    /// semantics of its own, only relays (spec.md §4.8).
    fn spawn_notification_relay(self: &Arc<Self>, session: Arc<BleSession>, issuer_id_hex: Option<String>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut notifications = match session.notifications().await {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(%error, serial = session.serial, "failed to subscribe to lock notifications");
                    return;
                }
            };

            while let Some(message) = notifications.next().await {
                let instruction =
                    match manager.oracle.homekey_ble_message_received(&message, issuer_id_hex.as_deref()).await {
                        Ok(instruction) => instruction,
                        Err(error) => {
                            warn!(%error, serial = session.serial, "oracle rejected relayed BLE message");
                            continue;
                        }
                    };

                match instruction {
                    BleInstruction::SendBluetoothMessage(data) => {
                        if let Err(error) = session.write(&data).await {
                            warn!(%error, serial = session.serial, "failed writing oracle-requested BLE message");
                        }
                    }
                    BleInstruction::CloseBluetoothConnection => {
                        info!(serial = session.serial, "oracle requested BLE disconnect");
                        manager.disconnect(session.serial).await;
                        break;
                    }
                    BleInstruction::Unknown(tag) => {
                        warn!(serial = session.serial, tag, "ignoring unrecognized oracle instruction");
                    }
                }
            }

            manager.disconnect(session.serial).await;
        });
    }

    async fn disconnect(&self, serial: u32) {
        if let Some(session) = self.sessions.lock().await.remove(&serial) {
            if let Err(error) = session.disconnect().await {
                warn!(%error, serial, "error disconnecting from lock");
            }
        }
    }

    /// Disconnects every active session, used during graceful shutdown
    /// (spec.md §5: "schedule disconnect_all with a 5s deadline").
    pub async fn disconnect_all(&self) {
        let serials: Vec<u32> = self.sessions.lock().await.keys().copied().collect();
        for serial in serials {
            self.disconnect(serial).await;
        }
    }
}
