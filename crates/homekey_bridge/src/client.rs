//! Per-lock GATT session: connect, subscribe to notifications, write
//! outbound frames (spec.md §4.9, §6).

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use btleplug::api::Central;
use btleplug::api::Characteristic;
use btleplug::api::Peripheral as _;
use btleplug::api::ScanFilter;
use btleplug::api::WriteType;
use btleplug::platform::Peripheral;
use futures::Stream;
use futures::StreamExt;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::registry::DeviceRegistry;
use crate::BleError;

/// `0000FD30-0000-1000-8000-00805F9B34FB` (spec.md §6).
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fd30_0000_1000_8000_00805f9b34fb);
/// `6E400002-B5A3-F393-E0A9-E50E24DCCA9E`, written to.
pub const TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// `6E400003-B5A3-F393-E0A9-E50E24DCCA9E`, subscribed to.
pub const RX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

const FALLBACK_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// A connected lock, ready to write outbound frames and stream inbound
/// notifications.
pub struct BleSession {
    pub serial: u32,
    peripheral: Peripheral,
    tx_characteristic: Characteristic,
}

impl BleSession {
    pub async fn write(&self, data: &[u8]) -> Result<(), BleError> {
        self.peripheral.write(&self.tx_characteristic, data, WriteType::WithoutResponse).await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), BleError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    pub async fn notifications(&self) -> Result<Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>, BleError> {
        let stream = self.peripheral.notifications().await?;
        Ok(Box::pin(stream.map(|notification| notification.value)))
    }
}

/// Establishes a GATT session with the lock identified by `serial`, using
/// the background registry when possible and falling back to a targeted
/// scan otherwise (spec.md §4.9: "registry hit -> direct, miss ->
/// force_refresh -> miss again -> one-shot exact-match scan").
pub async fn connect(registry: &DeviceRegistry, serial: u32) -> Result<BleSession, BleError> {
    let peripheral = match registry.get(serial).await {
        Some(peripheral) => peripheral,
        None => match registry.force_refresh(serial).await? {
            Some(peripheral) => peripheral,
            None => scan_for_serial(registry, serial).await?,
        },
    };

    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }
    peripheral.discover_services().await?;

    let tx_characteristic = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == TX_CHARACTERISTIC_UUID)
        .ok_or(BleError::CharacteristicMissing("tx"))?;

    let rx_characteristic = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == RX_CHARACTERISTIC_UUID)
        .ok_or(BleError::CharacteristicMissing("rx"))?;
    peripheral.subscribe(&rx_characteristic).await?;

    info!(serial, "connected to installable lock");
    Ok(BleSession { serial, peripheral, tx_characteristic })
}

/// One-shot 15s scan for a device whose manufacturer-data mask matches
/// `serial` exactly (spec.md §4.9). Used only when the background registry
/// has no fresh sighting.
async fn scan_for_serial(registry: &DeviceRegistry, serial: u32) -> Result<Peripheral, BleError> {
    let adapter = registry.adapter();
    adapter.start_scan(ScanFilter::default()).await?;

    let deadline = tokio::time::sleep(FALLBACK_SCAN_TIMEOUT);
    tokio::pin!(deadline);

    let result = 'scan: loop {
        tokio::select! {
            _ = &mut deadline => break 'scan Err(BleError::NotFound(serial)),
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                for peripheral in adapter.peripherals().await.unwrap_or_default() {
                    if let Ok(Some(properties)) = peripheral.properties().await {
                        if matches_serial(&properties.manufacturer_data, serial) {
                            break 'scan Ok(peripheral);
                        }
                    }
                }
            }
        }
    };

    adapter.stop_scan().await.ok();
    result
}

fn matches_serial(manufacturer_data: &HashMap<u16, Vec<u8>>, serial: u32) -> bool {
    const COMPANY_ID: u16 = 0x065B;
    const LOCK_FLAG_MASK: u8 = 0x08 | 0x01;

    let Some(payload) = manufacturer_data.get(&COMPANY_ID) else { return false };
    if payload.len() < 12 {
        return false;
    }
    if payload[11] & LOCK_FLAG_MASK != LOCK_FLAG_MASK {
        return false;
    }
    let Ok(bytes) = payload[3..7].try_into() else { return false };
    u32::from_le_bytes(bytes) == serial
}
