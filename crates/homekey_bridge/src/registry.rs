//! Background BLE scanner that keeps a `serial -> device` registry warm so
//! `BleClient::connect` usually has something to reuse instead of running a
//! fresh discovery scan (spec.md §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use btleplug::api::Central;
use btleplug::api::CentralEvent;
use btleplug::api::Manager as _;
use btleplug::api::Peripheral as _;
use btleplug::api::ScanFilter;
use btleplug::platform::Adapter;
use btleplug::platform::Manager;
use btleplug::platform::Peripheral;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::BleError;

/// Nordic UART-style manufacturer Company ID the installable lock advertises
/// under (spec.md §4.9).
const COMPANY_ID: u16 = 0x065B;
/// Bits that must be set in the advertisement's flag byte (offset 11) for an
/// exact match on "installable lock".
const LOCK_FLAG_MASK: u8 = 0x08 | 0x01;

const ACTIVE_SCAN_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_DEVICE_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct RegistryEntry {
    device: Peripheral,
    last_seen: Instant,
}

/// Extracts the 4-byte little-endian serial and checks the installable-lock
/// flag from a manufacturer-data advertisement, if it matches the expected
/// layout (spec.md §4.9: "serial at octets 3..7 little-endian u32, flag bits
/// 0x08|0x01 at byte 11").
fn parse_lock_advertisement(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<u32> {
    let payload = manufacturer_data.get(&COMPANY_ID)?;
    if payload.len() < 12 {
        return None;
    }
    if payload[11] & LOCK_FLAG_MASK != LOCK_FLAG_MASK {
        return None;
    }
    let serial = u32::from_le_bytes(payload[3..7].try_into().ok()?);
    Some(serial)
}

/// Keeps a rolling `serial -> Peripheral` map populated by a background scan
/// cycle: 5 seconds of active scanning followed by sleeping for
/// `scan_interval` (default 30s). Entries older than `device_ttl` (default
/// 300s) are pruned on each cycle.
pub struct DeviceRegistry {
    adapter: Adapter,
    entries: Mutex<HashMap<u32, RegistryEntry>>,
    scan_interval: Duration,
    device_ttl: Duration,
}

impl DeviceRegistry {
    pub async fn new() -> Result<Arc<Self>, BleError> {
        Self::with_intervals(DEFAULT_SCAN_INTERVAL, DEFAULT_DEVICE_TTL).await
    }

    pub async fn with_intervals(scan_interval: Duration, device_ttl: Duration) -> Result<Arc<Self>, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleError::NoAdapter)?;

        let registry =
            Arc::new(DeviceRegistry { adapter, entries: Mutex::new(HashMap::new()), scan_interval, device_ttl });

        let background = Arc::clone(&registry);
        tokio::spawn(async move {
            background.scan_forever().await;
        });

        Ok(registry)
    }

    pub(crate) fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// A fresh sighting of `serial`, or `None` if it hasn't been seen within
    /// `device_ttl`.
    pub async fn get(&self, serial: u32) -> Option<Peripheral> {
        let entries = self.entries.lock().await;
        let entry = entries.get(&serial)?;
        if entry.last_seen.elapsed() <= self.device_ttl {
            Some(entry.device.clone())
        } else {
            None
        }
    }

    /// Runs a single synchronous scan cycle and returns whatever it found for
    /// `serial`, used by the client as a fallback when the background
    /// registry has gone stale (spec.md §4.9 "force_refresh").
    pub async fn force_refresh(&self, serial: u32) -> Result<Option<Peripheral>, BleError> {
        self.scan_once().await?;
        Ok(self.get(serial).await)
    }

    async fn scan_forever(self: Arc<Self>) {
        loop {
            if let Err(error) = self.scan_once().await {
                warn!(%error, "BLE scan cycle failed");
            }
            self.prune_stale().await;
            tokio::time::sleep(self.scan_interval).await;
        }
    }

    async fn scan_once(&self) -> Result<(), BleError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        let mut events = self.adapter.events().await?;

        let deadline = tokio::time::sleep(ACTIVE_SCAN_DURATION);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => {
                    match event {
                        Some(CentralEvent::ManufacturerDataAdvertisement { id, manufacturer_data }) => {
                            if let Some(serial) = parse_lock_advertisement(&manufacturer_data) {
                                if let Ok(peripheral) = self.adapter.peripheral(&id).await {
                                    self.remember(serial, peripheral).await;
                                }
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn remember(&self, serial: u32, device: Peripheral) {
        let mut entries = self.entries.lock().await;
        let is_new = !entries.contains_key(&serial);
        entries.insert(serial, RegistryEntry { device, last_seen: Instant::now() });
        if is_new {
            info!(serial, "discovered installable lock");
        } else {
            debug!(serial, "refreshed installable lock sighting");
        }
    }

    async fn prune_stale(&self) {
        let mut entries = self.entries.lock().await;
        let ttl = self.device_ttl;
        entries.retain(|serial, entry| {
            let fresh = entry.last_seen.elapsed() <= ttl;
            if !fresh {
                debug!(serial, "pruning stale lock sighting");
            }
            fresh
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serial_and_requires_exact_flag_match() {
        let mut payload = vec![0u8; 12];
        payload[3..7].copy_from_slice(&42u32.to_le_bytes());
        payload[11] = LOCK_FLAG_MASK;
        let mut data = HashMap::new();
        data.insert(COMPANY_ID, payload);

        assert_eq!(parse_lock_advertisement(&data), Some(42));
    }

    #[test]
    fn rejects_advertisements_missing_the_lock_flag() {
        let mut payload = vec![0u8; 12];
        payload[3..7].copy_from_slice(&42u32.to_le_bytes());
        payload[11] = 0x00;
        let mut data = HashMap::new();
        data.insert(COMPANY_ID, payload);

        assert_eq!(parse_lock_advertisement(&data), None);
    }

    #[test]
    fn ignores_advertisements_from_other_manufacturers() {
        let data = HashMap::new();
        assert_eq!(parse_lock_advertisement(&data), None);
    }

    #[test]
    fn rejects_truncated_payloads() {
        let mut data = HashMap::new();
        data.insert(COMPANY_ID, vec![0u8; 4]);
        assert_eq!(parse_lock_advertisement(&data), None);
    }
}
