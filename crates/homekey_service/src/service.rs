//! Wires the `HomeKeyAccessory` surface to the control-point handler and the
//! static Hardware Finish / Supported Configuration TLVs (spec.md §4.6, §4.7).

use std::sync::Arc;

use async_trait::async_trait;
use homekey_common::config::HardwareFinishColor;
use homekey_protocol::control_point::from_base64;
use homekey_protocol::control_point::to_base64;
use homekey_protocol::control_point::DeviceCredentialRequest;
use homekey_protocol::control_point::ReaderKeyRequest;
use homekey_protocol::control_point::TlvError;
use homekey_protocol::finish::HardwareFinishResponse;
use homekey_protocol::finish::SupportedConfigurationResponse;
use homekey_store::KeyMaterialStore;

use crate::accessory::HomeKeyAccessory;
use crate::control_point::ControlPointHandler;

pub struct HomeKeyService {
    store: Arc<dyn KeyMaterialStore>,
    control_point: ControlPointHandler,
    finish: HardwareFinishColor,
}

impl HomeKeyService {
    pub fn new(store: Arc<dyn KeyMaterialStore>, control_point: ControlPointHandler, finish: HardwareFinishColor) -> Self {
        HomeKeyService { store, control_point, finish }
    }
}

#[async_trait]
impl HomeKeyAccessory for HomeKeyService {
    async fn handle_reader_key_request(&self, request_b64: &str) -> Result<String, TlvError> {
        let request = ReaderKeyRequest::decode(&from_base64(request_b64)?)?;
        let response = self.control_point.handle_reader_key(request).await;
        Ok(to_base64(&response.encode()))
    }

    async fn handle_device_credential_request(&self, request_b64: &str) -> Result<String, TlvError> {
        let request = DeviceCredentialRequest::decode(&from_base64(request_b64)?)?;
        let response = self.control_point.handle_device_credential(request).await;
        Ok(to_base64(&response.encode()))
    }

    async fn hardware_finish(&self) -> String {
        HardwareFinishResponse(self.finish).to_base64()
    }

    async fn supported_configuration(&self) -> String {
        SupportedConfigurationResponse::default().to_base64()
    }

    async fn sync_pairings(&self, paired_public_keys: Vec<Vec<u8>>) {
        if let Err(error) = self.store.sync_issuers(paired_public_keys).await {
            tracing::warn!(%error, "failed to reconcile issuers against HAP pairings");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use chrono::Utc;
    use homekey_common::generator::Generator;
    use homekey_protocol::control_point::Operation;
    use homekey_protocol::control_point::OperationStatus;
    use homekey_protocol::control_point::ReaderKeyResponse;
    use homekey_store::FileStore;

    use super::*;

    struct FixedNow(DateTime<Utc>);

    impl Generator<DateTime<Utc>> for FixedNow {
        fn generate(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[tokio::test]
    async fn hardware_finish_reports_configured_color() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        let now: Arc<dyn Generator<DateTime<Utc>> + Send + Sync> = Arc::new(FixedNow(DateTime::from_timestamp(0, 0).unwrap()));
        let service = HomeKeyService::new(store.clone(), ControlPointHandler::new(store, now, true), HardwareFinishColor::Gold);

        let wire = service.hardware_finish().await;
        assert_eq!(HardwareFinishResponse::from_base64(&wire).unwrap().0, HardwareFinishColor::Gold);
    }

    #[tokio::test]
    async fn reader_key_get_round_trips_through_base64_accessory_surface() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        let now: Arc<dyn Generator<DateTime<Utc>> + Send + Sync> = Arc::new(FixedNow(DateTime::from_timestamp(0, 0).unwrap()));
        let service = HomeKeyService::new(store.clone(), ControlPointHandler::new(store, now, true), HardwareFinishColor::Black);

        let request = ReaderKeyRequest { operation: Operation::Get, reader_private_key: None, unique_reader_identifier: None, key_identifier: None };
        let wire = service.handle_reader_key_request(&to_base64(&request.encode())).await.unwrap();
        let response = ReaderKeyResponse::decode(&from_base64(&wire).unwrap()).unwrap();
        assert_eq!(response.status, OperationStatus::Success);
    }
}
