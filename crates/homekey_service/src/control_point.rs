//! `GET`/`ADD`/`REMOVE` semantics for the NFC Access Control Point (spec.md
//! §4.6), layered over the wire codec in `homekey_protocol::control_point`
//! and the key-material store. Encoding/decoding the TLV itself is the
//! protocol crate's job; this module owns the business rules.

use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use homekey_common::generator::Generator;
use homekey_protocol::control_point::DeviceCredentialRequest;
use homekey_protocol::control_point::DeviceCredentialResponse;
use homekey_protocol::control_point::Operation;
use homekey_protocol::control_point::OperationStatus;
use homekey_protocol::control_point::ReaderKeyRequest;
use homekey_protocol::control_point::ReaderKeyResponse;
use homekey_store::Endpoint;
use homekey_store::EndpointId;
use homekey_store::Enrollment;
use homekey_store::Enrollments;
use homekey_store::KeyMaterialStore;
use homekey_store::ReaderIdentifier;
use homekey_store::ReaderKey;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

const NOT_FOUND: DeviceCredentialResponse =
    DeviceCredentialResponse { status: OperationStatus::DoesNotExist, issuer_key_identifier: None, endpoint_id: None };

pub struct ControlPointHandler {
    store: Arc<dyn KeyMaterialStore>,
    now: Arc<dyn Generator<DateTime<Utc>> + Send + Sync>,
    /// Preserves the source implementation's counter-intuitive `DUPLICATE`
    /// status on a successful new device-credential creation
    /// (SPEC_FULL.md §13, the `add_device_credential` open question).
    compat_duplicate_on_add: bool,
}

impl ControlPointHandler {
    pub fn new(store: Arc<dyn KeyMaterialStore>, now: Arc<dyn Generator<DateTime<Utc>> + Send + Sync>, compat_duplicate_on_add: bool) -> Self {
        ControlPointHandler { store, now, compat_duplicate_on_add }
    }

    pub async fn handle_reader_key(&self, request: ReaderKeyRequest) -> ReaderKeyResponse {
        match request.operation {
            Operation::Get => {
                let group_id = self.store.get_reader_group_identifier().await;
                ReaderKeyResponse { status: OperationStatus::Success, identifier: Some(group_id) }
            }
            Operation::Add => self.add_reader_key(request).await,
            Operation::Remove => self.remove_reader_key(request).await,
        }
    }

    async fn add_reader_key(&self, request: ReaderKeyRequest) -> ReaderKeyResponse {
        let current_key = self.store.get_reader_private_key().await;
        let current_identifier = self.store.get_reader_identifier().await;

        let requested_key = request.reader_private_key.map(ReaderKey);
        let requested_identifier = request.unique_reader_identifier.map(ReaderIdentifier);

        let key_unchanged = requested_key.is_none_or(|key| key == current_key);
        let identifier_unchanged = requested_identifier.is_none_or(|id| id == current_identifier);

        // spec.md §4.6: differs on either field -> write and SUCCESS, else DUPLICATE.
        if key_unchanged && identifier_unchanged {
            return ReaderKeyResponse { status: OperationStatus::Duplicate, identifier: None };
        }

        if let Some(key) = requested_key {
            if let Err(error) = self.store.set_reader_private_key(key).await {
                warn!(%error, "failed to persist reader key");
            }
        }
        if let Some(identifier) = requested_identifier {
            if let Err(error) = self.store.set_reader_identifier(identifier).await {
                warn!(%error, "failed to persist reader identifier");
            }
        }

        ReaderKeyResponse { status: OperationStatus::Success, identifier: None }
    }

    async fn remove_reader_key(&self, request: ReaderKeyRequest) -> ReaderKeyResponse {
        let current_group_id = self.store.get_reader_group_identifier().await;
        match request.key_identifier {
            Some(identifier) if identifier == current_group_id => {
                if let Err(error) = self.store.set_reader_private_key(ReaderKey::ZERO).await {
                    warn!(%error, "failed to clear reader key");
                }
                ReaderKeyResponse { status: OperationStatus::Success, identifier: None }
            }
            _ => ReaderKeyResponse { status: OperationStatus::DoesNotExist, identifier: None },
        }
    }

    pub async fn handle_device_credential(&self, request: DeviceCredentialRequest) -> DeviceCredentialResponse {
        match request.operation {
            // SPEC_FULL.md §13: the source's GET/REMOVE stubs silently return
            // nothing; this returns an explicit DOES_NOT_EXIST instead.
            Operation::Get | Operation::Remove => NOT_FOUND,
            Operation::Add => self.add_device_credential(request).await,
        }
    }

    async fn add_device_credential(&self, request: DeviceCredentialRequest) -> DeviceCredentialResponse {
        let Some(credential_public_key) = &request.credential_public_key else {
            return NOT_FOUND;
        };

        let mut public_key = Vec::with_capacity(1 + credential_public_key.len());
        public_key.push(0x04);
        public_key.extend_from_slice(credential_public_key);

        let payload = request.encode();
        let enrollment = Enrollment::now(payload, self.now.generate());

        if let Some(existing) = self.store.get_endpoint_by_public_key(&public_key).await {
            return self.update_existing_enrollment(existing.id, enrollment).await;
        }

        let Some(issuer_id) = request.issuer_key_identifier else {
            return NOT_FOUND;
        };
        let Some(mut issuer) = self.store.get_issuer_by_id(issuer_id).await else {
            return NOT_FOUND;
        };

        let mut persistent_key = [0u8; 32];
        OsRng.fill_bytes(&mut persistent_key);

        let endpoint = Endpoint {
            id: EndpointId::derive(&public_key),
            public_key,
            persistent_key,
            counter: 0,
            last_used_at: 0,
            key_type: request.key_type.unwrap_or(0),
            enrollments: Enrollments { hap: Some(enrollment), attestation: None },
        };
        let endpoint_id = endpoint.id;
        issuer.endpoints.push(endpoint);

        if let Err(error) = self.store.upsert_issuer(issuer).await {
            warn!(%error, "failed to persist new device credential");
        }

        let status = if self.compat_duplicate_on_add {
            warn!("add_device_credential created a new endpoint but is replying DUPLICATE (compat_duplicate_on_add)");
            OperationStatus::Duplicate
        } else {
            OperationStatus::Success
        };

        DeviceCredentialResponse { status, issuer_key_identifier: Some(issuer_id), endpoint_id: Some(endpoint_id.0) }
    }

    /// spec.md §4.6: a credential that already exists only gets its HAP
    /// enrollment refreshed, and the reply is `DUPLICATE` regardless of the
    /// compatibility flag.
    async fn update_existing_enrollment(&self, endpoint_id: EndpointId, enrollment: Enrollment) -> DeviceCredentialResponse {
        let Some(mut issuer) = self.store.get_issuer_by_endpoint(endpoint_id).await else {
            return NOT_FOUND;
        };
        let issuer_id = issuer.id;

        let Some(endpoint) = issuer.endpoints.iter_mut().find(|e| e.id == endpoint_id) else {
            return NOT_FOUND;
        };
        endpoint.enrollments.hap = Some(enrollment);

        if let Err(error) = self.store.upsert_issuer(issuer).await {
            warn!(%error, "failed to persist refreshed HAP enrollment");
        }

        DeviceCredentialResponse { status: OperationStatus::Duplicate, issuer_key_identifier: Some(issuer_id), endpoint_id: Some(endpoint_id.0) }
    }
}

#[cfg(test)]
mod tests {
    use homekey_store::FileStore;
    use homekey_store::Issuer;
    use homekey_store::IssuerId;

    use super::*;

    struct FixedNow(DateTime<Utc>);

    impl Generator<DateTime<Utc>> for FixedNow {
        fn generate(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn fixed_now() -> Arc<dyn Generator<DateTime<Utc>> + Send + Sync> {
        Arc::new(FixedNow(DateTime::from_timestamp(1_700_000_000, 0).unwrap()))
    }

    #[tokio::test]
    async fn add_reader_key_with_unchanged_values_is_duplicate_and_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        store.set_reader_private_key(ReaderKey([0x01; 32])).await.unwrap();
        store.set_reader_identifier(ReaderIdentifier([0x02; 8])).await.unwrap();

        let handler = ControlPointHandler::new(store.clone(), fixed_now(), true);
        let response = handler
            .handle_reader_key(ReaderKeyRequest {
                operation: Operation::Add,
                reader_private_key: Some([0x01; 32]),
                unique_reader_identifier: Some([0x02; 8]),
                key_identifier: None,
            })
            .await;

        assert_eq!(response.status, OperationStatus::Duplicate);
        assert_eq!(store.get_reader_private_key().await, ReaderKey([0x01; 32]));
    }

    #[tokio::test]
    async fn add_reader_key_with_new_values_writes_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();

        let handler = ControlPointHandler::new(store.clone(), fixed_now(), true);
        let response = handler
            .handle_reader_key(ReaderKeyRequest {
                operation: Operation::Add,
                reader_private_key: Some([0x01; 32]),
                unique_reader_identifier: Some([0x02; 8]),
                key_identifier: None,
            })
            .await;

        assert_eq!(response.status, OperationStatus::Success);
        assert_eq!(store.get_reader_private_key().await, ReaderKey([0x01; 32]));
        assert_eq!(store.get_reader_identifier().await, ReaderIdentifier([0x02; 8]));
    }

    #[tokio::test]
    async fn remove_reader_key_matching_group_id_zeroes_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        let key = ReaderKey([0x01; 32]);
        store.set_reader_private_key(key).await.unwrap();
        let group_id = key.group_identifier();

        let handler = ControlPointHandler::new(store.clone(), fixed_now(), true);
        let response = handler
            .handle_reader_key(ReaderKeyRequest {
                operation: Operation::Remove,
                reader_private_key: None,
                unique_reader_identifier: None,
                key_identifier: Some(group_id),
            })
            .await;

        assert_eq!(response.status, OperationStatus::Success);
        assert_eq!(store.get_reader_private_key().await, ReaderKey::ZERO);
    }

    #[tokio::test]
    async fn remove_reader_key_with_wrong_identifier_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        store.set_reader_private_key(ReaderKey([0x01; 32])).await.unwrap();

        let handler = ControlPointHandler::new(store.clone(), fixed_now(), true);
        let response = handler
            .handle_reader_key(ReaderKeyRequest {
                operation: Operation::Remove,
                reader_private_key: None,
                unique_reader_identifier: None,
                key_identifier: Some([0xFF; 8]),
            })
            .await;

        assert_eq!(response.status, OperationStatus::DoesNotExist);
        assert_eq!(store.get_reader_private_key().await, ReaderKey([0x01; 32]));
    }

    #[tokio::test]
    async fn add_device_credential_to_known_issuer_creates_endpoint_and_replies_duplicate_under_compat() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        let issuer_id = IssuerId([0x09; 32]);
        store.upsert_issuer(Issuer::new(issuer_id, vec![0x04; 65])).await.unwrap();

        let handler = ControlPointHandler::new(store.clone(), fixed_now(), true);
        let response = handler
            .handle_device_credential(DeviceCredentialRequest {
                operation: Operation::Add,
                issuer_key_identifier: Some(issuer_id),
                credential_public_key: Some(vec![0x01; 64]),
                key_type: Some(0x01),
            })
            .await;

        // SPEC_FULL.md §13: preserved as DUPLICATE under the compat flag.
        assert_eq!(response.status, OperationStatus::Duplicate);
        assert_eq!(response.issuer_key_identifier, Some(issuer_id));

        let issuer = store.get_issuer_by_id(issuer_id).await.unwrap();
        assert_eq!(issuer.endpoints.len(), 1);
        let endpoint = &issuer.endpoints[0];
        assert_eq!(endpoint.public_key[0], 0x04);
        assert_eq!(endpoint.counter, 0);
        assert_eq!(endpoint.last_used_at, 0);
        assert_ne!(endpoint.persistent_key, [0u8; 32]);
        assert!(endpoint.enrollments.hap.is_some());
    }

    #[tokio::test]
    async fn add_device_credential_to_known_issuer_succeeds_when_compat_flag_is_off() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        let issuer_id = IssuerId([0x09; 32]);
        store.upsert_issuer(Issuer::new(issuer_id, vec![0x04; 65])).await.unwrap();

        let handler = ControlPointHandler::new(store.clone(), fixed_now(), false);
        let response = handler
            .handle_device_credential(DeviceCredentialRequest {
                operation: Operation::Add,
                issuer_key_identifier: Some(issuer_id),
                credential_public_key: Some(vec![0x01; 64]),
                key_type: Some(0x01),
            })
            .await;

        assert_eq!(response.status, OperationStatus::Success);
    }

    #[tokio::test]
    async fn add_device_credential_with_unknown_issuer_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();

        let handler = ControlPointHandler::new(store, fixed_now(), true);
        let response = handler
            .handle_device_credential(DeviceCredentialRequest {
                operation: Operation::Add,
                issuer_key_identifier: Some(IssuerId([0x01; 32])),
                credential_public_key: Some(vec![0x01; 64]),
                key_type: Some(0x01),
            })
            .await;

        assert_eq!(response.status, OperationStatus::DoesNotExist);
    }

    #[tokio::test]
    async fn add_device_credential_that_already_exists_only_updates_enrollment() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        let issuer_id = IssuerId([0x09; 32]);
        let mut issuer = Issuer::new(issuer_id, vec![0x04; 65]);
        let public_key = [0x04].iter().chain([0x02u8; 64].iter()).copied().collect::<Vec<u8>>();
        issuer.endpoints.push(Endpoint {
            id: EndpointId::derive(&public_key),
            public_key: public_key.clone(),
            persistent_key: [0x55; 32],
            counter: 3,
            last_used_at: 100,
            key_type: 0x01,
            enrollments: Enrollments::default(),
        });
        store.upsert_issuer(issuer).await.unwrap();

        let handler = ControlPointHandler::new(store.clone(), fixed_now(), true);
        let response = handler
            .handle_device_credential(DeviceCredentialRequest {
                operation: Operation::Add,
                issuer_key_identifier: Some(issuer_id),
                credential_public_key: Some(vec![0x02; 64]),
                key_type: Some(0x01),
            })
            .await;

        assert_eq!(response.status, OperationStatus::Duplicate);

        let issuer = store.get_issuer_by_id(issuer_id).await.unwrap();
        assert_eq!(issuer.endpoints.len(), 1);
        assert_eq!(issuer.endpoints[0].counter, 3);
        assert_eq!(issuer.endpoints[0].persistent_key, [0x55; 32]);
        assert!(issuer.endpoints[0].enrollments.hap.is_some());
    }

    #[tokio::test]
    async fn get_and_remove_device_credential_are_explicit_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        let handler = ControlPointHandler::new(store, fixed_now(), true);

        for operation in [Operation::Get, Operation::Remove] {
            let response = handler
                .handle_device_credential(DeviceCredentialRequest {
                    operation,
                    issuer_key_identifier: None,
                    credential_public_key: None,
                    key_type: None,
                })
                .await;
            assert_eq!(response.status, OperationStatus::DoesNotExist);
        }
    }
}
