use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::Endpoint;
use crate::model::EndpointId;
use crate::model::Issuer;
use crate::model::IssuerId;
use crate::model::ReaderIdentifier;
use crate::model::ReaderKey;

/// The persistent key-material store contract (spec.md §4.1). Both the file-backed
/// and REST-backed realizations implement this trait; the HomeKey transaction engine
/// and the control-point handler never see which one is in use.
///
/// Readers always receive defensive copies: mutating the returned value never
/// affects the store (spec.md §9, "deep-copy reads").
#[async_trait]
pub trait KeyMaterialStore: Send + Sync {
    async fn get_reader_private_key(&self) -> ReaderKey;
    async fn set_reader_private_key(&self, key: ReaderKey) -> Result<(), StoreError>;

    async fn get_reader_identifier(&self) -> ReaderIdentifier;
    async fn set_reader_identifier(&self, id: ReaderIdentifier) -> Result<(), StoreError>;

    /// Always recomputed from the reader key, never read from storage (spec.md §3).
    async fn get_reader_group_identifier(&self) -> [u8; 8] {
        self.get_reader_private_key().await.group_identifier()
    }

    async fn get_all_issuers(&self) -> Vec<Issuer>;
    async fn get_issuer_by_id(&self, id: IssuerId) -> Option<Issuer>;
    async fn get_issuer_by_public_key(&self, public_key: &[u8]) -> Option<Issuer>;
    async fn get_issuer_by_endpoint(&self, endpoint_id: EndpointId) -> Option<Issuer>;

    async fn get_all_endpoints(&self) -> Vec<Endpoint>;
    async fn get_endpoint_by_id(&self, id: EndpointId) -> Option<Endpoint>;
    async fn get_endpoint_by_public_key(&self, public_key: &[u8]) -> Option<Endpoint>;

    async fn upsert_issuer(&self, issuer: Issuer) -> Result<(), StoreError>;
    async fn upsert_issuers(&self, issuers: Vec<Issuer>) -> Result<(), StoreError>;
    /// No-op if the issuer is absent (spec.md §4.1).
    async fn remove_issuer(&self, issuer_id: IssuerId) -> Result<(), StoreError>;

    async fn upsert_endpoint(&self, issuer_id: IssuerId, endpoint: Endpoint) -> Result<(), StoreError>;

    /// Reconcile the issuer list against the HAP stack's current set of paired
    /// controller public keys: issuers whose key has been unpaired are removed,
    /// and issuers are created (with no endpoints) for newly-paired keys that have
    /// none yet (spec.md §3, SPEC_FULL.md §12).
    async fn sync_issuers(&self, paired_public_keys: Vec<Vec<u8>>) -> Result<(), StoreError>;
}
