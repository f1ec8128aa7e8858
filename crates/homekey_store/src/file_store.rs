use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::model::Endpoint;
use crate::model::EndpointId;
use crate::model::Issuer;
use crate::model::IssuerId;
use crate::model::ReaderIdentifier;
use crate::model::ReaderKey;
use crate::model::StoreSnapshot;
use crate::store::KeyMaterialStore;

/// A single JSON document on disk, read once on construction and rewritten
/// atomically (write-to-temp-then-rename) on every commit (spec.md §4.1).
pub struct FileStore {
    path: PathBuf,
    snapshot: Mutex<StoreSnapshot>,
}

impl FileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Arc<Self>, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(err) => return Err(StoreError::Io(err)),
        };

        Ok(Arc::new(FileStore { path, snapshot: Mutex::new(snapshot) }))
    }

    /// Persist the current in-memory snapshot. A failure is logged and the
    /// in-memory state is kept; the next successful flush carries it forward.
    async fn flush(&self, snapshot: &StoreSnapshot) {
        if let Err(err) = self.try_flush(snapshot).await {
            warn!(error = %err, path = %self.path.display(), "failed to flush HomeKey store to disk");
        }
    }

    async fn try_flush(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyMaterialStore for FileStore {
    async fn get_reader_private_key(&self) -> ReaderKey {
        self.snapshot.lock().await.reader_key()
    }

    async fn set_reader_private_key(&self, key: ReaderKey) -> Result<(), StoreError> {
        let mut guard = self.snapshot.lock().await;
        guard.reader_private_key = key.0;
        self.flush(&guard).await;
        Ok(())
    }

    async fn get_reader_identifier(&self) -> ReaderIdentifier {
        self.snapshot.lock().await.reader_identifier()
    }

    async fn set_reader_identifier(&self, id: ReaderIdentifier) -> Result<(), StoreError> {
        let mut guard = self.snapshot.lock().await;
        guard.reader_identifier = id.0;
        self.flush(&guard).await;
        Ok(())
    }

    async fn get_all_issuers(&self) -> Vec<Issuer> {
        self.snapshot.lock().await.issuer_list()
    }

    async fn get_issuer_by_id(&self, id: IssuerId) -> Option<Issuer> {
        self.get_all_issuers().await.into_iter().find(|i| i.id == id)
    }

    async fn get_issuer_by_public_key(&self, public_key: &[u8]) -> Option<Issuer> {
        self.get_all_issuers().await.into_iter().find(|i| i.public_key == public_key)
    }

    async fn get_issuer_by_endpoint(&self, endpoint_id: EndpointId) -> Option<Issuer> {
        self.get_all_issuers()
            .await
            .into_iter()
            .find(|i| i.endpoints.iter().any(|e| e.id == endpoint_id))
    }

    async fn get_all_endpoints(&self) -> Vec<Endpoint> {
        self.get_all_issuers().await.into_iter().flat_map(|i| i.endpoints).collect()
    }

    async fn get_endpoint_by_id(&self, id: EndpointId) -> Option<Endpoint> {
        self.get_all_endpoints().await.into_iter().find(|e| e.id == id)
    }

    async fn get_endpoint_by_public_key(&self, public_key: &[u8]) -> Option<Endpoint> {
        self.get_all_endpoints().await.into_iter().find(|e| e.public_key == public_key)
    }

    async fn upsert_issuer(&self, issuer: Issuer) -> Result<(), StoreError> {
        let mut guard = self.snapshot.lock().await;
        guard.issuers.insert(hex::encode(issuer.id.0), issuer);
        self.flush(&guard).await;
        Ok(())
    }

    async fn upsert_issuers(&self, issuers: Vec<Issuer>) -> Result<(), StoreError> {
        let mut guard = self.snapshot.lock().await;
        for issuer in issuers {
            guard.issuers.insert(hex::encode(issuer.id.0), issuer);
        }
        self.flush(&guard).await;
        Ok(())
    }

    async fn remove_issuer(&self, issuer_id: IssuerId) -> Result<(), StoreError> {
        let mut guard = self.snapshot.lock().await;
        guard.issuers.remove(&hex::encode(issuer_id.0));
        self.flush(&guard).await;
        Ok(())
    }

    async fn upsert_endpoint(&self, issuer_id: IssuerId, endpoint: Endpoint) -> Result<(), StoreError> {
        let mut guard = self.snapshot.lock().await;
        if let Some(issuer) = guard.issuers.get_mut(&hex::encode(issuer_id.0)) {
            if let Some(existing) = issuer.endpoints.iter_mut().find(|e| e.id == endpoint.id) {
                *existing = endpoint;
            } else {
                issuer.endpoints.push(endpoint);
            }
        }
        self.flush(&guard).await;
        Ok(())
    }

    async fn sync_issuers(&self, paired_public_keys: Vec<Vec<u8>>) -> Result<(), StoreError> {
        let mut guard = self.snapshot.lock().await;
        crate::sync::reconcile(&mut guard.issuers, paired_public_keys);
        self.flush(&guard).await;
        Ok(())
    }
}
