use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use tokio::sync::Mutex;
use tracing::debug;
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

const READ_ENDPOINT: &str = "_r/homekey_state_requested";
const WRITE_ENDPOINT: &str = "_r/homekey_state_updated";
const PERIODIC_READ_INTERVAL: Duration = Duration::from_secs(60);

/// A store whose source of truth is an external REST service (spec.md §4.1, §6).
/// Reads and writes POST the full document; a background task re-fetches every
/// 60 seconds to reconcile edits made outside this process. A failed periodic
/// read keeps the prior in-memory snapshot (spec.md §4.1).
pub struct RestStore {
    base_url: String,
    api_secret: Option<String>,
    client: reqwest::Client,
    snapshot: Mutex<StoreSnapshot>,
}

impl RestStore {
    pub async fn connect(base_url: impl Into<String>, api_secret: Option<String>) -> Result<Arc<Self>, StoreError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;

        let store = Arc::new(RestStore { base_url, api_secret, client, snapshot: Mutex::new(StoreSnapshot::default()) });
        store.reload().await;

        let background = Arc::clone(&store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PERIODIC_READ_INTERVAL);
            ticker.tick().await; // first tick fires immediately; we already loaded above
            loop {
                ticker.tick().await;
                background.reload().await;
            }
        });

        Ok(store)
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.client.post(url);
        if let Some(secret) = &self.api_secret {
            builder = builder.header(AUTHORIZATION, format!("Bearer {secret}"));
        }
        builder
    }

    /// Re-fetch the document from the oracle. On failure, the prior snapshot is kept.
    async fn reload(&self) {
        match self.try_reload().await {
            Ok(snapshot) => *self.snapshot.lock().await = snapshot,
            Err(err) => warn!(error = %err, "could not load HomeKey configuration from API, keeping prior snapshot"),
        }
    }

    async fn try_reload(&self) -> Result<StoreSnapshot, StoreError> {
        let response = self.request(READ_ENDPOINT).json(&serde_json::json!({})).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        let snapshot = response.json::<StoreSnapshot>().await?;
        debug!("successfully loaded state from API");
        Ok(snapshot)
    }

    /// Push the in-memory snapshot to the oracle. A transport failure is logged and
    /// the in-memory change is kept for the next attempt (spec.md §7).
    async fn flush(&self, snapshot: &StoreSnapshot) {
        if let Err(err) = self.try_flush(snapshot).await {
            warn!(error = %err, "could not save HomeKey configuration to API");
        }
    }

    async fn try_flush(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let response = self.request(WRITE_ENDPOINT).json(snapshot).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyMaterialStore for RestStore {
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
