use tracing::info;

use crate::error::StoreError;
use crate::store::KeyMaterialStore;

/// Copy a store's full contents into another, mirroring the original
/// implementation's one-shot `migration.py` (SPEC_FULL.md §12) — typically used to
/// move from a file-backed store to a REST-backed one.
pub async fn migrate(source: &dyn KeyMaterialStore, destination: &dyn KeyMaterialStore) -> Result<(), StoreError> {
    let reader_key = source.get_reader_private_key().await;
    let reader_identifier = source.get_reader_identifier().await;
    let issuers = source.get_all_issuers().await;

    info!(issuer_count = issuers.len(), "migrating HomeKey store");

    destination.set_reader_private_key(reader_key).await?;
    destination.set_reader_identifier(reader_identifier).await?;
    if !issuers.is_empty() {
        destination.upsert_issuers(issuers).await?;
    }

    info!("migration completed successfully");
    Ok(())
}
