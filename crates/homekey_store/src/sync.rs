use std::collections::BTreeMap;

use crate::model::Issuer;
use crate::model::IssuerId;

/// Reconcile the issuer map against the HAP stack's current set of paired
/// controller public keys (spec.md §3, SPEC_FULL.md §12): drop issuers whose
/// key is no longer paired, add endpoint-less issuers for newly paired keys.
pub(crate) fn reconcile(issuers: &mut BTreeMap<String, Issuer>, paired_public_keys: Vec<Vec<u8>>) {
    issuers.retain(|_, issuer| paired_public_keys.iter().any(|pk| pk == &issuer.public_key));

    for public_key in paired_public_keys {
        if issuers.values().any(|i| i.public_key == public_key) {
            continue;
        }
        let id = IssuerId(derive_issuer_id(&public_key));
        issuers.insert(hex::encode(id.0), Issuer::new(id, public_key));
    }
}

/// The controller is the authority on issuer identity, but the HAP pairing
/// notification only carries the public key; derive a stable id from it the
/// same way endpoint ids are derived from endpoint public keys.
fn derive_issuer_id(public_key: &[u8]) -> [u8; 32] {
    use ring::digest;
    let digest = digest::digest(&digest::SHA256, public_key);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}
