//! The contactless front-end seam (spec.md §4.2, §4.4): the one external
//! collaborator this crate treats as out of scope, specified only by the
//! operations the polling loop requires of it.

use async_trait::async_trait;
use homekey_protocol::IsoDepTag;

#[derive(Debug, thiserror::Error)]
pub enum NfcError {
    #[error("reader key is unconfigured")]
    NotConfigured,
    #[error("contactless front-end I/O error: {0}")]
    Io(String),
}

/// What a single `sense` call found in the field.
pub enum SensedTarget {
    /// Activated into ISO-DEP and ready to carry APDUs.
    IsoDep(Box<dyn IsoDepTag>),
    /// Present but not a 14443-4 target; the loop busy-waits for the field to
    /// clear rather than attempting a transaction (spec.md §4.4 step 5).
    NonIsoDep,
}

/// The minimal driver surface the polling loop needs: sense a target (prepending
/// the ECP broadcast), and poll field presence. Low-level radio driver bindings
/// live outside this crate (spec.md §1).
#[async_trait]
pub trait ContactlessFrontend: Send + Sync {
    /// One 14443-A 106 kbps sense, broadcasting `ecp_home` as the polling payload.
    /// `None` means no target answered.
    async fn sense(&self, ecp_home: &[u8]) -> Result<Option<SensedTarget>, NfcError>;

    /// Whether a previously-sensed target is still in the field.
    async fn is_present(&self) -> bool;
}

/// A frontend that never senses anything. The actual CLF/PCD driver binding is
/// external to this crate (spec.md §1); this stands in for it wherever no real
/// driver has been wired up, so the polling loop still runs (and keeps
/// obeying `throttle_polling`) rather than failing to start.
#[derive(Debug, Default)]
pub struct NullFrontend;

#[async_trait]
impl ContactlessFrontend for NullFrontend {
    async fn sense(&self, _ecp_home: &[u8]) -> Result<Option<SensedTarget>, NfcError> {
        Ok(None)
    }

    async fn is_present(&self) -> bool {
        false
    }
}
