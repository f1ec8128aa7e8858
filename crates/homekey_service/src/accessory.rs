//! The minimal surface this service exposes to a HomeKit Accessory Protocol
//! stack (spec.md §4.6, §4.7, §6): one async method per characteristic read
//! or write. The HAP pairing/session/TLS machinery itself is out of scope
//! (spec.md §1) and lives in whatever external accessory server implements
//! this trait against a real characteristic.

use async_trait::async_trait;
use homekey_protocol::control_point::TlvError;

/// NFC Access, Hardware Finish, Supported Configuration and Configuration
/// State, as the HAP stack would drive them. An external accessory server
/// plugs its own pairing/session layer in front of this trait; everything
/// below it is this crate's concern.
#[async_trait]
pub trait HomeKeyAccessory: Send + Sync {
    /// NFC Access Control Point, reader-key sub-request (spec.md §4.6):
    /// base64-TLV `ReaderKeyRequest` in, base64-TLV `ReaderKeyResponse` out.
    async fn handle_reader_key_request(&self, request_b64: &str) -> Result<String, TlvError>;

    /// NFC Access Control Point, device-credential sub-request (spec.md §4.6).
    async fn handle_device_credential_request(&self, request_b64: &str) -> Result<String, TlvError>;

    /// Hardware Finish characteristic (spec.md §4.7).
    async fn hardware_finish(&self) -> String;

    /// Supported Configuration characteristic (spec.md §4.7).
    async fn supported_configuration(&self) -> String;

    /// Configuration State characteristic; always `0` (spec.md §6).
    async fn configuration_state(&self) -> u16 {
        0
    }

    /// Reconciles the issuer list against the HAP stack's current set of
    /// paired controller public keys (spec.md §3, SPEC_FULL.md §12).
    async fn sync_pairings(&self, paired_public_keys: Vec<Vec<u8>>);
}
