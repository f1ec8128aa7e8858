//! Hardware Finish and Supported Configuration TLVs (spec.md §4.6): static,
//! read-only characteristics that advertise the reader's physical finish and the
//! capacity of its credential store.

use homekey_common::config::HardwareFinishColor;

use crate::control_point::{from_base64, to_base64, TlvError};

fn finish_tag(color: HardwareFinishColor) -> u8 {
    match color {
        HardwareFinishColor::Tan => 0x00,
        HardwareFinishColor::Gold => 0x01,
        HardwareFinishColor::Silver => 0x02,
        HardwareFinishColor::Black => 0x03,
    }
}

fn finish_from_tag(tag: u8) -> Result<HardwareFinishColor, TlvError> {
    match tag {
        0x00 => Ok(HardwareFinishColor::Tan),
        0x01 => Ok(HardwareFinishColor::Gold),
        0x02 => Ok(HardwareFinishColor::Silver),
        0x03 => Ok(HardwareFinishColor::Black),
        other => Err(TlvError::UnknownStatus(other)),
    }
}

/// The `Hardware Finish` characteristic value: a single-element TLV naming the
/// reader's physical finish, wrapped in base64 like every other NFC Access
/// characteristic payload.
pub struct HardwareFinishResponse(pub HardwareFinishColor);

impl HardwareFinishResponse {
    pub fn to_base64(&self) -> String {
        to_base64(&[0x01, 0x01, finish_tag(self.0)])
    }

    pub fn from_base64(encoded: &str) -> Result<Self, TlvError> {
        let bytes = from_base64(encoded)?;
        if bytes.len() != 3 || bytes[0] != 0x01 || bytes[1] != 0x01 {
            return Err(TlvError::Truncated);
        }
        Ok(HardwareFinishResponse(finish_from_tag(bytes[2])?))
    }
}

/// The reader's credential capacity, as surfaced by the `Supported Configuration`
/// characteristic: how many issuer keys and how many inactive device credentials
/// it can hold. Fixed per SPEC_FULL.md §12 rather than derived from the store, so
/// that HAP controllers see a stable capacity regardless of current usage.
pub struct SupportedConfigurationResponse {
    pub number_of_issuer_keys: u8,
    pub number_of_inactive_credentials: u8,
}

impl Default for SupportedConfigurationResponse {
    fn default() -> Self {
        SupportedConfigurationResponse { number_of_issuer_keys: 16, number_of_inactive_credentials: 16 }
    }
}

impl SupportedConfigurationResponse {
    pub fn to_base64(&self) -> String {
        let bytes = [0x01, 0x01, self.number_of_issuer_keys, 0x02, 0x01, self.number_of_inactive_credentials];
        to_base64(&bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, TlvError> {
        let bytes = from_base64(encoded)?;
        if bytes.len() != 6 || bytes[0] != 0x01 || bytes[1] != 0x01 || bytes[3] != 0x02 || bytes[4] != 0x01 {
            return Err(TlvError::Truncated);
        }
        Ok(SupportedConfigurationResponse { number_of_issuer_keys: bytes[2], number_of_inactive_credentials: bytes[5] })
    }
}
