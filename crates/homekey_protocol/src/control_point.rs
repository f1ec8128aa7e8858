//! TLV codec for the HAP NFC Access Control Point characteristic (spec.md §4.6):
//! reader-key provisioning and device-credential management, both carried as
//! base64-encoded TLV blobs over the same characteristic.
//!
//! This module only encodes/decodes the wire format; the `GET`/`ADD`/`REMOVE`
//! semantics against the key-material store live in `homekey_service`, which is
//! where the HAP stack is actually wired in.

use homekey_store::IssuerId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TlvError {
    #[error("truncated TLV entry")]
    Truncated,
    #[error("TLV length {declared} exceeds remaining {remaining} bytes")]
    LengthMismatch { declared: usize, remaining: usize },
    #[error("missing required TLV tag {0:#04x}")]
    MissingTag(u8),
    #[error("TLV tag {tag:#04x} has length {actual}, expected {expected}")]
    WrongLength { tag: u8, expected: usize, actual: usize },
    #[error("unknown operation code {0:#04x}")]
    UnknownOperation(u8),
    #[error("unknown status code {0:#04x}")]
    UnknownStatus(u8),
    #[error("invalid base64 payload")]
    Base64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Add,
    Remove,
}

impl Operation {
    fn to_tag(self) -> u8 {
        match self {
            Operation::Get => 0x01,
            Operation::Add => 0x02,
            Operation::Remove => 0x03,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, TlvError> {
        match tag {
            0x01 => Ok(Operation::Get),
            0x02 => Ok(Operation::Add),
            0x03 => Ok(Operation::Remove),
            other => Err(TlvError::UnknownOperation(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    Duplicate,
    DoesNotExist,
}

impl OperationStatus {
    fn to_tag(self) -> u8 {
        match self {
            OperationStatus::Success => 0x00,
            OperationStatus::Duplicate => 0x02,
            OperationStatus::DoesNotExist => 0x03,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, TlvError> {
        match tag {
            0x00 => Ok(OperationStatus::Success),
            0x02 => Ok(OperationStatus::Duplicate),
            0x03 => Ok(OperationStatus::DoesNotExist),
            other => Err(TlvError::UnknownStatus(other)),
        }
    }
}

const TAG_OPERATION: u8 = 0x01;
const TAG_READER_PRIVATE_KEY: u8 = 0x02;
const TAG_UNIQUE_READER_IDENTIFIER: u8 = 0x03;
const TAG_KEY_IDENTIFIER: u8 = 0x04;
const TAG_STATUS: u8 = 0x05;
const TAG_IDENTIFIER: u8 = 0x06;
const TAG_ISSUER_KEY_IDENTIFIER: u8 = 0x07;
const TAG_CREDENTIAL_PUBLIC_KEY: u8 = 0x08;
const TAG_KEY_TYPE: u8 = 0x09;
const TAG_ENDPOINT_ID: u8 = 0x0A;

fn encode_tlv(tag: u8, value: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}

fn parse_tlvs(bytes: &[u8]) -> Result<Vec<(u8, Vec<u8>)>, TlvError> {
    let mut entries = Vec::new();
    let mut cursor = 0;
    while cursor < bytes.len() {
        if cursor + 2 > bytes.len() {
            return Err(TlvError::Truncated);
        }
        let tag = bytes[cursor];
        let len = bytes[cursor + 1] as usize;
        let remaining = bytes.len() - cursor - 2;
        if len > remaining {
            return Err(TlvError::LengthMismatch { declared: len, remaining });
        }
        let value = bytes[cursor + 2..cursor + 2 + len].to_vec();
        entries.push((tag, value));
        cursor += 2 + len;
    }
    Ok(entries)
}

fn find<'a>(entries: &'a [(u8, Vec<u8>)], tag: u8) -> Option<&'a [u8]> {
    entries.iter().find(|(t, _)| *t == tag).map(|(_, v)| v.as_slice())
}

fn require<'a>(entries: &'a [(u8, Vec<u8>)], tag: u8) -> Result<&'a [u8], TlvError> {
    find(entries, tag).ok_or(TlvError::MissingTag(tag))
}

fn fixed_len<const N: usize>(tag: u8, bytes: &[u8]) -> Result<[u8; N], TlvError> {
    bytes.try_into().map_err(|_| TlvError::WrongLength { tag, expected: N, actual: bytes.len() })
}

pub fn to_base64(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_base64(encoded: &str) -> Result<Vec<u8>, TlvError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(encoded).map_err(|_| TlvError::Base64)
}

/// `GET`/`ADD`/`REMOVE` against the reader's own key material (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderKeyRequest {
    pub operation: Operation,
    /// Present on `ADD`.
    pub reader_private_key: Option<[u8; 32]>,
    /// Present on `ADD`.
    pub unique_reader_identifier: Option<[u8; 8]>,
    /// Present on `REMOVE`; compared against the current reader group id.
    pub key_identifier: Option<[u8; 8]>,
}

impl ReaderKeyRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_tlv(TAG_OPERATION, &[self.operation.to_tag()], &mut out);
        if let Some(key) = self.reader_private_key {
            encode_tlv(TAG_READER_PRIVATE_KEY, &key, &mut out);
        }
        if let Some(id) = self.unique_reader_identifier {
            encode_tlv(TAG_UNIQUE_READER_IDENTIFIER, &id, &mut out);
        }
        if let Some(id) = self.key_identifier {
            encode_tlv(TAG_KEY_IDENTIFIER, &id, &mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TlvError> {
        let entries = parse_tlvs(bytes)?;
        let operation = Operation::from_tag(require(&entries, TAG_OPERATION)?[0])?;
        let reader_private_key =
            find(&entries, TAG_READER_PRIVATE_KEY).map(|v| fixed_len::<32>(TAG_READER_PRIVATE_KEY, v)).transpose()?;
        let unique_reader_identifier = find(&entries, TAG_UNIQUE_READER_IDENTIFIER)
            .map(|v| fixed_len::<8>(TAG_UNIQUE_READER_IDENTIFIER, v))
            .transpose()?;
        let key_identifier =
            find(&entries, TAG_KEY_IDENTIFIER).map(|v| fixed_len::<8>(TAG_KEY_IDENTIFIER, v)).transpose()?;
        Ok(ReaderKeyRequest { operation, reader_private_key, unique_reader_identifier, key_identifier })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderKeyResponse {
    pub status: OperationStatus,
    /// The reader group identifier, present on a successful `GET`.
    pub identifier: Option<[u8; 8]>,
}

impl ReaderKeyResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_tlv(TAG_STATUS, &[self.status.to_tag()], &mut out);
        if let Some(id) = self.identifier {
            encode_tlv(TAG_IDENTIFIER, &id, &mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TlvError> {
        let entries = parse_tlvs(bytes)?;
        let status = OperationStatus::from_tag(require(&entries, TAG_STATUS)?[0])?;
        let identifier = find(&entries, TAG_IDENTIFIER).map(|v| fixed_len::<8>(TAG_IDENTIFIER, v)).transpose()?;
        Ok(ReaderKeyResponse { status, identifier })
    }
}

/// `GET`/`ADD`/`REMOVE` against a single device credential (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentialRequest {
    pub operation: Operation,
    /// Names the owning issuer on `ADD`.
    pub issuer_key_identifier: Option<IssuerId>,
    /// The endpoint's raw (33-octet, compressed-point-tagged) public key on `ADD`;
    /// the engine prepends the `0x04` uncompressed-point tag itself.
    pub credential_public_key: Option<Vec<u8>>,
    pub key_type: Option<u8>,
}

impl DeviceCredentialRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_tlv(TAG_OPERATION, &[self.operation.to_tag()], &mut out);
        if let Some(id) = &self.issuer_key_identifier {
            encode_tlv(TAG_ISSUER_KEY_IDENTIFIER, &id.0, &mut out);
        }
        if let Some(key) = &self.credential_public_key {
            encode_tlv(TAG_CREDENTIAL_PUBLIC_KEY, key, &mut out);
        }
        if let Some(key_type) = self.key_type {
            encode_tlv(TAG_KEY_TYPE, &[key_type], &mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TlvError> {
        let entries = parse_tlvs(bytes)?;
        let operation = Operation::from_tag(require(&entries, TAG_OPERATION)?[0])?;
        let issuer_key_identifier = find(&entries, TAG_ISSUER_KEY_IDENTIFIER)
            .map(|v| fixed_len::<32>(TAG_ISSUER_KEY_IDENTIFIER, v))
            .transpose()?
            .map(IssuerId);
        let credential_public_key = find(&entries, TAG_CREDENTIAL_PUBLIC_KEY).map(|v| v.to_vec());
        let key_type = find(&entries, TAG_KEY_TYPE).map(|v| v[0]);
        Ok(DeviceCredentialRequest { operation, issuer_key_identifier, credential_public_key, key_type })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentialResponse {
    pub status: OperationStatus,
    pub issuer_key_identifier: Option<IssuerId>,
    pub endpoint_id: Option<[u8; 8]>,
}

impl DeviceCredentialResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_tlv(TAG_STATUS, &[self.status.to_tag()], &mut out);
        if let Some(id) = &self.issuer_key_identifier {
            encode_tlv(TAG_ISSUER_KEY_IDENTIFIER, &id.0, &mut out);
        }
        if let Some(id) = self.endpoint_id {
            encode_tlv(TAG_ENDPOINT_ID, &id, &mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TlvError> {
        let entries = parse_tlvs(bytes)?;
        let status = OperationStatus::from_tag(require(&entries, TAG_STATUS)?[0])?;
        let issuer_key_identifier = find(&entries, TAG_ISSUER_KEY_IDENTIFIER)
            .map(|v| fixed_len::<32>(TAG_ISSUER_KEY_IDENTIFIER, v))
            .transpose()?
            .map(IssuerId);
        let endpoint_id = find(&entries, TAG_ENDPOINT_ID).map(|v| fixed_len::<8>(TAG_ENDPOINT_ID, v)).transpose()?;
        Ok(DeviceCredentialResponse { status, issuer_key_identifier, endpoint_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_key_add_request_round_trips() {
        let request = ReaderKeyRequest {
            operation: Operation::Add,
            reader_private_key: Some([7u8; 32]),
            unique_reader_identifier: Some([1, 2, 3, 4, 5, 6, 7, 8]),
            key_identifier: None,
        };
        let decoded = ReaderKeyRequest::decode(&request.encode()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn reader_key_get_request_round_trips_without_optional_fields() {
        let request =
            ReaderKeyRequest { operation: Operation::Get, reader_private_key: None, unique_reader_identifier: None, key_identifier: None };
        let decoded = ReaderKeyRequest::decode(&request.encode()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn device_credential_response_round_trips_through_base64() {
        let response = DeviceCredentialResponse {
            status: OperationStatus::Duplicate,
            issuer_key_identifier: Some(IssuerId([3u8; 32])),
            endpoint_id: Some([4u8; 8]),
        };
        let wire = to_base64(&response.encode());
        let decoded = DeviceCredentialResponse::decode(&from_base64(&wire).unwrap()).unwrap();
        assert_eq!(response, decoded);
    }

    #[test]
    fn missing_required_tag_is_rejected() {
        let bytes = Vec::new();
        assert_eq!(ReaderKeyRequest::decode(&bytes), Err(TlvError::MissingTag(TAG_OPERATION)));
    }

    #[test]
    fn truncated_tlv_is_rejected() {
        assert_eq!(parse_tlvs(&[TAG_OPERATION, 0x05, 0x01]), Err(TlvError::LengthMismatch { declared: 5, remaining: 1 }));
    }
}
