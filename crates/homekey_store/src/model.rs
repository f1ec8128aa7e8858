//! The persistent key-material data model (reader key, issuers, endpoints).
//!
//! See `spec.md` §3 for the authoritative field list and invariants.

use chrono::DateTime;
use chrono::Utc;
use ring::digest;
use serde::Deserialize;
use serde::Serialize;
use serde_with::base64::Base64;
use serde_with::hex::Hex;
use serde_with::serde_as;

pub const READER_KEY_LEN: usize = 32;
pub const READER_IDENTIFIER_LEN: usize = 8;
pub const GROUP_IDENTIFIER_LEN: usize = 8;
pub const ISSUER_ID_LEN: usize = 32;
pub const PERSISTENT_KEY_LEN: usize = 32;

/// The reader's long-term secp256r1 private key. All-zero means "unconfigured".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReaderKey(#[serde(with = "hex_array_32")] pub [u8; READER_KEY_LEN]);

impl ReaderKey {
    pub const ZERO: ReaderKey = ReaderKey([0u8; READER_KEY_LEN]);

    pub fn is_configured(&self) -> bool {
        self.0 != [0u8; READER_KEY_LEN]
    }

    /// The 8-octet reader group identifier: the first 8 octets of
    /// `SHA-256("key-identifier" || reader_private_key)`. Pure function of the key,
    /// never persisted (spec.md §3).
    pub fn group_identifier(&self) -> [u8; GROUP_IDENTIFIER_LEN] {
        let mut input = Vec::with_capacity(b"key-identifier".len() + READER_KEY_LEN);
        input.extend_from_slice(b"key-identifier");
        input.extend_from_slice(&self.0);
        let digest = digest::digest(&digest::SHA256, &input);
        let mut out = [0u8; GROUP_IDENTIFIER_LEN];
        out.copy_from_slice(&digest.as_ref()[..GROUP_IDENTIFIER_LEN]);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReaderIdentifier(#[serde(with = "hex_array_8")] pub [u8; READER_IDENTIFIER_LEN]);

impl ReaderIdentifier {
    pub const ZERO: ReaderIdentifier = ReaderIdentifier([0u8; READER_IDENTIFIER_LEN]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuerId(#[serde(with = "hex_array_32")] pub [u8; ISSUER_ID_LEN]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(#[serde(with = "hex_array_8")] pub [u8; 8]);

impl EndpointId {
    /// Derived from the endpoint's public key: the first 8 octets of
    /// `SHA-256(public_key)`. Used purely as a lookup handle (spec.md §3).
    pub fn derive(public_key: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, public_key);
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest.as_ref()[..8]);
        EndpointId(out)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub id: IssuerId,
    #[serde_as(as = "Hex")]
    pub public_key: Vec<u8>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl Issuer {
    pub fn new(id: IssuerId, public_key: Vec<u8>) -> Self {
        Issuer { id, public_key, endpoints: Vec::new() }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    #[serde_as(as = "Hex")]
    pub public_key: Vec<u8>,
    #[serde_as(as = "Hex")]
    pub persistent_key: [u8; PERSISTENT_KEY_LEN],
    pub counter: u32,
    pub last_used_at: i64,
    pub key_type: u8,
    #[serde(default)]
    pub enrollments: Enrollments,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollments {
    pub hap: Option<Enrollment>,
    pub attestation: Option<Enrollment>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub at: i64,
    #[serde_as(as = "Base64")]
    pub payload: Vec<u8>,
}

impl Enrollment {
    pub fn now(payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Enrollment { at: now.timestamp(), payload }
    }
}

/// The full persisted document: `{ reader_private_key, reader_identifier, issuers }`
/// (spec.md §6). `issuers` is serialized as a map keyed by hex issuer id to match the
/// wire format the REST oracle and file store both use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default = "zero_reader_key", with = "hex_array_32")]
    pub reader_private_key: [u8; READER_KEY_LEN],
    #[serde(default, with = "hex_array_8")]
    pub reader_identifier: [u8; READER_IDENTIFIER_LEN],
    #[serde(default)]
    pub issuers: std::collections::BTreeMap<String, Issuer>,
}

fn zero_reader_key() -> [u8; READER_KEY_LEN] {
    [0u8; READER_KEY_LEN]
}

impl StoreSnapshot {
    pub fn reader_key(&self) -> ReaderKey {
        ReaderKey(self.reader_private_key)
    }

    pub fn reader_identifier(&self) -> ReaderIdentifier {
        ReaderIdentifier(self.reader_identifier)
    }

    pub fn issuer_list(&self) -> Vec<Issuer> {
        self.issuers.values().cloned().collect()
    }

    pub fn from_parts(reader_key: ReaderKey, reader_identifier: ReaderIdentifier, issuers: Vec<Issuer>) -> Self {
        StoreSnapshot {
            reader_private_key: reader_key.0,
            reader_identifier: reader_identifier.0,
            issuers: issuers.into_iter().map(|i| (hex::encode(i.id.0), i)).collect(),
        }
    }
}

mod hex_array_32 {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

mod hex_array_8 {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8; 8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 8], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 8 bytes"))
    }
}
