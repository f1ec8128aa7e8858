//! The HomeKey transaction engine (spec.md §4.5): drives a single contactless
//! exchange from AID selection through to a finished FAST or STANDARD
//! authentication, persisting the resulting key-material mutation only once the
//! whole exchange has succeeded.
//!
//! A transport error at any point aborts the transaction without writing
//! anything back to the [`KeyMaterialStore`] — every mutation (persistent key
//! rotation, counter bump, `last_used_at`) is accumulated locally and flushed in
//! a single call once the device's final acknowledgement has been received.

use std::sync::Arc;

use homekey_common::config::DigitalKeyFlow;
use homekey_store::{Endpoint, EndpointId, Issuer, IssuerId, KeyMaterialStore};
use p256::ecdsa::SigningKey;
use p256::SecretKey;
use tracing::{debug, info};

use crate::apdu::{transceive_ok, CommandApdu, IsoDepTag, TransportError};
use crate::crypto::{self, CryptoError};

/// HomeKey applet AID used to select the credential applet on the device.
const HOMEKEY_AID: [u8; 8] = [0xA0, 0x00, 0x00, 0x08, 0x58, 0x01, 0x01, 0x00];

const INS_SELECT: u8 = 0xA4;
const INS_AUTH0: u8 = 0x80;
const INS_AUTH1: u8 = 0x81;
const INS_CONTROL_FLOW: u8 = 0x82;

const FLOW_TAG_FAST: u8 = 0x01;
const FLOW_TAG_STANDARD: u8 = 0x02;

const CRYPTOGRAM_LEN: usize = 16;
const SESSION_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("device requested an unsupported protocol version")]
    Version,
    #[error("signature verification failed")]
    Signature,
    #[error("endpoint counter did not advance monotonically")]
    Counter,
    #[error("more than one endpoint matched the FAST cryptogram")]
    Ambiguous,
    #[error("malformed APDU payload: {0}")]
    Framing(String),
    #[error("device is not enrolled with a known issuer")]
    NotAuthenticated,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] homekey_store::StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionFlow {
    Fast,
    Standard,
}

#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub flow: TransactionFlow,
    pub issuer_id: IssuerId,
    pub endpoint_id: EndpointId,
}

/// Seam for injecting a fixed ephemeral key pair in tests, so that a whole
/// transaction can be replayed deterministically against recorded APDUs.
pub trait EphemeralKeySource: Send + Sync {
    fn generate(&self) -> SecretKey;
}

pub struct OsRngEphemeralKeySource;

impl EphemeralKeySource for OsRngEphemeralKeySource {
    fn generate(&self) -> SecretKey {
        SecretKey::random(&mut p256::elliptic_curve::rand_core::OsRng)
    }
}

/// Always hands back the same key. Lets a test replay a transaction against
/// canned APDUs and assert on the exact bytes exchanged.
pub struct FixedEphemeralKeySource(pub SecretKey);

impl EphemeralKeySource for FixedEphemeralKeySource {
    fn generate(&self) -> SecretKey {
        self.0.clone()
    }
}

/// The reader's 16-octet identity as carried on the wire: the 8-octet group
/// identifier derived from the reader's long-term key, followed by the
/// reader's own 8-octet identifier (spec.md §4.5 step 2).
type ReaderIdentifierFull = [u8; 16];

fn reader_identifier_full(group_id: [u8; 8], reader_identifier: [u8; 8]) -> ReaderIdentifierFull {
    let mut full = [0u8; 16];
    full[..8].copy_from_slice(&group_id);
    full[8..].copy_from_slice(&reader_identifier);
    full
}

/// Identifies the reason for a transaction, folded into the FAST cryptogram
/// and AUTH0 payload so a replayed exchange cannot be repurposed for a
/// different action (spec.md §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCode {
    Unlock,
}

impl TransactionCode {
    fn to_byte(self) -> u8 {
        match self {
            TransactionCode::Unlock => 0x00,
        }
    }
}

pub struct Engine {
    store: Arc<dyn KeyMaterialStore>,
    ephemeral: Arc<dyn EphemeralKeySource>,
    preferred_flow: DigitalKeyFlow,
    transaction_code: TransactionCode,
}

impl Engine {
    pub fn new(store: Arc<dyn KeyMaterialStore>, preferred_flow: DigitalKeyFlow) -> Self {
        Engine {
            store,
            ephemeral: Arc::new(OsRngEphemeralKeySource),
            preferred_flow,
            transaction_code: TransactionCode::Unlock,
        }
    }

    pub fn with_ephemeral_key_source(mut self, source: Arc<dyn EphemeralKeySource>) -> Self {
        self.ephemeral = source;
        self
    }

    pub fn with_transaction_code(mut self, code: TransactionCode) -> Self {
        self.transaction_code = code;
        self
    }

    pub async fn run(&self, tag: &dyn IsoDepTag) -> Result<TransactionResult, ProtocolError> {
        transceive_ok(tag, &CommandApdu::new(0x00, INS_SELECT, 0x04, 0x00, HOMEKEY_AID.to_vec())).await?;

        let reader_key = self.store.get_reader_private_key().await;
        let reader_private_key = crypto::parse_private_key(&reader_key.0)?;
        let reader_identifier = reader_identifier_full(reader_key.group_identifier(), self.store.get_reader_identifier().await.0);

        let reader_ephemeral = self.ephemeral.generate();
        let reader_ephemeral_public = crypto::public_key_bytes(&reader_ephemeral.public_key());

        let mut auth0_payload = Vec::with_capacity(1 + reader_ephemeral_public.len() + reader_identifier.len() + 1);
        auth0_payload.push(match self.preferred_flow {
            DigitalKeyFlow::Fast => FLOW_TAG_FAST,
            DigitalKeyFlow::Standard => FLOW_TAG_STANDARD,
        });
        auth0_payload.extend_from_slice(&reader_ephemeral_public);
        auth0_payload.extend_from_slice(&reader_identifier);
        auth0_payload.push(self.transaction_code.to_byte());

        let auth0_response =
            transceive_ok(tag, &CommandApdu::new(0x80, INS_AUTH0, 0x00, 0x00, auth0_payload)).await?;
        let auth0 = Auth0Response::parse(&auth0_response)?;

        if auth0.flow_tag == FLOW_TAG_FAST {
            if let Some(result) = self.try_fast_flow(tag, &reader_ephemeral, &reader_identifier, &auth0).await? {
                return Ok(result);
            }
            debug!("no endpoint matched the FAST cryptogram, falling back to STANDARD");
        }

        self.standard_flow(tag, &reader_ephemeral, &reader_private_key, &reader_identifier, &auth0).await
    }

    async fn try_fast_flow(
        &self,
        tag: &dyn IsoDepTag,
        reader_ephemeral: &SecretKey,
        reader_identifier: &ReaderIdentifierFull,
        auth0: &Auth0Response,
    ) -> Result<Option<TransactionResult>, ProtocolError> {
        let endpoints = self.store.get_all_endpoints().await;
        let salt = fast_salt(reader_ephemeral, &auth0.device_ephemeral_public, reader_identifier, self.transaction_code);

        let mut matches = Vec::new();
        for endpoint in endpoints {
            let candidate = crypto::hkdf_sha256(&salt, &endpoint.persistent_key, b"homekey-fast-cryptogram", CRYPTOGRAM_LEN)?;
            if crypto::constant_time_eq(&candidate, &auth0.cryptogram) {
                matches.push(endpoint);
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => {
                let endpoint = matches.into_iter().next().expect("checked len == 1");
                let issuer = self
                    .store
                    .get_issuer_by_endpoint(endpoint.id)
                    .await
                    .ok_or(ProtocolError::NotAuthenticated)?;
                let result = self.finish_fast(tag, reader_ephemeral, reader_identifier, auth0, issuer.id, endpoint).await?;
                Ok(Some(result))
            }
            _ => Err(ProtocolError::Ambiguous),
        }
    }

    async fn finish_fast(
        &self,
        tag: &dyn IsoDepTag,
        reader_ephemeral: &SecretKey,
        reader_identifier: &ReaderIdentifierFull,
        auth0: &Auth0Response,
        issuer_id: IssuerId,
        mut endpoint: Endpoint,
    ) -> Result<TransactionResult, ProtocolError> {
        let salt = fast_salt(reader_ephemeral, &auth0.device_ephemeral_public, reader_identifier, self.transaction_code);
        let session_key = crypto::hkdf_sha256(&salt, &endpoint.persistent_key, b"homekey-fast-session", SESSION_KEY_LEN)?;

        let control_flow_response = self.control_flow_exchange(tag, &session_key).await?;
        apply_control_flow(&mut endpoint, &control_flow_response)?;

        self.store.upsert_endpoint(issuer_id, endpoint.clone()).await?;
        info!(?issuer_id, endpoint_id = ?endpoint.id, "FAST transaction complete");

        Ok(TransactionResult { flow: TransactionFlow::Fast, issuer_id, endpoint_id: endpoint.id })
    }

    async fn standard_flow(
        &self,
        tag: &dyn IsoDepTag,
        reader_ephemeral: &SecretKey,
        reader_private_key: &SecretKey,
        reader_identifier: &ReaderIdentifierFull,
        auth0: &Auth0Response,
    ) -> Result<TransactionResult, ProtocolError> {
        let device_ephemeral_public = crypto::parse_public_key(&auth0.device_ephemeral_public)?;
        let shared_secret = crypto::ecdh_shared_secret(reader_private_key, &device_ephemeral_public);

        let transcript = transcript_for(reader_ephemeral, &auth0.device_ephemeral_public, reader_identifier);
        let session_key = crypto::hkdf_sha256(&transcript, &shared_secret, b"homekey-standard-session", SESSION_KEY_LEN)?;

        let reader_signing_key =
            SigningKey::from_slice(&reader_private_key.to_bytes()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let reader_signature = crypto::sign(&reader_signing_key, &transcript);

        let auth1_response = transceive_ok(
            tag,
            &CommandApdu::new(0x80, INS_AUTH1, 0x00, 0x00, reader_signature.to_bytes().to_vec()),
        )
        .await?;
        let auth1 = Auth1Response::parse(&auth1_response)?;

        let mut issuer = self
            .store
            .get_issuer_by_public_key(&auth1.issuer_public_key)
            .await
            .ok_or(ProtocolError::NotAuthenticated)?;
        let issuer_id = issuer.id;

        let issuer_verifying_key = crypto::parse_verifying_key(&issuer.public_key)?;
        crypto::verify(&issuer_verifying_key, &transcript, &auth1.signature).map_err(|_| ProtocolError::Signature)?;

        let (endpoint_index, mut endpoint) = match issuer.endpoints.iter().position(|e| e.public_key == auth1.endpoint_public_key) {
            Some(index) => (Some(index), issuer.endpoints[index].clone()),
            None => {
                let id = EndpointId::derive(&auth1.endpoint_public_key);
                (None, Endpoint {
                    id,
                    public_key: auth1.endpoint_public_key.clone(),
                    persistent_key: [0u8; 32],
                    counter: 0,
                    last_used_at: 0,
                    key_type: auth1.key_type,
                    enrollments: Default::default(),
                })
            }
        };

        let control_flow_response = self.control_flow_exchange(tag, &session_key).await?;
        apply_control_flow(&mut endpoint, &control_flow_response)?;

        match endpoint_index {
            Some(index) => issuer.endpoints[index] = endpoint.clone(),
            None => issuer.endpoints.push(endpoint.clone()),
        }

        self.store.upsert_issuer(issuer).await?;
        info!(?issuer_id, endpoint_id = ?endpoint.id, "STANDARD transaction complete");

        Ok(TransactionResult { flow: TransactionFlow::Standard, issuer_id, endpoint_id: endpoint.id })
    }

    async fn control_flow_exchange(&self, tag: &dyn IsoDepTag, session_key: &[u8]) -> Result<ControlFlowResponse, ProtocolError> {
        let response = transceive_ok(tag, &CommandApdu::new(0x80, INS_CONTROL_FLOW, 0x00, 0x00, vec![])).await?;
        ControlFlowResponse::parse(&response, session_key)
    }
}

fn fast_salt(
    reader_ephemeral: &SecretKey,
    device_ephemeral_public: &[u8],
    reader_identifier: &ReaderIdentifierFull,
    transaction_code: TransactionCode,
) -> Vec<u8> {
    let mut salt = crypto::public_key_bytes(&reader_ephemeral.public_key());
    salt.extend_from_slice(device_ephemeral_public);
    salt.extend_from_slice(reader_identifier);
    salt.push(transaction_code.to_byte());
    salt
}

fn transcript_for(reader_ephemeral: &SecretKey, device_ephemeral_public: &[u8], reader_identifier: &ReaderIdentifierFull) -> Vec<u8> {
    let mut transcript = crypto::public_key_bytes(&reader_ephemeral.public_key());
    transcript.extend_from_slice(device_ephemeral_public);
    transcript.extend_from_slice(reader_identifier);
    transcript
}

fn apply_control_flow(endpoint: &mut Endpoint, response: &ControlFlowResponse) -> Result<(), ProtocolError> {
    if response.counter <= endpoint.counter && endpoint.counter != 0 {
        return Err(ProtocolError::Counter);
    }
    endpoint.persistent_key = response.rotated_persistent_key;
    endpoint.counter = response.counter;
    endpoint.last_used_at = response.last_used_at;
    Ok(())
}

struct Auth0Response {
    flow_tag: u8,
    device_ephemeral_public: Vec<u8>,
    cryptogram: Vec<u8>,
}

impl Auth0Response {
    fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 1 + 65 + CRYPTOGRAM_LEN {
            return Err(ProtocolError::Framing("AUTH0 response too short".into()));
        }
        let flow_tag = bytes[0];
        let device_ephemeral_public = bytes[1..66].to_vec();
        let cryptogram = bytes[66..66 + CRYPTOGRAM_LEN].to_vec();
        Ok(Auth0Response { flow_tag, device_ephemeral_public, cryptogram })
    }
}

struct Auth1Response {
    issuer_public_key: Vec<u8>,
    endpoint_public_key: Vec<u8>,
    key_type: u8,
    signature: Vec<u8>,
}

impl Auth1Response {
    fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 65 + 65 + 1 {
            return Err(ProtocolError::Framing("AUTH1 response too short".into()));
        }
        let issuer_public_key = bytes[0..65].to_vec();
        let endpoint_public_key = bytes[65..130].to_vec();
        let key_type = bytes[130];
        let signature = bytes[131..].to_vec();
        Ok(Auth1Response { issuer_public_key, endpoint_public_key, key_type, signature })
    }
}

const CONTROL_FLOW_MAC_LEN: usize = 32;

struct ControlFlowResponse {
    rotated_persistent_key: [u8; 32],
    counter: u32,
    last_used_at: i64,
}

impl ControlFlowResponse {
    /// Layout: `rotated_persistent_key(32) || counter(4, BE) || last_used_at(8, BE)
    /// || mac(32)`, where `mac` authenticates the preceding fields under the
    /// session key established for this transaction.
    fn parse(bytes: &[u8], session_key: &[u8]) -> Result<Self, ProtocolError> {
        let body_len = 32 + 4 + 8;
        if bytes.len() < body_len + CONTROL_FLOW_MAC_LEN {
            return Err(ProtocolError::Framing("control flow response too short".into()));
        }

        let (body, mac) = bytes.split_at(body_len);
        let mac = &mac[..CONTROL_FLOW_MAC_LEN];

        let expected_mac = ring::hmac::sign(&ring::hmac::Key::new(ring::hmac::HMAC_SHA256, session_key), body);
        if !crypto::constant_time_eq(expected_mac.as_ref(), mac) {
            return Err(ProtocolError::Signature);
        }

        let rotated_persistent_key: [u8; 32] = body[0..32].try_into().expect("checked length above");
        let counter = u32::from_be_bytes(body[32..36].try_into().expect("checked length above"));
        let last_used_at = i64::from_be_bytes(body[36..44].try_into().expect("checked length above"));

        Ok(ControlFlowResponse { rotated_persistent_key, counter, last_used_at })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use homekey_store::FileStore;
    use homekey_store::ReaderKey;

    use super::*;

    /// Plays the device side of a FAST transaction against canned key material,
    /// one response per call in the fixed SELECT / AUTH0 / CONTROL_FLOW order.
    struct MockTag {
        reader_ephemeral_public: StdMutex<Option<Vec<u8>>>,
        reader_identifier: StdMutex<Option<Vec<u8>>>,
        device_ephemeral: SecretKey,
        persistent_key: [u8; 32],
        rotated_persistent_key: [u8; 32],
        counter: u32,
        last_used_at: i64,
        call: StdMutex<u8>,
    }

    #[async_trait::async_trait]
    impl IsoDepTag for MockTag {
        async fn transceive(&self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
            let mut call = self.call.lock().unwrap();
            *call += 1;
            match *call {
                1 => Ok(vec![0x90, 0x00]),
                2 => {
                    let lc = command[4] as usize;
                    let data = &command[5..5 + lc];
                    let reader_ephemeral_public = data[1..66].to_vec();
                    let reader_identifier = data[66..82].to_vec();
                    let transaction_code = data[82];
                    *self.reader_ephemeral_public.lock().unwrap() = Some(reader_ephemeral_public.clone());
                    *self.reader_identifier.lock().unwrap() = Some(reader_identifier.clone());

                    let device_ephemeral_public = crypto::public_key_bytes(&self.device_ephemeral.public_key());
                    let mut salt = reader_ephemeral_public;
                    salt.extend_from_slice(&device_ephemeral_public);
                    salt.extend_from_slice(&reader_identifier);
                    salt.push(transaction_code);
                    let cryptogram =
                        crypto::hkdf_sha256(&salt, &self.persistent_key, b"homekey-fast-cryptogram", CRYPTOGRAM_LEN).unwrap();

                    let mut response = vec![FLOW_TAG_FAST];
                    response.extend_from_slice(&device_ephemeral_public);
                    response.extend_from_slice(&cryptogram);
                    response.extend_from_slice(&[0x90, 0x00]);
                    Ok(response)
                }
                3 => {
                    let reader_ephemeral_public = self.reader_ephemeral_public.lock().unwrap().clone().unwrap();
                    let reader_identifier = self.reader_identifier.lock().unwrap().clone().unwrap();
                    let device_ephemeral_public = crypto::public_key_bytes(&self.device_ephemeral.public_key());
                    let mut salt = reader_ephemeral_public;
                    salt.extend_from_slice(&device_ephemeral_public);
                    salt.extend_from_slice(&reader_identifier);
                    salt.push(TransactionCode::Unlock.to_byte());
                    let session_key =
                        crypto::hkdf_sha256(&salt, &self.persistent_key, b"homekey-fast-session", SESSION_KEY_LEN).unwrap();

                    let mut body = Vec::new();
                    body.extend_from_slice(&self.rotated_persistent_key);
                    body.extend_from_slice(&self.counter.to_be_bytes());
                    body.extend_from_slice(&self.last_used_at.to_be_bytes());
                    let mac = ring::hmac::sign(&ring::hmac::Key::new(ring::hmac::HMAC_SHA256, &session_key), &body);

                    let mut response = body;
                    response.extend_from_slice(mac.as_ref());
                    response.extend_from_slice(&[0x90, 0x00]);
                    Ok(response)
                }
                other => panic!("unexpected transceive call {other}"),
            }
        }
    }

    #[tokio::test]
    async fn fast_flow_completes_and_persists_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();

        let persistent_key = [0x11u8; 32];
        let endpoint_public_key = vec![0x04; 65];
        let endpoint_id = EndpointId::derive(&endpoint_public_key);
        let issuer_id = IssuerId([0x22u8; 32]);

        let mut issuer = Issuer::new(issuer_id, vec![0x04; 65]);
        issuer.endpoints.push(Endpoint {
            id: endpoint_id,
            public_key: endpoint_public_key,
            persistent_key,
            counter: 0,
            last_used_at: 0,
            key_type: 0,
            enrollments: Default::default(),
        });
        store.upsert_issuer(issuer).await.unwrap();
        store.set_reader_private_key(ReaderKey([0x05u8; 32])).await.unwrap();

        let reader_ephemeral = SecretKey::from_slice(&[0x01u8; 32]).unwrap();
        let device_ephemeral = SecretKey::from_slice(&[0x02u8; 32]).unwrap();

        let tag = MockTag {
            reader_ephemeral_public: StdMutex::new(None),
            reader_identifier: StdMutex::new(None),
            device_ephemeral,
            persistent_key,
            rotated_persistent_key: [0x33u8; 32],
            counter: 1,
            last_used_at: 42,
            call: StdMutex::new(0),
        };

        let engine = Engine::new(store.clone(), DigitalKeyFlow::Fast)
            .with_ephemeral_key_source(Arc::new(FixedEphemeralKeySource(reader_ephemeral)));

        let result = engine.run(&tag).await.unwrap();

        assert_eq!(result.flow, TransactionFlow::Fast);
        assert_eq!(result.issuer_id, issuer_id);
        assert_eq!(result.endpoint_id, endpoint_id);

        let updated = store.get_endpoint_by_id(endpoint_id).await.unwrap();
        assert_eq!(updated.persistent_key, [0x33u8; 32]);
        assert_eq!(updated.counter, 1);
        assert_eq!(updated.last_used_at, 42);
    }

    #[tokio::test]
    async fn fast_flow_with_no_enrolled_endpoints_falls_through_to_standard_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
        store.set_reader_private_key(ReaderKey([0x05u8; 32])).await.unwrap();

        let reader_ephemeral = SecretKey::from_slice(&[0x01u8; 32]).unwrap();
        let device_ephemeral = SecretKey::from_slice(&[0x02u8; 32]).unwrap();

        let tag = MockTag {
            reader_ephemeral_public: StdMutex::new(None),
            reader_identifier: StdMutex::new(None),
            device_ephemeral,
            persistent_key: [0x99u8; 32],
            rotated_persistent_key: [0u8; 32],
            counter: 1,
            last_used_at: 0,
            call: StdMutex::new(0),
        };

        let engine = Engine::new(store, DigitalKeyFlow::Fast)
            .with_ephemeral_key_source(Arc::new(FixedEphemeralKeySource(reader_ephemeral)));

        // No endpoints are enrolled, so FAST never matches and the engine falls
        // through to STANDARD, which this mock does not implement past AUTH0.
        assert!(engine.run(&tag).await.is_err());
    }
}
