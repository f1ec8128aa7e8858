//! Cryptographic primitives shared by the HomeKey transaction engine: HKDF-SHA256
//! key derivation, secp256r1 ECDH, and ECDSA sign/verify. All operations here are
//! built on `ring` and `p256`, which perform their secret-dependent arithmetic in
//! constant time (spec.md §4.5, "All cryptographic primitives are constant-time
//! for secret-dependent inputs").

use p256::ecdsa::signature::Signer;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::Signature;
use p256::ecdsa::SigningKey;
use p256::ecdsa::VerifyingKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use p256::SecretKey;
use ring::hkdf;
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid secp256r1 public key")]
    InvalidPublicKey,
    #[error("invalid secp256r1 private key")]
    InvalidPrivateKey,
    #[error("ECDH key agreement failed")]
    Ecdh,
    #[error("HKDF expansion failed")]
    Hkdf,
    #[error("signature verification failed")]
    SignatureVerification,
    #[error("invalid signature encoding")]
    InvalidSignature,
}

struct OutputLen(usize);

impl hkdf::KeyType for OutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-SHA256 as used throughout the HomeKey flows: `salt` is typically the
/// concatenation of the two ephemeral/static public keys, `ikm` the shared secret
/// or persistent key, `info` a flow-specific constant string.
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>, CryptoError> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt);
    let prk = salt.extract(ikm);
    let okm = prk.expand(&[info], OutputLen(out_len)).map_err(|_| CryptoError::Hkdf)?;
    let mut out = vec![0u8; out_len];
    okm.fill(&mut out).map_err(|_| CryptoError::Hkdf)?;
    Ok(out)
}

pub fn parse_public_key(uncompressed: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(uncompressed).map_err(|_| CryptoError::InvalidPublicKey)
}

pub fn parse_verifying_key(uncompressed: &[u8]) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_sec1_bytes(uncompressed).map_err(|_| CryptoError::InvalidPublicKey)
}

pub fn parse_private_key(scalar: &[u8; 32]) -> Result<SecretKey, CryptoError> {
    SecretKey::from_slice(scalar).map_err(|_| CryptoError::InvalidPrivateKey)
}

pub fn public_key_bytes(public: &PublicKey) -> Vec<u8> {
    public.to_encoded_point(false).as_bytes().to_vec()
}

/// The raw x-coordinate of `private * public`, as used as HKDF input keying
/// material throughout the STANDARD flow (spec.md §4.5).
pub fn ecdh_shared_secret(private: &SecretKey, public: &PublicKey) -> Vec<u8> {
    let shared = p256::ecdh::diffie_hellman(private.to_nonzero_scalar(), public.as_affine());
    shared.raw_secret_bytes().to_vec()
}

pub fn sign(signing_key: &SigningKey, message: &[u8]) -> Signature {
    signing_key.sign(message)
}

pub fn verify(verifying_key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key.verify(message, &signature).map_err(|_| CryptoError::SignatureVerification)
}

/// Constant-time equality, used for comparing cryptograms and MACs so that
/// endpoint lookup does not leak timing information about secret key material.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn hkdf_is_deterministic() {
        let out1 = hkdf_sha256(b"salt", b"ikm", b"info", 32).unwrap();
        let out2 = hkdf_sha256(b"salt", b"ikm", b"info", 32).unwrap();
        assert_eq!(out1, out2);
        assert_eq!(out1.len(), 32);
    }

    #[test]
    fn hkdf_differs_by_info_string() {
        let a = hkdf_sha256(b"salt", b"ikm", b"a", 32).unwrap();
        let b = hkdf_sha256(b"salt", b"ikm", b"b", 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ecdh_is_symmetric() {
        let alice = SecretKey::random(&mut OsRng);
        let bob = SecretKey::random(&mut OsRng);

        let shared_a = ecdh_shared_secret(&alice, &bob.public_key());
        let shared_b = ecdh_shared_secret(&bob, &alice.public_key());

        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        let signature = sign(&signing_key, b"transcript");

        verify(&verifying_key, b"transcript", signature.to_bytes().as_slice()).unwrap();
        assert!(verify(&verifying_key, b"tampered", signature.to_bytes().as_slice()).is_err());
    }
}
