//! Ed25519 identity keys and signatures.
//!
//! Sealed hashes handed out by the relayer are signed exactly as received:
//! the bytes are never re-hashed or reinterpreted before signing.

use crate::error::{NomadError, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// Length of an Ed25519 secret key in bytes.
pub const SECRET_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Private signing key of an identity.
///
/// The inner key is zeroized when dropped.
pub struct IdentityKey {
    inner: SigningKey,
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("public_key", &self.public_key().to_hex())
            .finish()
    }
}

impl IdentityKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a key from raw secret bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let secret: [u8; SECRET_KEY_LEN] = bytes.try_into().map_err(|_| {
            NomadError::crypto(format!(
                "Invalid private key length: expected {}, got {}",
                SECRET_KEY_LEN,
                bytes.len()
            ))
        })?;
        let secret = Zeroizing::new(secret);
        Ok(Self {
            inner: SigningKey::from_bytes(&secret),
        })
    }

    /// Builds a key from a hex-encoded secret.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(hex_key.trim())
                .map_err(|e| NomadError::invalid_input(format!("Private key is not hex: {}", e)))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Returns a copy of the secret bytes, wiped when the wrapper drops.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        Zeroizing::new(self.inner.to_bytes())
    }

    /// Returns the public half of this key.
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.inner.verifying_key())
    }

    /// Signs an opaque payload. Ed25519 signing is deterministic.
    pub fn sign(&self, payload: &[u8]) -> IdentitySignature {
        IdentitySignature(self.inner.sign(payload).to_bytes())
    }
}

/// Public key used by the relayer to authorize appends.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Parses a hex-encoded public key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| NomadError::invalid_input(format!("Public key is not hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| NomadError::crypto("Public key must be 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| NomadError::crypto(format!("Invalid public key: {}", e)))
    }

    /// Hex encoding of the key bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Verifies `signature` over `payload`.
    pub fn verify(&self, payload: &[u8], signature: &IdentitySignature) -> Result<()> {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.0
            .verify(payload, &sig)
            .map_err(|_| NomadError::crypto("Signature verification failed"))
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", self.to_hex())
    }
}

/// A detached Ed25519 signature, hex-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentitySignature([u8; SIGNATURE_LEN]);

impl IdentitySignature {
    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    /// Hex encoding of the signature.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded signature.
    pub fn from_hex(hex_sig: &str) -> Result<Self> {
        let bytes = hex::decode(hex_sig.trim())
            .map_err(|e| NomadError::invalid_input(format!("Signature is not hex: {}", e)))?;
        let bytes: [u8; SIGNATURE_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| NomadError::crypto("Signature must be 64 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for IdentitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentitySignature({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for IdentitySignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IdentitySignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_is_deterministic_and_verifies() {
        let key = IdentityKey::generate();
        let payload = b"sealed-hash-bytes";

        let first = key.sign(payload);
        let second = key.sign(payload);

        assert_eq!(first, second);
        assert!(key.public_key().verify(payload, &first).is_ok());
        assert!(key.public_key().verify(payload, &second).is_ok());
    }

    #[test]
    fn test_signature_over_other_payload_fails() {
        let key = IdentityKey::generate();
        let sig = key.sign(b"one");
        assert!(key.public_key().verify(b"two", &sig).is_err());
    }

    #[test]
    fn test_key_hex_roundtrip_keeps_public_key() {
        let key = IdentityKey::generate();
        let restored = IdentityKey::from_hex(&hex::encode(*key.secret_bytes())).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(IdentityKey::from_bytes(&[0u8; 31]).is_err());
        assert!(IdentityKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_signature_serializes_as_hex() {
        let key = IdentityKey::generate();
        let sig = key.sign(b"payload");
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json, format!("\"{}\"", sig.to_hex()));
        let back: IdentitySignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
