//! Cryptographic primitives for nomad identities.
//!
//! - **Ed25519**: identity signing keys ([`IdentityKey`])
//! - **Argon2id + AES-256-GCM**: password-protected identity tokens ([`EncryptedToken`])
//! - **SHA3-256**: content addressing of append records

use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;

pub mod password;
pub mod signer;

pub use password::{EncryptedToken, Password};
pub use signer::{IdentityKey, IdentityPublicKey, IdentitySignature};

/// Hashes several byte strings with a domain tag, each part length-prefixed.
pub fn hash_parts(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update((domain.len() as u64).to_be_bytes());
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Constant-time comparison of two byte strings.
pub fn bytes_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
