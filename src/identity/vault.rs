//! In-memory holder of the decrypted signing key.
//!
//! The vault is the only place a clear private key lives. It is passed by
//! reference to anything that signs; nothing reads key material from ambient
//! state. Dropping or locking the vault wipes the key.

use crate::crypto::{EncryptedToken, IdentityKey, IdentityPublicKey, IdentitySignature, Password};
use crate::error::{NomadError, Result};
use tracing::debug;

/// Session-scoped owner of the decrypted identity key.
#[derive(Debug, Default)]
pub struct IdentityVault {
    key: Option<IdentityKey>,
}

impl IdentityVault {
    /// Creates a locked vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decrypts `token` with `password` and loads the key.
    ///
    /// A wrong password or corrupt token fails with `Decryption` and leaves the
    /// vault exactly as it was.
    pub fn unlock(&mut self, token: &str, password: &Password) -> Result<IdentityPublicKey> {
        let key = decrypt_token(token, password)?;
        let public_key = key.public_key();
        self.key = Some(key);
        debug!(public_key = %public_key.to_hex(), "identity vault unlocked");
        Ok(public_key)
    }

    /// Loads an already-decrypted key, replacing any loaded one.
    pub fn load(&mut self, key: IdentityKey) -> IdentityPublicKey {
        let public_key = key.public_key();
        self.key = Some(key);
        public_key
    }

    /// Discards the in-memory key. Idempotent.
    pub fn lock(&mut self) {
        if self.key.take().is_some() {
            debug!("identity vault locked");
        }
    }

    /// True iff a key is currently loaded.
    pub fn is_usable(&self) -> bool {
        self.key.is_some()
    }

    /// Public key of the loaded identity.
    pub fn public_key(&self) -> Option<IdentityPublicKey> {
        self.key.as_ref().map(IdentityKey::public_key)
    }

    /// Signs `payload` with the loaded key.
    pub fn sign(&self, payload: &[u8]) -> Result<IdentitySignature> {
        self.key
            .as_ref()
            .map(|key| key.sign(payload))
            .ok_or(NomadError::NoSigningKey)
    }
}

/// Encrypts `key` under `password`, returning the token string to persist.
pub(crate) fn encrypt_key(key: &IdentityKey, password: &Password) -> Result<String> {
    let secret = key.secret_bytes();
    EncryptedToken::encrypt(&secret[..], password)?.to_token_string()
}

/// Deterministically decrypts a token string into an identity key.
pub(crate) fn decrypt_token(token: &str, password: &Password) -> Result<IdentityKey> {
    let secret = EncryptedToken::from_token_string(token)?.decrypt(password)?;
    IdentityKey::from_bytes(&secret)
        .map_err(|_| NomadError::decryption("Token does not contain a valid identity key"))
}
