//! Password-based identity token protection using Argon2 and AES-GCM.
//!
//! The private key of an identity is only ever persisted in this encrypted
//! form. The token string stored locally is `base64(bincode(EncryptedToken))`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::{error::NomadError, Result};

/// Salt size for Argon2 (128 bits)
const SALT_SIZE: usize = 16;

/// AES-GCM nonce size
const NONCE_SIZE: usize = 12;

/// Parameters for Argon2id password hashing
const ARGON2_PARAMS: argon2::Params = match argon2::Params::new(
    19 * 1024, // 19 MiB memory cost
    2,         // 2 iterations
    1,         // 1 thread (single-threaded)
    Some(32),  // 32-byte output length
) {
    Ok(params) => params,
    Err(_) => panic!("Invalid Argon2 parameters"),
};

/// Password-encrypted private key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedToken {
    /// Argon2 salt for password derivation
    salt: [u8; SALT_SIZE],
    /// AES-GCM nonce
    nonce: [u8; NONCE_SIZE],
    /// Encrypted key bytes (includes the AES-GCM authentication tag)
    ciphertext: Vec<u8>,
}

/// Password for token encryption/decryption
#[derive(Clone)]
pub struct Password(String);

impl Password {
    /// Create a new password from a string
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The clear password, for forwarding to an auth relayer
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if password is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl EncryptedToken {
    /// Encrypt key material with a password
    pub fn encrypt(secret: &[u8], password: &Password) -> Result<Self> {
        if password.is_empty() {
            return Err(NomadError::invalid_input("Password cannot be empty"));
        }

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let derived_key = derive_key_from_password(password, &salt)?;
        let cipher = Aes256Gcm::new(&derived_key);
        let nonce = Aes256Gcm::generate_nonce(&mut AeadRng);

        let ciphertext = cipher
            .encrypt(&nonce, secret)
            .map_err(|e| NomadError::crypto(format!("Failed to encrypt identity key: {}", e)))?;

        Ok(Self {
            salt,
            nonce: nonce.into(),
            ciphertext,
        })
    }

    /// Decrypt key material with a password.
    ///
    /// A wrong password always fails here: the GCM tag check rejects it before
    /// any plaintext is produced.
    pub fn decrypt(&self, password: &Password) -> Result<Zeroizing<Vec<u8>>> {
        if password.is_empty() {
            return Err(NomadError::decryption("Password cannot be empty"));
        }

        let derived_key = derive_key_from_password(password, &self.salt)?;
        let cipher = Aes256Gcm::new(&derived_key);
        let nonce = Nonce::from_slice(&self.nonce);

        let plaintext = cipher
            .decrypt(nonce, self.ciphertext.as_ref())
            .map_err(|_| NomadError::decryption("Cannot decrypt token (wrong password?)"))?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Encodes this token as the string persisted under `nomad_token`.
    pub fn to_token_string(&self) -> Result<String> {
        let bytes = bincode::serialize(self)
            .map_err(|e| NomadError::serialization(format!("Failed to encode token: {}", e)))?;
        Ok(STANDARD.encode(bytes))
    }

    /// Parses a persisted token string. Malformed tokens are decryption failures.
    pub fn from_token_string(token: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(token.trim())
            .map_err(|e| NomadError::decryption(format!("Corrupt token encoding: {}", e)))?;
        bincode::deserialize(&bytes)
            .map_err(|e| NomadError::decryption(format!("Corrupt token payload: {}", e)))
    }
}

/// Derive a 256-bit key from password using Argon2id
fn derive_key_from_password(password: &Password, salt: &[u8; SALT_SIZE]) -> Result<Key<Aes256Gcm>> {
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        ARGON2_PARAMS,
    );

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| NomadError::crypto(format!("Password hashing failed: {}", e)))?;

    Ok(*Key::<Aes256Gcm>::from_slice(&key[..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_encryption_decryption() {
        let password = Password::new("test_password_123!");
        let secret = b"secret identity key bytes";

        let encrypted = EncryptedToken::encrypt(secret, &password).expect("Encryption should succeed");
        let decrypted = encrypted.decrypt(&password).expect("Decryption should succeed");

        assert_eq!(decrypted.as_slice(), secret);
    }

    #[test]
    fn test_wrong_password_fails() {
        let password = Password::new("correct_password");
        let wrong_password = Password::new("wrong_password");

        let encrypted = EncryptedToken::encrypt(b"secret data", &password).unwrap();
        let result = encrypted.decrypt(&wrong_password);

        assert!(matches!(result, Err(NomadError::Decryption(_))));
    }

    #[test]
    fn test_empty_password_fails() {
        let result = EncryptedToken::encrypt(b"secret data", &Password::new(""));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Password cannot be empty"));
    }

    #[test]
    fn test_token_string_survives_persistence() {
        let password = Password::new("pw");
        let encrypted = EncryptedToken::encrypt(b"key", &password).unwrap();

        let token = encrypted.to_token_string().unwrap();
        let parsed = EncryptedToken::from_token_string(&token).unwrap();

        assert_eq!(parsed, encrypted);
        assert_eq!(parsed.decrypt(&password).unwrap().as_slice(), b"key");
    }

    #[test]
    fn test_garbage_token_is_decryption_error() {
        assert!(matches!(
            EncryptedToken::from_token_string("%%% not base64"),
            Err(NomadError::Decryption(_))
        ));
        assert!(matches!(
            EncryptedToken::from_token_string(&STANDARD.encode([1u8, 2, 3])),
            Err(NomadError::Decryption(_))
        ));
    }

    #[test]
    fn test_different_salts_produce_different_ciphertexts() {
        let password = Password::new("same_password");

        let first = EncryptedToken::encrypt(b"same data", &password).unwrap();
        let second = EncryptedToken::encrypt(b"same data", &password).unwrap();

        assert_ne!(first.salt, second.salt);
        assert_ne!(first.ciphertext, second.ciphertext);
    }
}
