//! Durable storage of the encrypted identity.
//!
//! Only the password-encrypted token and usernames are persisted; the clear
//! key goes straight into an [`IdentityVault`].

use super::vault::encrypt_key;
use super::{Identity, IdentityVault};
use crate::crypto::{IdentityKey, IdentityPublicKey, Password};
use crate::error::{NomadError, Result};
use crate::storage::{KeyValueStore, SAVED_IDENTITIES_KEY, TOKEN_KEY, USERNAME_KEY};
use tracing::{info, warn};

/// What is persisted for the active identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredIdentity {
    /// The active identity, if a username is stored.
    pub identity: Option<Identity>,
    /// The encrypted token, if one is stored.
    pub token: Option<String>,
}

/// Persists `{tld, subdomain, token}` and the set of known usernames.
#[derive(Debug, Clone)]
pub struct EncryptedIdentityStore<S> {
    store: S,
}

impl<S: KeyValueStore> EncryptedIdentityStore<S> {
    /// Wraps a key-value store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Reads the persisted identity.
    ///
    /// An unparseable username is treated as absent.
    pub fn get_identity(&self) -> Result<StoredIdentity> {
        let token = self.store.get(TOKEN_KEY)?.filter(|t| !t.is_empty());
        let identity = match self.store.get(USERNAME_KEY)? {
            Some(username) if !username.is_empty() => match Identity::from_username(&username) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!(username = %username, error = %e, "ignoring malformed stored username");
                    None
                }
            },
            _ => None,
        };
        Ok(StoredIdentity { identity, token })
    }

    /// Persists the active identity and its encrypted token.
    pub fn set_identity(&self, identity: &Identity, token: &str) -> Result<()> {
        self.store.set(TOKEN_KEY, token)?;
        self.store.set(USERNAME_KEY, &identity.username())?;
        Ok(())
    }

    /// Forgets the active identity and its token.
    pub fn remove_identity(&self) -> Result<()> {
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USERNAME_KEY)?;
        Ok(())
    }

    /// Encrypts `key`, persists it as the active identity and records the
    /// username among the saved identities. Returns the token.
    ///
    /// Callers load the same key into their vault so the session can write
    /// immediately.
    pub fn persist_new_identity(
        &self,
        identity: &Identity,
        key: &IdentityKey,
        password: &Password,
    ) -> Result<String> {
        let token = encrypt_key(key, password)?;
        self.set_identity(identity, &token)?;
        self.add_saved_identity(identity)?;
        info!(identity = %identity, "persisted new identity");
        Ok(token)
    }

    /// Decrypts the stored token into `vault`.
    pub fn unlock_into(
        &self,
        vault: &mut IdentityVault,
        password: &Password,
    ) -> Result<IdentityPublicKey> {
        let token = self
            .get_identity()?
            .token
            .ok_or_else(|| NomadError::decryption("No identity token stored"))?;
        vault.unlock(&token, password)
    }

    /// True iff a username and token are stored and the vault holds a key.
    pub fn is_logged_in(&self, vault: &IdentityVault) -> Result<bool> {
        let stored = self.get_identity()?;
        Ok(stored.identity.is_some() && stored.token.is_some() && vault.is_usable())
    }

    /// Adds `identity` to the saved set and returns the updated list.
    pub fn add_saved_identity(&self, identity: &Identity) -> Result<Vec<String>> {
        let mut identities = self.saved_identities()?;
        let username = identity.username();
        if !identities.contains(&username) {
            identities.push(username);
        }
        self.store.set(SAVED_IDENTITIES_KEY, &identities.join(","))?;
        Ok(identities)
    }

    /// Lists known usernames, dropping empty entries.
    pub fn saved_identities(&self) -> Result<Vec<String>> {
        let data = self.store.get(SAVED_IDENTITIES_KEY)?.unwrap_or_default();
        Ok(data
            .split(',')
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_empty_store_has_no_identity() {
        let store = EncryptedIdentityStore::new(MemoryStore::new());
        assert_eq!(store.get_identity().unwrap(), StoredIdentity::default());
        assert!(store.saved_identities().unwrap().is_empty());
    }

    #[test]
    fn test_persist_and_unlock() {
        let store = EncryptedIdentityStore::new(MemoryStore::new());
        let alice = Identity::new("alice").unwrap();
        let key = IdentityKey::generate();
        let password = Password::new("pw");

        store.persist_new_identity(&alice, &key, &password).unwrap();

        let stored = store.get_identity().unwrap();
        assert_eq!(stored.identity, Some(alice.clone()));
        assert!(stored.token.is_some());
        assert_eq!(store.saved_identities().unwrap(), vec!["alice.".to_string()]);

        let mut vault = IdentityVault::new();
        assert!(!store.is_logged_in(&vault).unwrap());
        let public_key = store.unlock_into(&mut vault, &password).unwrap();
        assert_eq!(public_key, key.public_key());
        assert!(store.is_logged_in(&vault).unwrap());
    }

    #[test]
    fn test_saved_identities_are_a_set() {
        let store = EncryptedIdentityStore::new(MemoryStore::new());
        let alice = Identity::new("alice").unwrap();
        let bob = Identity::with_subdomain("alice", "bob").unwrap();

        store.add_saved_identity(&alice).unwrap();
        store.add_saved_identity(&bob).unwrap();
        let all = store.add_saved_identity(&alice).unwrap();

        assert_eq!(all, vec!["alice.".to_string(), "bob.alice.".to_string()]);
        assert_eq!(
            store.inner().get(SAVED_IDENTITIES_KEY).unwrap().as_deref(),
            Some("alice.,bob.alice.")
        );
    }

    #[test]
    fn test_saved_identities_skip_empty_entries() {
        let kv = MemoryStore::new();
        kv.set(SAVED_IDENTITIES_KEY, ",alice.,,carol.,").unwrap();
        let store = EncryptedIdentityStore::new(kv);
        assert_eq!(
            store.saved_identities().unwrap(),
            vec!["alice.".to_string(), "carol.".to_string()]
        );
    }

    #[test]
    fn test_unlock_without_token_fails() {
        let store = EncryptedIdentityStore::new(MemoryStore::new());
        let mut vault = IdentityVault::new();
        assert!(matches!(
            store.unlock_into(&mut vault, &Password::new("pw")),
            Err(NomadError::Decryption(_))
        ));
    }

    #[test]
    fn test_remove_identity_keeps_saved_list() {
        let store = EncryptedIdentityStore::new(MemoryStore::new());
        let alice = Identity::new("alice").unwrap();
        store
            .persist_new_identity(&alice, &IdentityKey::generate(), &Password::new("pw"))
            .unwrap();

        store.remove_identity().unwrap();
        assert_eq!(store.get_identity().unwrap(), StoredIdentity::default());
        assert_eq!(store.saved_identities().unwrap().len(), 1);
    }
}
