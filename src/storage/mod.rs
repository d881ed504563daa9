//! Local key-value persistence.
//!
//! The client keeps a handful of string values under well-known keys, the way
//! a browser keeps them in local storage:
//!
//! - `nomad_token`: encrypted identity token
//! - `nomad_username`: serialized `subdomain.tld` or `tld`
//! - `nomad-userdata:<username>`: JSON user data document
//! - `nomad_saved_identities`: comma-joined known usernames
//!
//! ## Modules
//!
//! - `rocksdb`: durable store backed by RocksDB

pub mod rocksdb;

pub use self::rocksdb::{RocksDbConfig, RocksDbStore};

use crate::error::{NomadError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Key holding the encrypted identity token.
pub const TOKEN_KEY: &str = "nomad_token";

/// Key holding the serialized username of the active identity.
pub const USERNAME_KEY: &str = "nomad_username";

/// Key holding the comma-joined set of known usernames.
pub const SAVED_IDENTITIES_KEY: &str = "nomad_saved_identities";

/// Prefix of per-identity user data documents.
pub const USER_DATA_PREFIX: &str = "nomad-userdata:";

/// Returns the storage key of the user data document for `username`.
pub fn user_data_key(username: &str) -> String {
    format!("{}{}", USER_DATA_PREFIX, username)
}

/// String key-value persistence.
///
/// Writes overwrite whole values; there is no partial update and no locking
/// across handles, so concurrent writers of one key resolve last-writer-wins.
pub trait KeyValueStore {
    /// Reads the value at `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrites the value at `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// In-memory store. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| NomadError::storage("memory store lock poisoned"))?;
        trace!(key, found = entries.contains_key(key), "memory_get");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| NomadError::storage("memory store lock poisoned"))?;
        trace!(key, value_len = value.len(), "memory_set");
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| NomadError::storage("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}
