//! Name-anchored identities.
//!
//! An identity is a top-level domain name, optionally with a subdomain, that
//! owns exactly one append log on the relayer. Names are carried in dotted
//! form (`alice.`); a subdomain identity serializes as `bob.alice.`.
//!
//! - [`IdentityVault`] holds the decrypted signing key for the session
//! - [`EncryptedIdentityStore`] persists the encrypted token and usernames

mod store;
mod vault;

pub use store::{EncryptedIdentityStore, StoredIdentity};
pub use vault::IdentityVault;

use crate::error::{NomadError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ensures a name carries its trailing root dot.
pub fn dot_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Strips the trailing root dot, if any.
pub fn undot_name(name: &str) -> &str {
    name.trim().trim_end_matches('.')
}

/// Serializes a username: `subdomain.tld.` for subdomains, `tld.` otherwise.
pub fn serialize_username(subdomain: &str, tld: &str) -> String {
    let tld = dot_name(tld);
    if subdomain.is_empty() || tld.is_empty() {
        tld
    } else {
        format!("{}.{}", subdomain, tld)
    }
}

/// Parses a username into `(tld, subdomain)`.
///
/// Top-level names never contain inner dots, so the last label is the tld
/// and whatever precedes it is the subdomain.
pub fn parse_username(username: &str) -> (String, String) {
    let bare = undot_name(username);
    match bare.rsplit_once('.') {
        Some((subdomain, tld)) => (dot_name(tld), subdomain.to_string()),
        None => (dot_name(bare), String::new()),
    }
}

/// An identity that owns one append log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Top-level domain name, dotted (`alice.`).
    pub tld: String,
    /// Subdomain label; empty for root identities.
    #[serde(default)]
    pub subdomain: String,
}

impl Identity {
    /// Creates a root identity for `tld`.
    pub fn new(tld: &str) -> Result<Self> {
        Self::with_subdomain(tld, "")
    }

    /// Creates an identity, validating both labels.
    pub fn with_subdomain(tld: &str, subdomain: &str) -> Result<Self> {
        let bare = undot_name(tld);
        if bare.is_empty() {
            return Err(NomadError::invalid_input("Identity name cannot be empty"));
        }
        if bare.contains('.') {
            return Err(NomadError::invalid_input(format!(
                "Top-level name '{}' cannot contain inner dots",
                bare
            )));
        }
        if subdomain.contains('.') || subdomain.chars().any(char::is_whitespace) {
            return Err(NomadError::invalid_input(format!(
                "Invalid subdomain '{}'",
                subdomain
            )));
        }
        Ok(Self {
            tld: dot_name(bare),
            subdomain: subdomain.to_string(),
        })
    }

    /// Parses a serialized username.
    pub fn from_username(username: &str) -> Result<Self> {
        let (tld, subdomain) = parse_username(username);
        Self::with_subdomain(&tld, &subdomain)
    }

    /// The serialized username, also used as the user data key suffix.
    pub fn username(&self) -> String {
        serialize_username(&self.subdomain, &self.tld)
    }

    /// Returns true for root (tld-only) identities.
    pub fn is_root(&self) -> bool {
        self.subdomain.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username())
    }
}
