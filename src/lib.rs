//! # Nomad - client core for a name-anchored social network
//!
//! Every identity is a top-level domain name that owns one append-only log on
//! a relayer. Posts, follows, blocks, likes and moderation flags are records in
//! that log. This crate holds the client side: the identity key, the two-phase
//! write protocol, and local per-identity preferences.
//!
//! ## Features
//!
//! - **Password-protected identities**: the private key is stored encrypted
//!   (Argon2id + AES-256-GCM) and only ever decrypted into an [`IdentityVault`]
//! - **Two-phase appends**: precommit seals a record at an offset, commit sends
//!   the Ed25519 signature over the sealed hash
//! - **Crash-tolerant local cache**: user data documents load to defaults when
//!   missing or corrupt
//!
//! ## Examples
//!
//! ### Posting
//!
//! ```rust,no_run
//! use nomad::actions::{DraftPost, Session};
//! use nomad::crypto::{IdentityKey, Password};
//! use nomad::identity::Identity;
//! use nomad::relayer::MemoryRelayer;
//! use nomad::storage::MemoryStore;
//! # async fn run() -> nomad::Result<()> {
//! let relayer = std::sync::Arc::new(MemoryRelayer::new());
//! let alice = Identity::new("alice")?;
//! let key = IdentityKey::generate();
//! relayer.register_identity(&alice, key.public_key())?;
//!
//! let mut session = Session::new(relayer, MemoryStore::new())?;
//! session.add_tld(alice, key, &Password::new("correct horse"))?;
//! let receipt = session.send_post(DraftPost::new("hello world")).await?.post;
//! println!("committed {} at offset {}", receipt.refhash, receipt.offset);
//! # Ok(())
//! # }
//! ```
//!
//! ### Local preferences
//!
//! ```rust
//! use nomad::cache::LocalUserCache;
//! use nomad::identity::Identity;
//! use nomad::storage::MemoryStore;
//! # fn main() -> nomad::Result<()> {
//! let cache = LocalUserCache::new(MemoryStore::new());
//! let alice = Identity::new("alice")?;
//! cache.mute_name(&alice, "spammer.")?;
//! assert!(cache.load(&alice).muted_names.contains("spammer."));
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod log;
pub mod relayer;
pub mod storage;

pub use error::{NomadError, Result};
pub use identity::{EncryptedIdentityStore, Identity, IdentityVault};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
