//! Error types for nomad client operations.

use thiserror::Error;

/// Result type alias for nomad operations.
pub type Result<T> = std::result::Result<T, NomadError>;

/// Main error type for nomad operations.
#[derive(Error, Debug)]
pub enum NomadError {
    /// Wrong password or corrupt identity token
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// A write was attempted while the identity vault is locked
    #[error("No signing key loaded; unlock the identity first")]
    NoSigningKey,

    /// The relayer refused the request (stale offset, bad signature, malformed record)
    #[error("Relayer rejected request: {0}")]
    RemoteRejected(String),

    /// Network failure, timeout, or an unusable response
    #[error("Transport error: {0}")]
    Transport(String),

    /// A commit was sent but its response never arrived
    #[error("Commit outcome unknown for {refhash} at offset {offset}")]
    CommitOutcomeUnknown {
        /// Refhash the relayer assigned during precommit
        refhash: String,
        /// Offset the commit was sent with
        offset: u64,
    },

    /// Malformed local user document (recovered internally, never surfaced by loads)
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Cryptographic operation errors
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NomadError {
    /// Creates a new decryption error.
    pub fn decryption<T: ToString>(msg: T) -> Self {
        Self::Decryption(msg.to_string())
    }

    /// Creates a new remote rejection error.
    pub fn rejected<T: ToString>(msg: T) -> Self {
        Self::RemoteRejected(msg.to_string())
    }

    /// Creates a new transport error.
    pub fn transport<T: ToString>(msg: T) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates a new cryptographic error.
    pub fn crypto<T: ToString>(msg: T) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Creates a new invalid input error.
    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Returns true if the caller may refetch the offset and try the action again.
    ///
    /// `CommitOutcomeUnknown` is not retryable: the record may already be
    /// upstream and has to be reconciled first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteRejected(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for NomadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for NomadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
