//! Append-only logs and the two-phase write protocol.
//!
//! Each identity owns one log hosted by a relayer. A write appends exactly one
//! record and runs in two phases:
//!
//! 1. **Precommit**: the relayer seals the record at the given offset and
//!    returns `(refhash, sealed_hash, envelope)`
//! 2. **Commit**: the author signs the sealed hash and sends it back
//!
//! ## Modules
//!
//! - [`record`]: record variants (post, connection, moderation)
//! - [`envelope`]: request and response bodies, sealing
//! - [`client`]: the [`AppendLogClient`] state machine

pub mod client;
pub mod envelope;
pub mod record;

pub use client::{AppendLogClient, AppendReceipt, AppendState, Reconciliation};
pub use envelope::{
    seal, BlobInfo, CommitRequest, CommitResult, Envelope, PrecommitRequest, PrecommitResult,
    RefHash, SealedHash,
};
pub use record::{
    AppendRecord, ConnectionRecord, ConnectionType, ModerationRecord, ModerationType, PostRecord,
    RecordKind,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time as Unix milliseconds.
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
