//! Client side of the two-phase append protocol.
//!
//! ```text
//! IDLE ─▶ PRECOMMITTING ─▶ AWAITING_SIGNATURE ─▶ COMMITTING ─▶ DONE
//!               │                   │                  ├──────▶ FAILED
//!               └──────────────────-┴─────────────────▶│
//!                                                      └──────▶ UNKNOWN
//! ```
//!
//! The offset is fetched fresh for every action and never cached across
//! actions. Failures are not retried automatically; a commit whose response
//! was lost ends in `Unknown` and must be reconciled before the caller acts
//! again.

use super::envelope::{CommitRequest, PrecommitRequest, PrecommitResult, RefHash, SealedHash};
use super::record::AppendRecord;
use crate::error::{NomadError, Result};
use crate::identity::{Identity, IdentityVault};
use crate::relayer::Relayer;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Where an append attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendState {
    Idle,
    Precommitting,
    AwaitingSignature,
    Committing,
    Done,
    Failed,
    /// The commit was sent but its outcome is not known.
    Unknown,
}

impl AppendState {
    /// Terminal states end an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Unknown)
    }

    /// Legal transitions of the protocol.
    pub fn can_transition_to(&self, next: AppendState) -> bool {
        use AppendState::*;
        matches!(
            (self, next),
            (Idle, Precommitting)
                | (Idle, Failed)
                | (Precommitting, AwaitingSignature)
                | (Precommitting, Failed)
                | (AwaitingSignature, Committing)
                | (AwaitingSignature, Failed)
                | (Committing, Done)
                | (Committing, Failed)
                | (Committing, Unknown)
        )
    }
}

impl fmt::Display for AppendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Precommitting => "PRECOMMITTING",
            Self::AwaitingSignature => "AWAITING_SIGNATURE",
            Self::Committing => "COMMITTING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Tracks one attempt through the state machine.
#[derive(Debug)]
struct Attempt {
    state: AppendState,
}

impl Attempt {
    fn new() -> Self {
        Self {
            state: AppendState::Idle,
        }
    }

    fn advance(&mut self, next: AppendState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "append state");
        self.state = next;
    }

    /// Moves to the terminal state matching `err` and hands it back.
    fn fail(&mut self, err: NomadError) -> NomadError {
        let next = match err {
            NomadError::CommitOutcomeUnknown { .. } if self.state == AppendState::Committing => {
                AppendState::Unknown
            }
            _ => AppendState::Failed,
        };
        self.advance(next);
        err
    }
}

/// Result of a completed append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub refhash: RefHash,
    pub sealed_hash: SealedHash,
    /// Envelope timestamp, Unix milliseconds.
    pub timestamp: u64,
    /// Offset the record was written at.
    pub offset: u64,
    /// Log tip after the append.
    pub next_offset: u64,
    /// True if the relayer dropped records before appending.
    pub truncated: bool,
}

/// Outcome of checking an unknown commit against the relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The record is in the log.
    Confirmed(RefHash),
    /// The record never landed; the action may be issued again.
    Absent(RefHash),
}

impl Reconciliation {
    pub fn refhash(&self) -> &RefHash {
        match self {
            Self::Confirmed(r) | Self::Absent(r) => r,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Drives appends against a relayer.
#[derive(Debug, Clone)]
pub struct AppendLogClient<R> {
    relayer: R,
}

impl<R: Relayer> AppendLogClient<R> {
    pub fn new(relayer: R) -> Self {
        Self { relayer }
    }

    pub fn relayer(&self) -> &R {
        &self.relayer
    }

    /// Fetches the current offset of `identity`'s log.
    pub async fn resolve_offset(&self, identity: &Identity) -> Result<u64> {
        self.relayer.blob_offset(identity).await
    }

    /// Phase 1: asks the relayer to seal `record` at `offset`.
    pub async fn precommit(
        &self,
        identity: &Identity,
        record: AppendRecord,
        offset: u64,
        truncate: bool,
    ) -> Result<(PrecommitRequest, PrecommitResult)> {
        record.validate()?;
        let request = PrecommitRequest::new(identity, record, offset, truncate);
        let sealed = self.relayer.precommit(&request).await?;
        Ok((request, sealed))
    }

    /// Phase 2: signs the sealed hash and commits.
    pub async fn commit(
        &self,
        vault: &IdentityVault,
        request: &PrecommitRequest,
        sealed: &PrecommitResult,
    ) -> Result<AppendReceipt> {
        let signature = vault.sign(sealed.sealed_hash.as_bytes())?;
        let commit = CommitRequest::new(request, sealed, signature);
        let result = self.relayer.commit(&commit).await?;
        Ok(Self::receipt(request, sealed, result.next_offset, result.truncated))
    }

    fn receipt(
        request: &PrecommitRequest,
        sealed: &PrecommitResult,
        next_offset: Option<u64>,
        truncated: bool,
    ) -> AppendReceipt {
        AppendReceipt {
            refhash: sealed.refhash.clone(),
            sealed_hash: sealed.sealed_hash.clone(),
            timestamp: sealed.envelope.timestamp,
            offset: request.offset,
            next_offset: next_offset.unwrap_or(request.offset + 1),
            truncated,
        }
    }

    /// Appends one record at the current tip of the log.
    ///
    /// Fails with `NoSigningKey` before any network traffic if the vault is
    /// locked.
    #[instrument(skip(self, vault, record), fields(identity = %identity, kind = %record.kind()))]
    pub async fn append(
        &self,
        vault: &IdentityVault,
        identity: &Identity,
        record: AppendRecord,
    ) -> Result<AppendReceipt> {
        let mut attempt = Attempt::new();
        if !vault.is_usable() {
            return Err(attempt.fail(NomadError::NoSigningKey));
        }
        let offset = match self.resolve_offset(identity).await {
            Ok(offset) => offset,
            Err(e) => return Err(attempt.fail(e)),
        };
        self.run(&mut attempt, vault, identity, record, offset, false)
            .await
    }

    /// Appends at an explicit offset, optionally truncating the log there.
    #[instrument(skip(self, vault, record), fields(identity = %identity, kind = %record.kind()))]
    pub async fn append_at(
        &self,
        vault: &IdentityVault,
        identity: &Identity,
        record: AppendRecord,
        offset: u64,
        truncate: bool,
    ) -> Result<AppendReceipt> {
        let mut attempt = Attempt::new();
        if !vault.is_usable() {
            return Err(attempt.fail(NomadError::NoSigningKey));
        }
        self.run(&mut attempt, vault, identity, record, offset, truncate)
            .await
    }

    async fn run(
        &self,
        attempt: &mut Attempt,
        vault: &IdentityVault,
        identity: &Identity,
        record: AppendRecord,
        offset: u64,
        truncate: bool,
    ) -> Result<AppendReceipt> {
        attempt.advance(AppendState::Precommitting);
        let (request, sealed) = match self.precommit(identity, record, offset, truncate).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(offset, error = %e, "precommit failed");
                return Err(attempt.fail(e));
            }
        };

        attempt.advance(AppendState::AwaitingSignature);
        let signature = match vault.sign(sealed.sealed_hash.as_bytes()) {
            Ok(sig) => sig,
            Err(e) => return Err(attempt.fail(e)),
        };

        attempt.advance(AppendState::Committing);
        let commit = CommitRequest::new(&request, &sealed, signature);
        match self.relayer.commit(&commit).await {
            Ok(result) => {
                attempt.advance(AppendState::Done);
                let receipt = Self::receipt(&request, &sealed, result.next_offset, result.truncated);
                info!(
                    refhash = %receipt.refhash,
                    offset = receipt.offset,
                    next_offset = receipt.next_offset,
                    "record committed"
                );
                Ok(receipt)
            }
            Err(e) => {
                let err = attempt.fail(e);
                if attempt.state == AppendState::Unknown {
                    warn!(refhash = %sealed.refhash, offset, "commit outcome unknown");
                } else {
                    warn!(offset, error = %err, "commit failed");
                }
                Err(err)
            }
        }
    }

    /// Checks whether a commit with an unknown outcome landed.
    #[instrument(skip(self), fields(identity = %identity, refhash = %refhash))]
    pub async fn reconcile(&self, identity: &Identity, refhash: &RefHash) -> Result<Reconciliation> {
        if self.relayer.has_record(identity, refhash).await? {
            info!("pending record found upstream");
            Ok(Reconciliation::Confirmed(refhash.clone()))
        } else {
            info!("pending record not found upstream");
            Ok(Reconciliation::Absent(refhash.clone()))
        }
    }
}
