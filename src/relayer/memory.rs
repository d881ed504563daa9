//! In-process relayer.
//!
//! Holds one log per identity and enforces the same rules a remote relayer
//! does: offsets must match the log tip, commits must carry a valid signature
//! over the sealed hash handed out at precommit, and a truncating write may
//! roll the log back before appending.

use super::Relayer;
use crate::crypto::IdentityPublicKey;
use crate::error::{NomadError, Result};
use crate::identity::Identity;
use crate::log::{
    current_timestamp_millis, seal, AppendRecord, CommitRequest, CommitResult, Envelope,
    PrecommitRequest, PrecommitResult, RefHash,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A committed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub refhash: RefHash,
    pub record: AppendRecord,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
struct IdentityLog {
    public_key: Option<IdentityPublicKey>,
    records: Vec<StoredRecord>,
    /// Every refhash ever committed, including ones later truncated away.
    committed: HashSet<RefHash>,
}

#[derive(Debug, Default)]
struct RelayerState {
    logs: HashMap<Identity, IdentityLog>,
    last_timestamp: u64,
    drop_next_commit_response: bool,
}

impl RelayerState {
    /// Hands out strictly increasing timestamps.
    fn next_timestamp(&mut self) -> u64 {
        let now = current_timestamp_millis().max(self.last_timestamp + 1);
        self.last_timestamp = now;
        now
    }
}

/// Relayer that keeps every log in memory.
#[derive(Debug, Default)]
pub struct MemoryRelayer {
    state: Mutex<RelayerState>,
}

/// Checks that `offset` is a position the record may be written at.
fn check_offset(identity: &Identity, offset: u64, tip: u64, truncate: bool) -> Result<()> {
    let ok = if truncate { offset <= tip } else { offset == tip };
    if ok {
        Ok(())
    } else {
        Err(NomadError::rejected(format!(
            "stale offset for {}: got {}, log tip is {}",
            identity, offset, tip
        )))
    }
}

impl MemoryRelayer {
    /// Creates an empty relayer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RelayerState>> {
        self.state
            .lock()
            .map_err(|_| NomadError::storage("relayer state lock poisoned"))
    }

    /// Authorizes `public_key` to write `identity`'s log.
    pub fn register_identity(&self, identity: &Identity, public_key: IdentityPublicKey) -> Result<()> {
        let mut state = self.lock()?;
        state.logs.entry(identity.clone()).or_default().public_key = Some(public_key);
        info!(identity = %identity, "registered identity");
        Ok(())
    }

    /// Appends `count` placeholder posts, so tests can start at a given offset.
    pub fn seed_records(&self, identity: &Identity, count: u64) -> Result<()> {
        let mut state = self.lock()?;
        for i in 0..count {
            let timestamp = state.next_timestamp();
            let record = AppendRecord::from(crate::log::PostRecord::new(format!("seed {}", i)));
            let (refhash, _) = seal(identity, &record, i, timestamp)?;
            let log = state.logs.entry(identity.clone()).or_default();
            log.committed.insert(refhash.clone());
            log.records.push(StoredRecord {
                refhash,
                record,
                timestamp,
            });
        }
        Ok(())
    }

    /// Committed records of `identity`, oldest first.
    pub fn records(&self, identity: &Identity) -> Result<Vec<StoredRecord>> {
        let state = self.lock()?;
        Ok(state
            .logs
            .get(identity)
            .map(|log| log.records.clone())
            .unwrap_or_default())
    }

    /// Makes the next commit apply but answer with `CommitOutcomeUnknown`,
    /// as if the response were lost in transit.
    pub fn drop_next_commit_response(&self) -> Result<()> {
        self.lock()?.drop_next_commit_response = true;
        Ok(())
    }
}

#[async_trait]
impl Relayer for MemoryRelayer {
    async fn blob_offset(&self, identity: &Identity) -> Result<u64> {
        let state = self.lock()?;
        Ok(state
            .logs
            .get(identity)
            .map(|log| log.records.len() as u64)
            .unwrap_or(0))
    }

    async fn precommit(&self, request: &PrecommitRequest) -> Result<PrecommitResult> {
        let identity = request.identity().map_err(|e| NomadError::rejected(e.to_string()))?;
        request
            .record
            .validate()
            .map_err(|e| NomadError::rejected(e.to_string()))?;

        let mut state = self.lock()?;
        let tip = state
            .logs
            .get(&identity)
            .map(|log| log.records.len() as u64)
            .unwrap_or(0);
        check_offset(&identity, request.offset, tip, request.truncate)?;

        let timestamp = state.next_timestamp();
        let (refhash, sealed_hash) = seal(&identity, &request.record, request.offset, timestamp)?;
        debug!(identity = %identity, offset = request.offset, refhash = %refhash, "sealed record");

        Ok(PrecommitResult {
            refhash,
            sealed_hash,
            envelope: Envelope { timestamp },
        })
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitResult> {
        let identity = request.identity().map_err(|e| NomadError::rejected(e.to_string()))?;
        request
            .record
            .validate()
            .map_err(|e| NomadError::rejected(e.to_string()))?;

        let mut state = self.lock()?;
        let log = state
            .logs
            .get_mut(&identity)
            .filter(|log| log.public_key.is_some())
            .ok_or_else(|| NomadError::rejected(format!("unknown identity {}", identity)))?;

        check_offset(
            &identity,
            request.offset,
            log.records.len() as u64,
            request.truncate,
        )?;

        let (refhash, sealed_hash) = seal(&identity, &request.record, request.offset, request.date)?;
        if refhash != request.refhash || !sealed_hash.matches(&request.sealed_hash) {
            warn!(identity = %identity, "commit does not match its precommit");
            return Err(NomadError::rejected("sealed hash mismatch"));
        }
        if log.committed.contains(&refhash) {
            warn!(identity = %identity, refhash = %refhash, "replayed commit");
            return Err(NomadError::rejected(format!(
                "record {} already committed",
                refhash
            )));
        }

        let public_key = log
            .public_key
            .ok_or_else(|| NomadError::rejected(format!("unknown identity {}", identity)))?;
        public_key
            .verify(sealed_hash.as_bytes(), &request.signature)
            .map_err(|_| NomadError::rejected("invalid signature"))?;

        let truncated = (request.offset as usize) < log.records.len();
        if truncated {
            log.records.truncate(request.offset as usize);
            info!(identity = %identity, offset = request.offset, "truncated log");
        }
        log.committed.insert(refhash.clone());
        log.records.push(StoredRecord {
            refhash: refhash.clone(),
            record: request.record.clone(),
            timestamp: request.date,
        });
        let next_offset = log.records.len() as u64;
        let drop_response = std::mem::take(&mut state.drop_next_commit_response);
        info!(
            identity = %identity,
            kind = %request.record.kind(),
            refhash = %refhash,
            next_offset,
            "committed record"
        );

        if drop_response {
            return Err(NomadError::CommitOutcomeUnknown {
                refhash: refhash.into_string(),
                offset: request.offset,
            });
        }

        Ok(CommitResult {
            refhash,
            next_offset: Some(next_offset),
            truncated,
        })
    }

    async fn has_record(&self, identity: &Identity, refhash: &RefHash) -> Result<bool> {
        let state = self.lock()?;
        Ok(state
            .logs
            .get(identity)
            .is_some_and(|log| log.records.iter().any(|r| &r.refhash == refhash)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IdentityKey;
    use crate::log::{ConnectionRecord, PostRecord};

    fn setup() -> (MemoryRelayer, Identity, IdentityKey) {
        let relayer = MemoryRelayer::new();
        let alice = Identity::new("alice").unwrap();
        let key = IdentityKey::generate();
        relayer.register_identity(&alice, key.public_key()).unwrap();
        (relayer, alice, key)
    }

    async fn signed_commit(
        relayer: &MemoryRelayer,
        key: &IdentityKey,
        precommit: &PrecommitRequest,
    ) -> CommitRequest {
        let sealed = relayer.precommit(precommit).await.unwrap();
        CommitRequest::new(precommit, &sealed, key.sign(sealed.sealed_hash.as_bytes()))
    }

    #[tokio::test]
    async fn test_commit_appends_at_tip() {
        let (relayer, alice, key) = setup();
        let req = PrecommitRequest::new(&alice, PostRecord::new("hi").into(), 0, false);
        let commit = signed_commit(&relayer, &key, &req).await;

        let result = relayer.commit(&commit).await.unwrap();
        assert_eq!(result.next_offset, Some(1));
        assert!(!result.truncated);
        assert_eq!(relayer.blob_offset(&alice).await.unwrap(), 1);
        assert!(relayer.has_record(&alice, &result.refhash).await.unwrap());
    }

    #[tokio::test]
    async fn test_precommit_rejects_stale_offset() {
        let (relayer, alice, _) = setup();
        relayer.seed_records(&alice, 3).unwrap();
        let req = PrecommitRequest::new(&alice, ConnectionRecord::follow("bob").into(), 2, false);
        assert!(matches!(
            relayer.precommit(&req).await,
            Err(NomadError::RemoteRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_rejects_foreign_signature() {
        let (relayer, alice, _) = setup();
        let mallory = IdentityKey::generate();
        let req = PrecommitRequest::new(&alice, PostRecord::new("hi").into(), 0, false);
        let commit = signed_commit(&relayer, &mallory, &req).await;
        assert!(matches!(
            relayer.commit(&commit).await,
            Err(NomadError::RemoteRejected(_))
        ));
        assert_eq!(relayer.blob_offset(&alice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_rejects_tampered_record() {
        let (relayer, alice, key) = setup();
        let req = PrecommitRequest::new(&alice, PostRecord::new("hi").into(), 0, false);
        let mut commit = signed_commit(&relayer, &key, &req).await;
        commit.record = PostRecord::new("bye").into();
        assert!(matches!(
            relayer.commit(&commit).await,
            Err(NomadError::RemoteRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_identity_cannot_commit() {
        let relayer = MemoryRelayer::new();
        let bob = Identity::new("bob").unwrap();
        let key = IdentityKey::generate();
        let req = PrecommitRequest::new(&bob, PostRecord::new("hi").into(), 0, false);
        let commit = signed_commit(&relayer, &key, &req).await;
        assert!(matches!(
            relayer.commit(&commit).await,
            Err(NomadError::RemoteRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_truncating_commit_rolls_back() {
        let (relayer, alice, key) = setup();
        relayer.seed_records(&alice, 4).unwrap();
        let req = PrecommitRequest::new(&alice, PostRecord::new("again").into(), 2, true);
        let commit = signed_commit(&relayer, &key, &req).await;

        let result = relayer.commit(&commit).await.unwrap();
        assert!(result.truncated);
        assert_eq!(result.next_offset, Some(3));
        let records = relayer.records(&alice).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].record, PostRecord::new("again").into());
    }

    #[tokio::test]
    async fn test_dropped_response_still_applies() {
        let (relayer, alice, key) = setup();
        relayer.drop_next_commit_response().unwrap();
        let req = PrecommitRequest::new(&alice, PostRecord::new("hi").into(), 0, false);
        let commit = signed_commit(&relayer, &key, &req).await;

        match relayer.commit(&commit).await {
            Err(NomadError::CommitOutcomeUnknown { refhash, offset }) => {
                assert_eq!(offset, 0);
                assert_eq!(refhash, commit.refhash.as_str());
            }
            other => panic!("expected unknown outcome, got {:?}", other),
        }
        assert!(relayer.has_record(&alice, &commit.refhash).await.unwrap());
    }

    #[tokio::test]
    async fn test_replayed_truncating_commit_is_rejected() {
        let (relayer, alice, key) = setup();
        relayer.seed_records(&alice, 3).unwrap();
        let req = PrecommitRequest::new(&alice, PostRecord::new("fix").into(), 1, true);
        let truncating = signed_commit(&relayer, &key, &req).await;
        relayer.commit(&truncating).await.unwrap();

        for offset in 2..5 {
            let req = PrecommitRequest::new(&alice, PostRecord::new("later").into(), offset, false);
            let commit = signed_commit(&relayer, &key, &req).await;
            relayer.commit(&commit).await.unwrap();
        }
        assert_eq!(relayer.blob_offset(&alice).await.unwrap(), 5);

        assert!(matches!(
            relayer.commit(&truncating).await,
            Err(NomadError::RemoteRejected(_))
        ));
        assert_eq!(relayer.blob_offset(&alice).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_rejected_commit_keeps_dropped_response_armed() {
        let (relayer, alice, key) = setup();
        relayer.drop_next_commit_response().unwrap();

        let req = PrecommitRequest::new(&alice, PostRecord::new("hi").into(), 0, false);
        let mut tampered = signed_commit(&relayer, &key, &req).await;
        tampered.record = PostRecord::new("bye").into();
        assert!(matches!(
            relayer.commit(&tampered).await,
            Err(NomadError::RemoteRejected(_))
        ));

        let commit = signed_commit(&relayer, &key, &req).await;
        assert!(matches!(
            relayer.commit(&commit).await,
            Err(NomadError::CommitOutcomeUnknown { .. })
        ));
    }
}
