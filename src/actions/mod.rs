//! User-facing actions.
//!
//! A [`Session`] ties the pieces together for one running client: it owns the
//! [`IdentityVault`], knows the active identity, appends records through the
//! [`AppendLogClient`] and keeps local preferences in the [`LocalUserCache`].
//! Each action runs to completion before the next one starts, which `&mut self`
//! enforces.

pub mod state;

pub use state::{PostView, ViewState};

use crate::cache::{LocalUserCache, UserData, UserDataPatch, ViewDefinition};
use crate::crypto::{IdentityKey, IdentityPublicKey, Password};
use crate::error::{NomadError, Result};
use crate::identity::{EncryptedIdentityStore, Identity, IdentityVault};
use crate::log::{
    AppendLogClient, AppendReceipt, AppendRecord, ConnectionRecord, ModerationRecord,
    ModerationType, PostRecord, Reconciliation, RefHash,
};
use crate::relayer::Relayer;
use crate::storage::KeyValueStore;
use tracing::{info, instrument, warn};

/// A post as composed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftPost {
    pub title: Option<String>,
    pub body: String,
    pub topic: Option<String>,
    pub tags: Vec<String>,
    /// Settings appended as separate moderation records once the post lands.
    pub settings: Vec<ModerationType>,
}

impl DraftPost {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    fn into_record(self, reference: Option<String>) -> PostRecord {
        PostRecord {
            title: self.title.filter(|t| !t.is_empty()),
            body: self.body,
            reference,
            topic: self.topic.filter(|t| !t.is_empty()),
            tags: self.tags,
        }
    }
}

/// Result of a queue flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Hashes found upstream and removed from the queue.
    pub confirmed: Vec<String>,
    /// Hashes still pending.
    pub pending: Vec<String>,
}

/// Result of a committed post.
#[derive(Debug)]
pub struct PostReceipt {
    /// The post itself.
    pub post: AppendReceipt,
    /// Outcome of each follow-up setting, in request order.
    pub settings: Vec<(ModerationType, Result<AppendReceipt>)>,
}

impl PostReceipt {
    /// Settings that did not land.
    pub fn failed_settings(&self) -> Vec<ModerationType> {
        self.settings
            .iter()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(setting, _)| *setting)
            .collect()
    }
}

/// One running client session.
#[derive(Debug)]
pub struct Session<R, S> {
    identities: EncryptedIdentityStore<S>,
    cache: LocalUserCache<S>,
    log: AppendLogClient<R>,
    vault: IdentityVault,
    current: Option<Identity>,
    state: ViewState,
}

impl<R: Relayer, S: KeyValueStore + Clone> Session<R, S> {
    /// Opens a session, restoring the persisted active identity.
    ///
    /// The vault starts locked; call [`tld_login`](Self::tld_login) to write.
    pub fn new(relayer: R, store: S) -> Result<Self> {
        let identities = EncryptedIdentityStore::new(store.clone());
        let current = identities.get_identity()?.identity;
        Ok(Self {
            identities,
            cache: LocalUserCache::new(store),
            log: AppendLogClient::new(relayer),
            vault: IdentityVault::new(),
            current,
            state: ViewState::new(),
        })
    }

    pub fn current_identity(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    fn active(&self) -> Result<Identity> {
        self.current
            .clone()
            .ok_or_else(|| NomadError::invalid_input("No active identity"))
    }

    pub fn vault(&self) -> &IdentityVault {
        &self.vault
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn log(&self) -> &AppendLogClient<R> {
        &self.log
    }

    pub fn cache(&self) -> &LocalUserCache<S> {
        &self.cache
    }

    pub fn identities(&self) -> &EncryptedIdentityStore<S> {
        &self.identities
    }

    // -------------------------------------------------------------------------
    // Login
    // -------------------------------------------------------------------------

    /// Decrypts the stored token into the vault.
    pub fn tld_login(&mut self, password: &Password) -> Result<IdentityPublicKey> {
        let stored = self.identities.get_identity()?;
        let identity = stored
            .identity
            .ok_or_else(|| NomadError::decryption("No identity stored"))?;
        let public_key = self.identities.unlock_into(&mut self.vault, password)?;
        info!(identity = %identity, "logged in");
        self.current = Some(identity);
        Ok(public_key)
    }

    /// Stores a new identity encrypted under `password` and makes it active.
    pub fn add_tld(
        &mut self,
        identity: Identity,
        key: IdentityKey,
        password: &Password,
    ) -> Result<IdentityPublicKey> {
        self.identities
            .persist_new_identity(&identity, &key, password)?;
        let public_key = self.vault.load(key);
        self.current = Some(identity);
        Ok(public_key)
    }

    /// Locks the vault. The encrypted token stays stored.
    pub fn logout(&mut self) {
        self.vault.lock();
        info!("logged out");
    }

    pub fn is_logged_in(&self) -> Result<bool> {
        self.identities.is_logged_in(&self.vault)
    }

    /// Hex public key of the loaded identity.
    pub fn public_key_hex(&self) -> Option<String> {
        self.vault.public_key().map(|pk| pk.to_hex())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Appends through the log client, queueing unknown outcomes.
    async fn append(&mut self, identity: &Identity, record: AppendRecord) -> Result<AppendReceipt> {
        let result = self.log.append(&self.vault, identity, record).await;
        self.queue_unknown(identity, result)
    }

    /// Like [`append`](Self::append), at an explicit offset.
    async fn append_at(
        &mut self,
        identity: &Identity,
        record: AppendRecord,
        offset: u64,
        truncate: bool,
    ) -> Result<AppendReceipt> {
        let result = self
            .log
            .append_at(&self.vault, identity, record, offset, truncate)
            .await;
        self.queue_unknown(identity, result)
    }

    fn queue_unknown(
        &mut self,
        identity: &Identity,
        result: Result<AppendReceipt>,
    ) -> Result<AppendReceipt> {
        match result {
            Err(NomadError::CommitOutcomeUnknown { refhash, offset }) => {
                let data = self.cache.enqueue_update(identity, &refhash)?;
                self.state.set_user_data(&identity.username(), data);
                Err(NomadError::CommitOutcomeUnknown { refhash, offset })
            }
            other => other,
        }
    }

    /// Posts at the tip of the log, then attaches any requested settings as
    /// their own appends.
    ///
    /// Once the post is committed this returns `Ok`; a failed setting is
    /// reported in [`PostReceipt::settings`] and never turns the post into an
    /// error.
    #[instrument(skip(self, draft))]
    pub async fn send_post(&mut self, draft: DraftPost) -> Result<PostReceipt> {
        self.post_with(draft, None).await
    }

    /// Posts at `offset`, truncating the log there when `truncate` is set.
    ///
    /// Used to retry after a known prior failure left the log ahead of what
    /// the caller expects.
    #[instrument(skip(self, draft))]
    pub async fn send_post_at(
        &mut self,
        draft: DraftPost,
        offset: u64,
        truncate: bool,
    ) -> Result<PostReceipt> {
        self.post_with(draft, Some((offset, truncate))).await
    }

    async fn post_with(
        &mut self,
        draft: DraftPost,
        position: Option<(u64, bool)>,
    ) -> Result<PostReceipt> {
        let identity = self.active()?;
        let settings = draft.settings.clone();
        let record = draft.into_record(None);
        let post = match position {
            Some((offset, truncate)) => {
                self.append_at(&identity, record.clone().into(), offset, truncate)
                    .await?
            }
            None => self.append(&identity, record.clone().into()).await?,
        };
        self.state.insert_post(post_view(&identity, &post, record));

        let mut outcomes = Vec::new();
        for setting in settings.into_iter().filter(ModerationType::is_post_setting) {
            let outcome = self.send_moderation(post.refhash.as_str(), setting).await;
            if let Err(e) = &outcome {
                warn!(
                    refhash = %post.refhash,
                    setting = ?setting,
                    error = %e,
                    "post setting not applied"
                );
            }
            outcomes.push((setting, outcome));
        }
        Ok(PostReceipt {
            post,
            settings: outcomes,
        })
    }

    /// Replies to `parent`.
    #[instrument(skip(self, draft))]
    pub async fn send_reply(&mut self, parent: &str, draft: DraftPost) -> Result<AppendReceipt> {
        let identity = self.active()?;
        if parent.trim().is_empty() {
            return Err(NomadError::invalid_input("Reply requires a parent reference"));
        }
        let record = draft.into_record(Some(parent.to_string()));

        self.state.sending_replies = true;
        let result = self.append(&identity, record.clone().into()).await;
        self.state.sending_replies = false;

        let receipt = result?;
        self.state
            .insert_comment(post_view(&identity, &receipt, record));
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn follow_user(&mut self, target_tld: &str) -> Result<AppendReceipt> {
        let identity = self.active()?;
        let record = ConnectionRecord::follow(target_tld);
        let target = record.tld.clone();
        let receipt = self.append(&identity, record.into()).await?;
        self.state.add_following(&identity.username(), &target);
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn block_user(&mut self, target_tld: &str) -> Result<AppendReceipt> {
        let identity = self.active()?;
        let record = ConnectionRecord::block(target_tld);
        let target = record.tld.clone();
        let receipt = self.append(&identity, record.into()).await?;
        self.state.add_block(&identity.username(), &target);
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn like_post(&mut self, reference: &str) -> Result<AppendReceipt> {
        let identity = self.active()?;
        let receipt = self
            .append(&identity, ModerationRecord::like(reference).into())
            .await?;
        self.state.add_like(&identity.username(), reference);
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn send_moderation(
        &mut self,
        reference: &str,
        moderation: ModerationType,
    ) -> Result<AppendReceipt> {
        if moderation == ModerationType::Like {
            return self.like_post(reference).await;
        }
        let identity = self.active()?;
        let receipt = self
            .append(&identity, ModerationRecord::new(reference, moderation).into())
            .await?;
        self.state.add_moderation(reference, moderation);
        Ok(receipt)
    }

    // -------------------------------------------------------------------------
    // Local preferences
    // -------------------------------------------------------------------------

    /// Loads the active identity's document into the view state.
    pub fn fetch_current_user_data(&mut self) -> Result<UserData> {
        let identity = self.active()?;
        let data = self.cache.load(&identity);
        self.state.set_user_data(&identity.username(), data.clone());
        Ok(data)
    }

    fn store_user_data(&mut self, identity: &Identity, data: UserData) -> UserData {
        self.state.set_user_data(&identity.username(), data.clone());
        data
    }

    /// Appends a saved view.
    pub fn create_view(&mut self, view: ViewDefinition) -> Result<UserData> {
        let identity = self.active()?;
        let mut views = self.cache.load(&identity).saved_views;
        views.push(view);
        let data = self.cache.extend(
            &identity,
            UserDataPatch {
                saved_views: Some(views),
                ..Default::default()
            },
        )?;
        Ok(self.store_user_data(&identity, data))
    }

    /// Replaces the saved view at `index`.
    pub fn save_custom_view(&mut self, view: ViewDefinition, index: usize) -> Result<UserData> {
        let identity = self.active()?;
        let mut views = self.cache.load(&identity).saved_views;
        let slot = views.get_mut(index).ok_or_else(|| {
            NomadError::invalid_input(format!("No saved view at index {}", index))
        })?;
        *slot = view;
        let data = self.cache.extend(
            &identity,
            UserDataPatch {
                saved_views: Some(views),
                ..Default::default()
            },
        )?;
        Ok(self.store_user_data(&identity, data))
    }

    pub fn mute_name(&mut self, name: &str) -> Result<UserData> {
        let identity = self.active()?;
        let data = self.cache.mute_name(&identity, name)?;
        Ok(self.store_user_data(&identity, data))
    }

    pub fn unmute_name(&mut self, name: &str) -> Result<UserData> {
        let identity = self.active()?;
        let data = self.cache.unmute_name(&identity, name)?;
        Ok(self.store_user_data(&identity, data))
    }

    pub fn hide_post(&mut self, hash: &str) -> Result<UserData> {
        let identity = self.active()?;
        let data = self.cache.hide_post(&identity, hash)?;
        Ok(self.store_user_data(&identity, data))
    }

    pub fn unhide_post(&mut self, hash: &str) -> Result<UserData> {
        let identity = self.active()?;
        let data = self.cache.unhide_post(&identity, hash)?;
        Ok(self.store_user_data(&identity, data))
    }

    /// Reconciles every queued refhash and stamps `last_flushed = now`.
    ///
    /// Confirmed hashes leave the queue; absent or unreachable ones stay.
    #[instrument(skip(self))]
    pub async fn flush_update_queue(&mut self, now: u64) -> Result<FlushReport> {
        let identity = self.active()?;
        let queue = self.cache.load(&identity).update_queue;
        let mut report = FlushReport::default();

        for queued in queue {
            let refhash = match RefHash::new(&queued) {
                Ok(refhash) => refhash,
                Err(_) => {
                    warn!(refhash = %queued, "dropping malformed queued refhash");
                    continue;
                }
            };
            match self.log.reconcile(&identity, &refhash).await {
                Ok(Reconciliation::Confirmed(_)) => report.confirmed.push(queued),
                Ok(Reconciliation::Absent(_)) => report.pending.push(queued),
                Err(e) => {
                    warn!(refhash = %queued, error = %e, "reconcile failed");
                    report.pending.push(queued);
                }
            }
        }

        let data = self
            .cache
            .finish_flush(&identity, report.pending.clone(), now)?;
        self.store_user_data(&identity, data);
        info!(
            confirmed = report.confirmed.len(),
            pending = report.pending.len(),
            "flushed update queue"
        );
        Ok(report)
    }
}

fn post_view(identity: &Identity, receipt: &AppendReceipt, record: PostRecord) -> PostView {
    PostView {
        hash: receipt.refhash.to_string(),
        creator: identity.username(),
        timestamp: receipt.timestamp,
        title: record.title,
        content: record.body,
        topic: record.topic,
        tags: record.tags,
        parent: record.reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relayer::MemoryRelayer;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn session() -> (Session<Arc<MemoryRelayer>, MemoryStore>, Arc<MemoryRelayer>) {
        let relayer = Arc::new(MemoryRelayer::new());
        let session = logged_in(relayer.clone(), &relayer);
        (session, relayer)
    }

    fn logged_in<R: Relayer>(relayer: R, upstream: &MemoryRelayer) -> Session<R, MemoryStore> {
        let mut session = Session::new(relayer, MemoryStore::new()).unwrap();
        let alice = Identity::new("alice").unwrap();
        let key = IdentityKey::generate();
        upstream.register_identity(&alice, key.public_key()).unwrap();
        session.add_tld(alice, key, &Password::new("pw")).unwrap();
        session
    }

    /// Refuses every moderation record at precommit.
    struct NoModeration(Arc<MemoryRelayer>);

    #[async_trait::async_trait]
    impl Relayer for NoModeration {
        async fn blob_offset(&self, identity: &Identity) -> Result<u64> {
            self.0.blob_offset(identity).await
        }

        async fn precommit(
            &self,
            request: &crate::log::PrecommitRequest,
        ) -> Result<crate::log::PrecommitResult> {
            if matches!(request.record, AppendRecord::Moderation(_)) {
                return Err(NomadError::rejected("moderation disabled"));
            }
            self.0.precommit(request).await
        }

        async fn commit(
            &self,
            request: &crate::log::CommitRequest,
        ) -> Result<crate::log::CommitResult> {
            self.0.commit(request).await
        }

        async fn has_record(&self, identity: &Identity, refhash: &RefHash) -> Result<bool> {
            self.0.has_record(identity, refhash).await
        }
    }

    #[tokio::test]
    async fn test_failed_setting_keeps_committed_post() {
        let upstream = Arc::new(MemoryRelayer::new());
        let mut session = logged_in(NoModeration(upstream.clone()), &upstream);
        let draft = DraftPost {
            body: "hello".into(),
            settings: vec![ModerationType::NoBlocks],
            ..Default::default()
        };

        let posted = session.send_post(draft).await.unwrap();
        assert_eq!(posted.failed_settings(), vec![ModerationType::NoBlocks]);
        assert!(matches!(
            posted.settings[0].1,
            Err(NomadError::RemoteRejected(_))
        ));

        let alice = Identity::new("alice").unwrap();
        let records = upstream.records(&alice).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].refhash, posted.post.refhash);
        assert!(session.state().post(posted.post.refhash.as_str()).is_some());
        assert!(session
            .state()
            .moderations(posted.post.refhash.as_str())
            .is_none());
    }

    #[tokio::test]
    async fn test_truncating_post_retry() {
        let (mut session, relayer) = session();
        let alice = Identity::new("alice").unwrap();
        relayer.seed_records(&alice, 4).unwrap();

        let posted = session
            .send_post_at(DraftPost::new("retry"), 2, true)
            .await
            .unwrap();
        assert_eq!(posted.post.offset, 2);
        assert!(posted.post.truncated);
        assert_eq!(posted.post.next_offset, 3);
        assert_eq!(relayer.records(&alice).unwrap().len(), 3);

        // Without truncation a position behind the tip is stale
        assert!(matches!(
            session.send_post_at(DraftPost::new("late"), 1, false).await,
            Err(NomadError::RemoteRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_post_with_settings() {
        let (mut session, relayer) = session();
        let draft = DraftPost {
            title: Some("hello".into()),
            body: "world".into(),
            settings: vec![ModerationType::NoBlocks, ModerationType::Like],
            ..Default::default()
        };
        let posted = session.send_post(draft).await.unwrap();
        assert!(posted.failed_settings().is_empty());
        let receipt = posted.post;

        let alice = Identity::new("alice").unwrap();
        assert_eq!(relayer.records(&alice).unwrap().len(), 2);
        let post = session.state().post(receipt.refhash.as_str()).unwrap();
        assert_eq!(post.title.as_deref(), Some("hello"));
        assert!(session
            .state()
            .moderations(receipt.refhash.as_str())
            .unwrap()
            .contains(&ModerationType::NoBlocks));
    }

    #[tokio::test]
    async fn test_reply_links_comment_and_clears_flag() {
        let (mut session, _) = session();
        let parent = session.send_post(DraftPost::new("root")).await.unwrap().post;
        let reply = session
            .send_reply(parent.refhash.as_str(), DraftPost::new("re"))
            .await
            .unwrap();

        assert!(!session.state().sending_replies);
        assert_eq!(
            session.state().comments(parent.refhash.as_str()),
            &[reply.refhash.to_string()]
        );
    }

    #[tokio::test]
    async fn test_reply_without_parent_is_rejected() {
        let (mut session, relayer) = session();
        assert!(matches!(
            session.send_reply("", DraftPost::new("re")).await,
            Err(NomadError::InvalidInput(_))
        ));
        let alice = Identity::new("alice").unwrap();
        assert!(relayer.records(&alice).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_blocks_writes() {
        let (mut session, _) = session();
        session.logout();
        assert!(!session.is_logged_in().unwrap());
        assert!(matches!(
            session.follow_user("bob").await,
            Err(NomadError::NoSigningKey)
        ));

        session.tld_login(&Password::new("pw")).unwrap();
        session.follow_user("bob").await.unwrap();
        assert!(session
            .state()
            .followings("alice.")
            .unwrap()
            .contains("bob."));
    }

    #[tokio::test]
    async fn test_unknown_commit_is_queued_and_flushed() {
        let (mut session, relayer) = session();
        relayer.drop_next_commit_response().unwrap();

        let err = session.like_post("abcd").await.unwrap_err();
        let refhash = match err {
            NomadError::CommitOutcomeUnknown { refhash, .. } => refhash,
            other => panic!("expected unknown outcome, got {:?}", other),
        };
        let queued = session.fetch_current_user_data().unwrap().update_queue;
        assert_eq!(queued, vec![refhash.clone()]);

        let report = session.flush_update_queue(1_000).await.unwrap();
        assert_eq!(report.confirmed, vec![refhash]);
        let data = session.fetch_current_user_data().unwrap();
        assert!(data.update_queue.is_empty());
        assert_eq!(data.last_flushed, 1_000);
    }

    #[test]
    fn test_views() {
        let (mut session, _) = session();
        let view = |title: &str| ViewDefinition {
            title: title.to_string(),
            ..Default::default()
        };
        session.create_view(view("a")).unwrap();
        session.create_view(view("b")).unwrap();
        let data = session.save_custom_view(view("B"), 1).unwrap();
        assert_eq!(data.saved_views[1].title, "B");

        assert!(matches!(
            session.save_custom_view(view("x"), 5),
            Err(NomadError::InvalidInput(_))
        ));
        assert_eq!(session.fetch_current_user_data().unwrap().saved_views.len(), 2);
    }

    #[test]
    fn test_new_session_restores_identity_locked() {
        let store = MemoryStore::new();
        let alice = Identity::new("alice").unwrap();
        EncryptedIdentityStore::new(store.clone())
            .persist_new_identity(&alice, &IdentityKey::generate(), &Password::new("pw"))
            .unwrap();

        let mut session = Session::new(MemoryRelayer::new(), store).unwrap();
        assert_eq!(session.current_identity(), Some(&alice));
        assert!(session.public_key_hex().is_none());
        assert!(matches!(
            session.tld_login(&Password::new("nope")),
            Err(NomadError::Decryption(_))
        ));
        assert!(session.tld_login(&Password::new("pw")).is_ok());
        assert!(session.public_key_hex().is_some());
    }
}
