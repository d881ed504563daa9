//! Per-identity local preferences.
//!
//! Each identity has one JSON document stored under
//! `nomad-userdata:<username>`. Loading never fails: a missing or corrupt
//! document yields defaults, and malformed entries inside an otherwise valid
//! document are dropped one by one. Updates are shallow merges that replace
//! whole collections.

use crate::error::{NomadError, Result};
use crate::identity::Identity;
use crate::storage::{user_data_key, KeyValueStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

// =============================================================================
// Documents
// =============================================================================

/// Filter of a saved view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFilter {
    #[serde(default)]
    pub posted_by: Vec<String>,
    #[serde(default)]
    pub replied_by: Vec<String>,
    #[serde(default)]
    pub liked_by: Vec<String>,
    #[serde(default)]
    pub allowed_tags: Vec<String>,
}

/// A user-defined feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    pub title: String,
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub filter: ViewFilter,
}

/// Local preferences of one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub muted_names: BTreeSet<String>,
    pub hidden_post_hashes: BTreeSet<String>,
    pub saved_views: Vec<ViewDefinition>,
    /// Refhashes of commits whose outcome is pending reconciliation.
    pub update_queue: Vec<String>,
    /// Unix milliseconds of the last queue flush; 0 if never.
    pub last_flushed: u64,
}

/// A partial update. `None` fields keep their old value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDataPatch {
    pub muted_names: Option<BTreeSet<String>>,
    pub hidden_post_hashes: Option<BTreeSet<String>>,
    pub saved_views: Option<Vec<ViewDefinition>>,
    pub update_queue: Option<Vec<String>>,
    pub last_flushed: Option<u64>,
}

impl UserData {
    /// Shallow merge: present collections replace the old ones (an empty
    /// collection clears it), and `last_flushed` only changes to a non-zero
    /// value.
    pub fn extend(&self, patch: UserDataPatch) -> UserData {
        UserData {
            muted_names: patch.muted_names.unwrap_or_else(|| self.muted_names.clone()),
            hidden_post_hashes: patch
                .hidden_post_hashes
                .unwrap_or_else(|| self.hidden_post_hashes.clone()),
            saved_views: patch.saved_views.unwrap_or_else(|| self.saved_views.clone()),
            update_queue: patch.update_queue.unwrap_or_else(|| self.update_queue.clone()),
            last_flushed: patch
                .last_flushed
                .filter(|&t| t != 0)
                .unwrap_or(self.last_flushed),
        }
    }
}

/// How a stored document was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Nothing stored; defaults returned.
    Missing,
    /// Parsed as-is.
    Clean,
    /// Parsed after dropping malformed entries.
    Repaired { dropped: usize },
    /// Unreadable; defaults returned.
    Corrupt,
}

// =============================================================================
// Parsing
// =============================================================================

/// Field-by-field reader that counts what it had to drop.
#[derive(Default)]
struct Repair {
    dropped: usize,
}

impl Repair {
    fn strings(&mut self, value: Option<&Value>) -> Vec<String> {
        match value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    _ => {
                        self.dropped += 1;
                        None
                    }
                })
                .collect(),
            Some(_) => {
                self.dropped += 1;
                Vec::new()
            }
        }
    }

    fn string(&mut self, value: Option<&Value>) -> Option<String> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.dropped += 1;
                None
            }
        }
    }

    fn view(&mut self, value: &Value) -> Option<ViewDefinition> {
        let obj = match value {
            Value::Object(obj) => obj,
            Value::Null | Value::Bool(false) => return None,
            _ => {
                self.dropped += 1;
                return None;
            }
        };
        let Some(title) = self.string(obj.get("title")) else {
            self.dropped += 1;
            return None;
        };
        let filter = match obj.get("filter") {
            Some(Value::Object(f)) => ViewFilter {
                posted_by: self.strings(f.get("postedBy")),
                replied_by: self.strings(f.get("repliedBy")),
                liked_by: self.strings(f.get("likedBy")),
                allowed_tags: self.strings(f.get("allowedTags")),
            },
            None | Some(Value::Null) => ViewFilter::default(),
            Some(_) => {
                self.dropped += 1;
                ViewFilter::default()
            }
        };
        Some(ViewDefinition {
            title,
            heading: self.string(obj.get("heading")).unwrap_or_default(),
            icon_url: self.string(obj.get("iconUrl")).unwrap_or_default(),
            filter,
        })
    }

    fn timestamp(&mut self, value: Option<&Value>) -> u64 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
                (Some(t), _) => t,
                (None, Some(f)) if f.is_finite() && f >= 0.0 => f as u64,
                _ => {
                    self.dropped += 1;
                    0
                }
            },
            Some(_) => {
                self.dropped += 1;
                0
            }
        }
    }

    fn document(&mut self, obj: &Map<String, Value>) -> UserData {
        let saved_views = match obj.get("savedViews") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(views)) => views.iter().filter_map(|v| self.view(v)).collect(),
            Some(_) => {
                self.dropped += 1;
                Vec::new()
            }
        };
        UserData {
            muted_names: self.strings(obj.get("mutedNames")).into_iter().collect(),
            hidden_post_hashes: self
                .strings(obj.get("hiddenPostHashes"))
                .into_iter()
                .collect(),
            saved_views,
            update_queue: self.strings(obj.get("updateQueue")),
            last_flushed: self.timestamp(obj.get("lastFlushed")),
        }
    }
}

/// Reads a stored document, returning it with the number of dropped entries.
///
/// Fails with `CacheCorruption` when the text is not JSON or not an object.
fn read_document(raw: &str) -> Result<(UserData, usize)> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| NomadError::CacheCorruption(format!("not JSON: {}", e)))?;
    match value {
        Value::Object(obj) => {
            let mut repair = Repair::default();
            let data = repair.document(&obj);
            Ok((data, repair.dropped))
        }
        Value::Null => Ok((UserData::default(), 0)),
        other => Err(NomadError::CacheCorruption(format!(
            "expected an object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn status_of(dropped: usize) -> CacheStatus {
    match dropped {
        0 => CacheStatus::Clean,
        dropped => CacheStatus::Repaired { dropped },
    }
}

/// Parses a stored document, never failing.
pub fn parse_user_data(raw: &str) -> (UserData, CacheStatus) {
    match read_document(raw) {
        Ok((data, dropped)) => (data, status_of(dropped)),
        Err(_) => (UserData::default(), CacheStatus::Corrupt),
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Reads and writes user data documents.
#[derive(Debug, Clone)]
pub struct LocalUserCache<S> {
    store: S,
}

impl<S: KeyValueStore> LocalUserCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads the document of `identity`, falling back to defaults.
    pub fn load(&self, identity: &Identity) -> UserData {
        self.load_with_status(identity).0
    }

    /// Like [`load`](Self::load), also reporting how the document was read.
    pub fn load_with_status(&self, identity: &Identity) -> (UserData, CacheStatus) {
        let key = user_data_key(&identity.username());
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return (UserData::default(), CacheStatus::Missing),
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read user data, using defaults");
                return (UserData::default(), CacheStatus::Corrupt);
            }
        };
        match read_document(&raw) {
            Ok((data, 0)) => {
                debug!(key = %key, "loaded user data");
                (data, CacheStatus::Clean)
            }
            Ok((data, dropped)) => {
                warn!(key = %key, dropped, "dropped malformed user data entries");
                (data, status_of(dropped))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt user data, using defaults");
                (UserData::default(), CacheStatus::Corrupt)
            }
        }
    }

    /// Persists `data` for `identity`.
    pub fn save(&self, identity: &Identity, data: &UserData) -> Result<()> {
        let raw = serde_json::to_string(data)?;
        self.store.set(&user_data_key(&identity.username()), &raw)
    }

    /// Load, merge, save. Returns the stored document.
    pub fn extend(&self, identity: &Identity, patch: UserDataPatch) -> Result<UserData> {
        let data = self.load(identity).extend(patch);
        self.save(identity, &data)?;
        Ok(data)
    }

    pub fn mute_name(&self, identity: &Identity, name: &str) -> Result<UserData> {
        let mut muted = self.load(identity).muted_names;
        muted.insert(name.to_string());
        self.extend(
            identity,
            UserDataPatch {
                muted_names: Some(muted),
                ..Default::default()
            },
        )
    }

    pub fn unmute_name(&self, identity: &Identity, name: &str) -> Result<UserData> {
        let mut muted = self.load(identity).muted_names;
        muted.remove(name);
        self.extend(
            identity,
            UserDataPatch {
                muted_names: Some(muted),
                ..Default::default()
            },
        )
    }

    pub fn hide_post(&self, identity: &Identity, hash: &str) -> Result<UserData> {
        let mut hidden = self.load(identity).hidden_post_hashes;
        hidden.insert(hash.to_string());
        self.extend(
            identity,
            UserDataPatch {
                hidden_post_hashes: Some(hidden),
                ..Default::default()
            },
        )
    }

    pub fn unhide_post(&self, identity: &Identity, hash: &str) -> Result<UserData> {
        let mut hidden = self.load(identity).hidden_post_hashes;
        hidden.remove(hash);
        self.extend(
            identity,
            UserDataPatch {
                hidden_post_hashes: Some(hidden),
                ..Default::default()
            },
        )
    }

    /// Queues a refhash for reconciliation. Already queued hashes are kept once.
    pub fn enqueue_update(&self, identity: &Identity, refhash: &str) -> Result<UserData> {
        let mut queue = self.load(identity).update_queue;
        if !queue.iter().any(|q| q == refhash) {
            queue.push(refhash.to_string());
        }
        self.extend(
            identity,
            UserDataPatch {
                update_queue: Some(queue),
                ..Default::default()
            },
        )
    }

    /// Replaces the queue with `remaining` and stamps the flush time.
    pub fn finish_flush(
        &self,
        identity: &Identity,
        remaining: Vec<String>,
        now: u64,
    ) -> Result<UserData> {
        self.extend(
            identity,
            UserDataPatch {
                update_queue: Some(remaining),
                last_flushed: Some(now),
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn alice() -> Identity {
        Identity::new("alice").unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extend_replaces_collections() {
        let old = UserData {
            muted_names: set(&["a"]),
            last_flushed: 5,
            ..Default::default()
        };
        let new = old.extend(UserDataPatch {
            muted_names: Some(BTreeSet::new()),
            last_flushed: Some(0),
            ..Default::default()
        });
        assert!(new.muted_names.is_empty());
        assert_eq!(new.last_flushed, 5);
    }

    #[test]
    fn test_extend_keeps_absent_fields() {
        let old = UserData {
            hidden_post_hashes: set(&["h1"]),
            update_queue: vec!["r1".into()],
            ..Default::default()
        };
        let new = old.extend(UserDataPatch {
            muted_names: Some(set(&["x"])),
            last_flushed: Some(9),
            ..Default::default()
        });
        assert_eq!(new.hidden_post_hashes, set(&["h1"]));
        assert_eq!(new.update_queue, vec!["r1".to_string()]);
        assert_eq!(new.muted_names, set(&["x"]));
        assert_eq!(new.last_flushed, 9);
    }

    #[test]
    fn test_parse_drops_non_strings() {
        let (data, status) = parse_user_data(r#"{"mutedNames":["a",3,"b"]}"#);
        assert_eq!(data.muted_names, set(&["a", "b"]));
        assert_eq!(status, CacheStatus::Repaired { dropped: 1 });
    }

    #[test]
    fn test_parse_drops_null_views() {
        let raw = r#"{"savedViews":[null,{"title":"Tech","filter":{"allowedTags":["rust",1]}},{"heading":"no title"}]}"#;
        let (data, status) = parse_user_data(raw);
        assert_eq!(data.saved_views.len(), 1);
        assert_eq!(data.saved_views[0].title, "Tech");
        assert_eq!(data.saved_views[0].filter.allowed_tags, vec!["rust".to_string()]);
        assert_eq!(status, CacheStatus::Repaired { dropped: 2 });
    }

    #[test]
    fn test_parse_garbage_yields_defaults() {
        assert_eq!(
            parse_user_data("not json"),
            (UserData::default(), CacheStatus::Corrupt)
        );
        assert_eq!(
            parse_user_data("[1,2]"),
            (UserData::default(), CacheStatus::Corrupt)
        );
        assert_eq!(
            parse_user_data("null"),
            (UserData::default(), CacheStatus::Clean)
        );
    }

    #[test]
    fn test_corruption_cause() {
        match read_document("[1,2]") {
            Err(NomadError::CacheCorruption(cause)) => assert!(cause.contains("an array")),
            other => panic!("expected cache corruption, got {:?}", other),
        }
        assert!(matches!(
            read_document("{oops"),
            Err(NomadError::CacheCorruption(_))
        ));
        assert_eq!(read_document(r#"{"mutedNames":[1]}"#).unwrap().1, 1);
    }

    #[test]
    fn test_parse_wrong_field_type_defaults_that_field() {
        let (data, status) =
            parse_user_data(r#"{"mutedNames":"abc","hiddenPostHashes":["h"],"lastFlushed":"x"}"#);
        assert!(data.muted_names.is_empty());
        assert_eq!(data.hidden_post_hashes, set(&["h"]));
        assert_eq!(data.last_flushed, 0);
        assert_eq!(status, CacheStatus::Repaired { dropped: 2 });
    }

    #[test]
    fn test_load_missing_and_save() {
        let cache = LocalUserCache::new(MemoryStore::new());
        assert_eq!(
            cache.load_with_status(&alice()),
            (UserData::default(), CacheStatus::Missing)
        );

        let data = UserData {
            muted_names: set(&["spam."]),
            last_flushed: 1_700_000_000_000,
            ..Default::default()
        };
        cache.save(&alice(), &data).unwrap();
        assert_eq!(cache.load_with_status(&alice()), (data, CacheStatus::Clean));
    }

    #[test]
    fn test_documents_are_per_identity() {
        let cache = LocalUserCache::new(MemoryStore::new());
        let bob = Identity::with_subdomain("alice", "bob").unwrap();
        cache.mute_name(&alice(), "x.").unwrap();
        assert!(cache.load(&bob).muted_names.is_empty());
    }

    #[test]
    fn test_mute_hide_helpers() {
        let cache = LocalUserCache::new(MemoryStore::new());
        cache.mute_name(&alice(), "troll.").unwrap();
        cache.hide_post(&alice(), "h1").unwrap();
        cache.hide_post(&alice(), "h2").unwrap();
        let data = cache.unhide_post(&alice(), "h1").unwrap();
        assert_eq!(data.muted_names, set(&["troll."]));
        assert_eq!(data.hidden_post_hashes, set(&["h2"]));

        let data = cache.unmute_name(&alice(), "troll.").unwrap();
        assert!(data.muted_names.is_empty());
    }

    #[test]
    fn test_enqueue_update_is_idempotent() {
        let cache = LocalUserCache::new(MemoryStore::new());
        cache.enqueue_update(&alice(), "r1").unwrap();
        cache.enqueue_update(&alice(), "r2").unwrap();
        let data = cache.enqueue_update(&alice(), "r1").unwrap();
        assert_eq!(data.update_queue, vec!["r1".to_string(), "r2".to_string()]);

        let data = cache.finish_flush(&alice(), vec![], 42).unwrap();
        assert!(data.update_queue.is_empty());
        assert_eq!(data.last_flushed, 42);
    }

    #[test]
    fn test_corrupt_document_is_recovered_on_next_save() {
        let kv = MemoryStore::new();
        kv.set(&user_data_key("alice."), "{oops").unwrap();
        let cache = LocalUserCache::new(kv.clone());
        assert_eq!(cache.load_with_status(&alice()).1, CacheStatus::Corrupt);

        cache.hide_post(&alice(), "h").unwrap();
        assert_eq!(cache.load_with_status(&alice()).1, CacheStatus::Clean);
    }
}
