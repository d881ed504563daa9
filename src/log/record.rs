//! Records appended to an identity's log.
//!
//! Every mutating action produces exactly one [`AppendRecord`]. On the wire a
//! record is externally tagged, so a request body carries one of `post`,
//! `connection` or `moderation` next to the identity and offset.

use crate::error::{NomadError, Result};
use crate::identity::dot_name;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum post body size in bytes.
pub const MAX_POST_BODY_SIZE: usize = 64 * 1024;

/// Maximum post title length in bytes.
pub const MAX_TITLE_SIZE: usize = 512;

/// Maximum number of tags on a post.
pub const MAX_TAGS: usize = 32;

/// Kind of a record, as seen by readers of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Post,
    Follow,
    Block,
    Like,
    Moderation,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Post => "POST",
            RecordKind::Follow => "FOLLOW",
            RecordKind::Block => "BLOCK",
            RecordKind::Like => "LIKE",
            RecordKind::Moderation => "MODERATION",
        };
        f.write_str(name)
    }
}

/// A post or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    /// Parent post hash; set for replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PostRecord {
    /// A top-level post.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            title: None,
            body: body.into(),
            reference: None,
            topic: None,
            tags: Vec::new(),
        }
    }

    /// A reply to `parent`. The parent hash must be non-empty.
    pub fn reply(parent: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        let parent = parent.into();
        if parent.trim().is_empty() {
            return Err(NomadError::invalid_input("Reply requires a parent reference"));
        }
        Ok(Self {
            reference: Some(parent),
            ..Self::new(body)
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// True when this post answers another post.
    pub fn is_reply(&self) -> bool {
        self.reference.as_deref().is_some_and(|r| !r.is_empty())
    }

    fn validate(&self) -> Result<()> {
        let has_title = self.title.as_deref().is_some_and(|t| !t.trim().is_empty());
        if self.body.trim().is_empty() && !has_title {
            return Err(NomadError::invalid_input("Post needs a title or a body"));
        }
        if self.body.len() > MAX_POST_BODY_SIZE {
            return Err(NomadError::invalid_input(format!(
                "Post body exceeds maximum size of {} bytes",
                MAX_POST_BODY_SIZE
            )));
        }
        if self.title.as_ref().is_some_and(|t| t.len() > MAX_TITLE_SIZE) {
            return Err(NomadError::invalid_input(format!(
                "Post title exceeds maximum size of {} bytes",
                MAX_TITLE_SIZE
            )));
        }
        if self.tags.len() > MAX_TAGS {
            return Err(NomadError::invalid_input(format!(
                "Post cannot carry more than {} tags",
                MAX_TAGS
            )));
        }
        if self.reference.as_deref() == Some("") {
            return Err(NomadError::invalid_input("Reply reference cannot be empty"));
        }
        Ok(())
    }
}

/// Connection subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Follow,
    Block,
}

/// A follow or block of another identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    /// Target top-level name.
    pub tld: String,
}

impl ConnectionRecord {
    pub fn follow(target_tld: &str) -> Self {
        Self {
            connection_type: ConnectionType::Follow,
            tld: dot_name(target_tld),
        }
    }

    pub fn block(target_tld: &str) -> Self {
        Self {
            connection_type: ConnectionType::Block,
            tld: dot_name(target_tld),
        }
    }
}

/// Moderation subtype. `Like` is the distinguished one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModerationType {
    #[serde(rename = "LIKE")]
    Like,
    /// Blocked identities may not reply to the referenced post.
    #[serde(rename = "SETTINGS__NO_BLOCKS")]
    NoBlocks,
    /// Only followed identities may reply to the referenced post.
    #[serde(rename = "SETTINGS__FOLLOWS_ONLY")]
    FollowsOnly,
}

impl ModerationType {
    /// Settings subtypes are attached to a post right after it is committed.
    pub fn is_post_setting(&self) -> bool {
        matches!(self, ModerationType::NoBlocks | ModerationType::FollowsOnly)
    }
}

/// A like or moderation flag on a referenced record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRecord {
    #[serde(rename = "type")]
    pub moderation_type: ModerationType,
    pub reference: String,
}

impl ModerationRecord {
    pub fn new(reference: impl Into<String>, moderation_type: ModerationType) -> Self {
        Self {
            moderation_type,
            reference: reference.into(),
        }
    }

    pub fn like(reference: impl Into<String>) -> Self {
        Self::new(reference, ModerationType::Like)
    }
}

/// One record appended per write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendRecord {
    Post(PostRecord),
    Connection(ConnectionRecord),
    Moderation(ModerationRecord),
}

impl AppendRecord {
    /// The reader-facing kind of this record.
    pub fn kind(&self) -> RecordKind {
        match self {
            AppendRecord::Post(_) => RecordKind::Post,
            AppendRecord::Connection(c) => match c.connection_type {
                ConnectionType::Follow => RecordKind::Follow,
                ConnectionType::Block => RecordKind::Block,
            },
            AppendRecord::Moderation(m) => match m.moderation_type {
                ModerationType::Like => RecordKind::Like,
                _ => RecordKind::Moderation,
            },
        }
    }

    /// Checks the shape constraints every relayer enforces.
    pub fn validate(&self) -> Result<()> {
        match self {
            AppendRecord::Post(post) => post.validate(),
            AppendRecord::Connection(conn) => {
                if conn.tld.trim_end_matches('.').is_empty() {
                    return Err(NomadError::invalid_input("Connection target cannot be empty"));
                }
                Ok(())
            }
            AppendRecord::Moderation(m) => {
                if m.reference.trim().is_empty() {
                    return Err(NomadError::invalid_input(
                        "Moderation record requires a reference",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Canonical bytes used for content addressing.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| NomadError::serialization(format!("Failed to encode record: {}", e)))
    }
}

impl From<PostRecord> for AppendRecord {
    fn from(post: PostRecord) -> Self {
        AppendRecord::Post(post)
    }
}

impl From<ConnectionRecord> for AppendRecord {
    fn from(conn: ConnectionRecord) -> Self {
        AppendRecord::Connection(conn)
    }
}

impl From<ModerationRecord> for AppendRecord {
    fn from(m: ModerationRecord) -> Self {
        AppendRecord::Moderation(m)
    }
}
