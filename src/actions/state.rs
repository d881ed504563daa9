//! In-memory view state updated after successful actions.

use crate::cache::UserData;
use crate::log::ModerationType;
use std::collections::{BTreeSet, HashMap};

/// A post as the local view knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostView {
    pub hash: String,
    /// Username of the author.
    pub creator: String,
    pub timestamp: u64,
    pub title: Option<String>,
    pub content: String,
    pub topic: Option<String>,
    pub tags: Vec<String>,
    /// Parent hash for comments.
    pub parent: Option<String>,
}

impl PostView {
    pub fn is_comment(&self) -> bool {
        self.parent.is_some()
    }
}

/// Everything the client has learned from its own actions.
#[derive(Debug, Default)]
pub struct ViewState {
    posts: HashMap<String, PostView>,
    comments: HashMap<String, Vec<String>>,
    followings: HashMap<String, BTreeSet<String>>,
    blocks: HashMap<String, BTreeSet<String>>,
    likes: HashMap<String, BTreeSet<String>>,
    like_counts: HashMap<String, u64>,
    moderations: HashMap<String, BTreeSet<ModerationType>>,
    user_data: HashMap<String, UserData>,
    /// Set while a reply is in flight.
    pub sending_replies: bool,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_post(&mut self, post: PostView) {
        self.posts.insert(post.hash.clone(), post);
    }

    pub fn post(&self, hash: &str) -> Option<&PostView> {
        self.posts.get(hash)
    }

    /// Inserts a comment and links it under its parent.
    pub fn insert_comment(&mut self, post: PostView) {
        if let Some(parent) = post.parent.clone() {
            let list = self.comments.entry(parent).or_default();
            if !list.contains(&post.hash) {
                list.push(post.hash.clone());
            }
        }
        self.insert_post(post);
    }

    /// Comment hashes under `parent`, oldest first.
    pub fn comments(&self, parent: &str) -> &[String] {
        self.comments.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_following(&mut self, user: &str, target: &str) {
        self.followings
            .entry(user.to_string())
            .or_default()
            .insert(target.to_string());
    }

    pub fn followings(&self, user: &str) -> Option<&BTreeSet<String>> {
        self.followings.get(user)
    }

    pub fn add_block(&mut self, user: &str, target: &str) {
        self.blocks
            .entry(user.to_string())
            .or_default()
            .insert(target.to_string());
    }

    pub fn blocks(&self, user: &str) -> Option<&BTreeSet<String>> {
        self.blocks.get(user)
    }

    /// Records a like and bumps the post's like count.
    pub fn add_like(&mut self, user: &str, reference: &str) {
        self.likes
            .entry(user.to_string())
            .or_default()
            .insert(reference.to_string());
        *self.like_counts.entry(reference.to_string()).or_insert(0) += 1;
    }

    pub fn likes(&self, user: &str) -> Option<&BTreeSet<String>> {
        self.likes.get(user)
    }

    pub fn like_count(&self, reference: &str) -> u64 {
        self.like_counts.get(reference).copied().unwrap_or(0)
    }

    pub fn add_moderation(&mut self, reference: &str, moderation: ModerationType) {
        self.moderations
            .entry(reference.to_string())
            .or_default()
            .insert(moderation);
    }

    pub fn moderations(&self, reference: &str) -> Option<&BTreeSet<ModerationType>> {
        self.moderations.get(reference)
    }

    pub fn set_user_data(&mut self, username: &str, data: UserData) {
        self.user_data.insert(username.to_string(), data);
    }

    pub fn user_data(&self, username: &str) -> Option<&UserData> {
        self.user_data.get(username)
    }
}
