//! Persisted conversation history.
//!
//! A conversation is identified by its id and owned by one user. Every read
//! and write names the user, and a conversation of another user behaves as
//! if it did not exist. Saving replaces whatever the owner stored under
//! that id, so repeated saves of the same state are idempotent.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationMessage;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: None,
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Upsert the conversation under its id.
    ///
    /// Fails with [`CoreError::NotFound`] when the id is already taken by a
    /// conversation of another user; ownership never changes.
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// The conversation `conversation_id` of `user_id`, if that user owns it.
    async fn load(&self, user_id: &str, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Conversations of `user_id`, most recently updated first.
    async fn list(&self, user_id: &str, limit: Option<usize>, offset: usize)
        -> Result<Vec<Conversation>>;

    /// Set the title of an existing conversation.
    async fn set_title(&self, user_id: &str, conversation_id: &str, title: &str) -> Result<()>;

    /// Delete one conversation. Returns `false` when there was nothing to
    /// delete.
    async fn delete(&self, user_id: &str, conversation_id: &str) -> Result<bool>;

    /// Delete every conversation of `user_id`, returning how many went.
    async fn delete_all(&self, user_id: &str) -> Result<u64>;
}

fn not_owned(user_id: &str, conversation_id: &str) -> CoreError {
    CoreError::not_found(format!(
        "conversation {} for user {}",
        conversation_id, user_id
    ))
}

/// Sort most recently updated first, ties by id.
pub fn sort_recent_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
}

/// In-memory history for tests.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.conversations.write().unwrap();
        if let Some(existing) = conversations.get(&conversation.id) {
            if existing.user_id != conversation.user_id {
                return Err(not_owned(&conversation.user_id, &conversation.id));
            }
        }
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn load(&self, user_id: &str, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .conversations
            .read()
            .unwrap()
            .get(conversation_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn list(
        &self,
        user_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Conversation>> {
        let mut out: Vec<Conversation> = self
            .conversations
            .read()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        sort_recent_first(&mut out);
        Ok(out
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn set_title(&self, user_id: &str, conversation_id: &str, title: &str) -> Result<()> {
        let mut conversations = self.conversations.write().unwrap();
        let conversation = conversations
            .get_mut(conversation_id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| not_owned(user_id, conversation_id))?;
        conversation.title = Some(title.to_string());
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        let mut conversations = self.conversations.write().unwrap();
        let owned = conversations
            .get(conversation_id)
            .is_some_and(|c| c.user_id == user_id);
        if owned {
            conversations.remove(conversation_id);
        }
        Ok(owned)
    }

    async fn delete_all(&self, user_id: &str) -> Result<u64> {
        let mut conversations = self.conversations.write().unwrap();
        let before = conversations.len();
        conversations.retain(|_, c| c.user_id != user_id);
        Ok((before - conversations.len()) as u64)
    }
}
