use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use banter_types::api::HistoryPage;
use banter_types::error::ChatError;
use banter_types::models::{Message, MessageDraft, Reaction};

/// Which slice of history a query wants.
#[derive(Debug, Clone)]
pub enum HistoryFilter {
    /// Public messages posted to one room.
    Room(String),
    /// Private traffic between an unordered pair of usernames.
    Private { a: String, b: String },
}

impl HistoryFilter {
    fn matches(&self, message: &Message) -> bool {
        match self {
            HistoryFilter::Room(room) => {
                !message.is_private && message.room.as_deref() == Some(room.as_str())
            }
            HistoryFilter::Private { a, b } => {
                if !message.is_private {
                    return false;
                }
                let Some(recipient) = message.recipient.as_deref() else {
                    return false;
                };
                let sender = message.sender.as_str();
                (sender == a && recipient == b) || (sender == b && recipient == a)
            }
        }
    }
}

/// Append-only ordered message history.
///
/// Appends serialize on the write lock, so insertion order matches the
/// non-decreasing `created_at` order used for pagination.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    messages: Vec<Message>,
    /// id -> index into `messages`; indices stay valid because nothing
    /// is ever removed.
    by_id: HashMap<Uuid, usize>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Store a draft, assigning id and timestamp. Returns the stored
    /// record, which is the same value fanned out to recipients, so
    /// everyone sees one id.
    pub async fn append(&self, draft: MessageDraft) -> Message {
        let mut inner = self.inner.write().await;
        let message = Message {
            id: Uuid::new_v4(),
            text: draft.text,
            file_url: draft.file_url,
            sender: draft.sender,
            created_at: Utc::now(),
            room: draft.room,
            is_private: draft.is_private,
            recipient: draft.recipient,
            reactions: Vec::new(),
            read_by: Vec::new(),
            delivered_to: Vec::new(),
        };
        let idx = inner.messages.len();
        inner.by_id.insert(message.id, idx);
        inner.messages.push(message.clone());
        message
    }

    /// Append a reaction. Duplicates from the same user are allowed.
    pub async fn add_reaction(
        &self,
        message_id: Uuid,
        user: &str,
        reaction: &str,
    ) -> Result<Message, ChatError> {
        let mut inner = self.inner.write().await;
        let idx = *inner
            .by_id
            .get(&message_id)
            .ok_or(ChatError::NotFound(message_id))?;
        let message = &mut inner.messages[idx];
        message.reactions.push(Reaction {
            user: user.to_string(),
            reaction: reaction.to_string(),
        });
        Ok(message.clone())
    }

    /// Add `user` to the message's read set. Idempotent.
    pub async fn mark_read(&self, message_id: Uuid, user: &str) -> Result<Message, ChatError> {
        let mut inner = self.inner.write().await;
        let idx = *inner
            .by_id
            .get(&message_id)
            .ok_or(ChatError::NotFound(message_id))?;
        let message = &mut inner.messages[idx];
        if !message.read_by.iter().any(|u| u == user) {
            message.read_by.push(user.to_string());
        }
        Ok(message.clone())
    }

    /// Record that a connection was handed the message. Idempotent; a
    /// missing id is a no-op since delivery bookkeeping never fails the
    /// event that triggered it.
    pub async fn mark_delivered(&self, message_id: Uuid, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(&idx) = inner.by_id.get(&message_id) {
            let message = &mut inner.messages[idx];
            if !message.delivered_to.contains(&conn_id) {
                message.delivered_to.push(conn_id);
            }
        }
    }

    pub async fn get(&self, message_id: Uuid) -> Result<Message, ChatError> {
        let inner = self.inner.read().await;
        let idx = *inner
            .by_id
            .get(&message_id)
            .ok_or(ChatError::NotFound(message_id))?;
        Ok(inner.messages[idx].clone())
    }

    /// Paginated lookup. Page 1 is the newest `page_size` records;
    /// items within a page run oldest to newest. Pages past the end
    /// come back partial or empty rather than erroring.
    pub async fn query(&self, filter: &HistoryFilter, page: usize, page_size: usize) -> HistoryPage {
        let inner = self.inner.read().await;
        let matching: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| filter.matches(m))
            .collect();
        let total = matching.len();

        let page = page.max(1);
        let page_size = page_size.max(1);
        let end = total.saturating_sub((page - 1).saturating_mul(page_size));
        let start = end.saturating_sub(page_size);
        let items = matching[start..end].iter().map(|m| (*m).clone()).collect();

        HistoryPage { items, total }
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
