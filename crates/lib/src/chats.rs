//! Chat-send bookkeeping: maps each `POST /api/chat` (by chat id) to the conversation it used or created,
//! so the client can adopt the id directly instead of guessing from list order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Entries kept before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 256;

/// Response of `GET /api/chat/{chat_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStatus {
    pub chat_id: String,
    /// True once the reply stream has finished and the log store has been read.
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, ChatStatus>,
    order: VecDeque<String>,
}

/// Bounded in-memory registry of chat sends.
pub struct ChatRegistry {
    inner: Arc<RwLock<Inner>>,
    capacity: usize,
}

impl Default for ChatRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChatRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            capacity: capacity.max(1),
        }
    }

    /// Record a new send; `conversation_id` is known up front when the client continued a conversation.
    pub async fn start(&self, conversation_id: Option<String>) -> String {
        let chat_id = format!("chat-{}", uuid::Uuid::new_v4());
        let mut g = self.inner.write().await;
        while g.order.len() >= self.capacity {
            if let Some(old) = g.order.pop_front() {
                g.entries.remove(&old);
            }
        }
        g.entries.insert(
            chat_id.clone(),
            ChatStatus {
                chat_id: chat_id.clone(),
                done: false,
                conversation_id,
            },
        );
        g.order.push_back(chat_id.clone());
        chat_id
    }

    /// Mark a send finished. A resolved id only fills in a missing one; it never replaces the id the client sent.
    pub async fn complete(&self, chat_id: &str, conversation_id: Option<String>) {
        let mut g = self.inner.write().await;
        if let Some(entry) = g.entries.get_mut(chat_id) {
            entry.done = true;
            if entry.conversation_id.is_none() {
                entry.conversation_id = conversation_id;
            }
        }
    }

    pub async fn get(&self, chat_id: &str) -> Option<ChatStatus> {
        self.inner.read().await.entries.get(chat_id).cloned()
    }
}
