//! Per-conversation bounded message history.
//!
//! Invariants enforced here:
//! 1. once a system entry exists it sits at index 0 and is never evicted;
//! 2. total length never exceeds the cap; eviction keeps the system entry
//!    plus the most recent entries;
//! 3. a failed turn can remove exactly the user entry it appended.
//!
//! Locking is per conversation: the outer map lock is held only for entry
//! lookup, mutation happens under the conversation's own mutex.

use crate::types::{ChatMessage, ChatRole, ConversationId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

type Entry = Arc<Mutex<Vec<ChatMessage>>>;

/// In-memory conversation store. Lives for the process lifetime; cleared
/// per conversation by the administrative `clear` operation.
pub struct ConversationStore {
    cap: usize,
    conversations: std::sync::Mutex<HashMap<ConversationId, Entry>>,
}

impl ConversationStore {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(2),
            conversations: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, id: ConversationId) -> Entry {
        let mut map = self.conversations.lock().expect("conversation map poisoned");
        map.entry(id).or_default().clone()
    }

    /// Install the pinned system entry if this conversation has none yet.
    pub async fn ensure_system(&self, id: ConversationId, system_prompt: &str) {
        let entry = self.entry(id);
        let mut messages = entry.lock().await;
        if messages.is_empty() {
            messages.push(ChatMessage::new(ChatRole::System, system_prompt));
        }
    }

    /// Append one message and re-apply the cap invariant.
    pub async fn append(&self, id: ConversationId, role: ChatRole, text: &str) {
        let entry = self.entry(id);
        let mut messages = entry.lock().await;
        messages.push(ChatMessage::new(role, text));
        truncate_to_cap(&mut messages, self.cap);
    }

    /// Clone of the current history, for handing to generation.
    pub async fn snapshot(&self, id: ConversationId) -> Vec<ChatMessage> {
        let entry = self.entry(id);
        let messages = entry.lock().await;
        messages.clone()
    }

    /// Remove the most recent entry iff it is a user turn. Called when a
    /// turn fails after its user entry was appended, so history never keeps
    /// an orphaned user message.
    pub async fn rollback_last_user(&self, id: ConversationId) {
        let entry = self.entry(id);
        let mut messages = entry.lock().await;
        if messages.last().map(|m| m.role) == Some(ChatRole::User) {
            messages.pop();
        }
    }

    /// Drop the conversation entirely (administrative reset).
    pub fn clear(&self, id: ConversationId) {
        let mut map = self.conversations.lock().expect("conversation map poisoned");
        map.remove(&id);
    }

    pub async fn len(&self, id: ConversationId) -> usize {
        let entry = self.entry(id);
        let n = entry.lock().await.len();
        n
    }
}

/// Keep the pinned system entry and the most recent `cap - 1` others.
fn truncate_to_cap(messages: &mut Vec<ChatMessage>, cap: usize) {
    if messages.len() <= cap {
        return;
    }
    let overflow = messages.len() - cap;
    if messages.first().map(|m| m.role) == Some(ChatRole::System) {
        messages.drain(1..1 + overflow);
    } else {
        messages.drain(..overflow);
    }
}
