//! Conversation persistence.
//!
//! The agent saves its full message history after every append through a
//! [`SessionStore`]. Storage failures are reported as `false` / empty results
//! and logged; they never abort a turn.

pub mod local;

pub use local::LocalSessionStore;

use crate::providers::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata about a stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub message_count: usize,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Replace the stored history of `session_id`.
    async fn save(&self, session_id: &str, messages: &[Message]) -> bool;

    /// Stored history, or empty when absent or unreadable.
    async fn load(&self, session_id: &str) -> Vec<Message>;

    /// Remove the stored history. Removing an absent session succeeds.
    async fn clear(&self, session_id: &str) -> bool;

    /// All stored sessions, most recently updated first.
    async fn list(&self) -> Vec<SessionSummary>;
}

/// Fresh random session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Ids become file names, so only a conservative alphabet is accepted.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !session_id.starts_with('.')
}

pub(crate) fn sort_newest_first(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Process-local store, used when persistence is disabled and in tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, (Vec<Message>, DateTime<Utc>)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> bool {
        self.sessions
            .lock()
            .insert(session_id.to_string(), (messages.to_vec(), Utc::now()));
        true
    }

    async fn load(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|(messages, _)| messages.clone())
            .unwrap_or_default()
    }

    async fn clear(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id);
        true
    }

    async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, (messages, updated_at))| SessionSummary {
                session_id: id.clone(),
                updated_at: Some(*updated_at),
                message_count: messages.len(),
            })
            .collect();
        sort_newest_first(&mut summaries);
        summaries
    }
}
