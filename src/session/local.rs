use super::{is_valid_session_id, sort_newest_first, SessionStore, SessionSummary};
use crate::providers::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// On-disk shape of one conversation file.
#[derive(Debug, Serialize, Deserialize)]
struct ConversationFile {
    session_id: String,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// JSON files under `<data_dir>/conversations/<session_id>.json`.
///
/// Writes for the same session are serialized; different sessions write
/// concurrently. Each write goes to a temp file that is then renamed.
pub struct LocalSessionStore {
    conversations_dir: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalSessionStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            conversations_dir: data_dir.join("conversations"),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn conversations_dir(&self) -> &Path {
        &self.conversations_dir
    }

    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        if !is_valid_session_id(session_id) {
            tracing::warn!(session_id, "rejecting invalid session id");
            return None;
        }
        Some(self.conversations_dir.join(format!("{session_id}.json")))
    }

    fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    async fn write_file(&self, path: &Path, file: &ConversationFile) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.conversations_dir).await?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_file(path: &Path) -> anyhow::Result<Option<ConversationFile>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> bool {
        let Some(path) = self.path_for(session_id) else {
            return false;
        };
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let file = ConversationFile {
            session_id: session_id.to_string(),
            messages: messages.to_vec(),
            updated_at: Some(Utc::now()),
        };
        match self.write_file(&path, &file).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id, "Error saving conversation: {e}");
                false
            }
        }
    }

    async fn load(&self, session_id: &str) -> Vec<Message> {
        let Some(path) = self.path_for(session_id) else {
            return Vec::new();
        };
        match Self::read_file(&path).await {
            Ok(file) => file.map(|f| f.messages).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(session_id, "Error loading conversation: {e}");
                Vec::new()
            }
        }
    }

    async fn clear(&self, session_id: &str) -> bool {
        let Some(path) = self.path_for(session_id) else {
            return false;
        };
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(session_id, "Error clearing conversation: {e}");
                false
            }
        }
    }

    async fn list(&self) -> Vec<SessionSummary> {
        let mut entries = match tokio::fs::read_dir(&self.conversations_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Error listing conversations: {e}");
                return Vec::new();
            }
        };

        let mut summaries = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_file(&path).await {
                Ok(Some(file)) => summaries.push(SessionSummary {
                    session_id: file.session_id,
                    updated_at: file.updated_at,
                    message_count: file.messages.len(),
                }),
                Ok(None) => {}
                Err(e) => tracing::debug!(path = %path.display(), "skipping unreadable conversation: {e}"),
            }
        }

        sort_newest_first(&mut summaries);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolCall;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_writes_expected_file_shape() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path());
        assert!(store.save("abc", &[Message::user("hi")]).await);

        let raw = std::fs::read_to_string(dir.path().join("conversations/abc.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["session_id"], "abc");
        assert_eq!(value["messages"][0]["content"], "hi");
        assert!(value["updated_at"].as_str().is_some());
        assert!(!dir.path().join("conversations/abc.json.tmp").exists());
    }

    #[tokio::test]
    async fn round_trip_preserves_tool_links() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path());
        let messages = vec![
            Message::user("read it"),
            Message::assistant_tool_calls(
                "",
                vec![ToolCall::new("call_0", "Read", json!({"file_path": "a.rs"}))],
            ),
            Message::tool("{\"status\":\"success\"}", "call_0"),
            Message::assistant("done"),
        ];
        assert!(store.save("s", &messages).await);
        assert_eq!(store.load("s").await, messages);
    }

    #[tokio::test]
    async fn missing_or_corrupt_session_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path());
        assert!(store.load("nope").await.is_empty());

        std::fs::create_dir_all(store.conversations_dir()).unwrap();
        std::fs::write(store.conversations_dir().join("bad.json"), "{not json").unwrap();
        assert!(store.load("bad").await.is_empty());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_file_and_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path());
        store.save("gone", &[Message::user("x")]).await;
        assert!(store.clear("gone").await);
        assert!(!store.conversations_dir().join("gone.json").exists());
        assert!(store.clear("gone").await);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path());
        assert!(!store.save("../escape", &[Message::user("x")]).await);
        assert!(!dir.path().join("escape.json").exists());
        assert!(!store.clear("a/b").await);
    }

    #[tokio::test]
    async fn list_reports_counts_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = LocalSessionStore::new(dir.path());
        store.save("first", &[Message::user("a")]).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .save("second", &[Message::user("a"), Message::assistant("b")])
            .await;

        let list = store.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].session_id, "second");
        assert_eq!(list[0].message_count, 2);
        assert_eq!(list[1].session_id, "first");
    }

    #[tokio::test]
    async fn concurrent_saves_to_one_session_leave_valid_json() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalSessionStore::new(dir.path()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let messages: Vec<Message> = (0..=i).map(|n| Message::user(n.to_string())).collect();
                store.save("shared", &messages).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        let loaded = store.load("shared").await;
        assert!(!loaded.is_empty() && loaded.len() <= 8);
    }
}
