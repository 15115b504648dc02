//! JSON-file message store
//!
//! One file per project (`<base_dir>/<project_id>.json`) holding the whole
//! conversation as an array.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{append, newest_first, Message, MessageStore, NewMessage, StoreError};

/// Message storage backed by JSON files
pub struct JsonMessageStore {
    /// Base directory for project files
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonMessageStore {
    /// Create a new message store
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the file path for a project
    fn project_path(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidProjectId(project_id.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", project_id)))
    }

    async fn load(&self, project_id: &str) -> Result<Vec<Message>, StoreError> {
        let path = self.project_path(project_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, project_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let path = self.project_path(project_id)?;
        let json = serde_json::to_string_pretty(messages)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for JsonMessageStore {
    async fn recent_messages(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.load(project_id).await?;
        Ok(newest_first(&messages, limit))
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let _guard = self.write_lock.lock().await;
        let project_id = message.project_id.clone();
        let mut messages = self.load(&project_id).await?;
        let created = append(&mut messages, message);
        self.save(&project_id, &messages).await?;
        Ok(created)
    }
}
