//! In-memory message store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{append, newest_first, Message, MessageStore, NewMessage, StoreError};

/// Message store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    projects: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages of a project in creation order
    pub async fn messages(&self, project_id: &str) -> Vec<Message> {
        self.projects
            .lock()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn recent_messages(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let projects = self.projects.lock().await;
        Ok(projects
            .get(project_id)
            .map(|messages| newest_first(messages, limit))
            .unwrap_or_default())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut projects = self.projects.lock().await;
        let messages = projects.entry(message.project_id.clone()).or_default();
        Ok(append(messages, message))
    }
}
