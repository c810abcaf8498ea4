//! Conversation history collaborator
//!
//! Follow-up questions need the parent conversation; the exact-match
//! shortcut needs previously proven SQL. Both come from an external store
//! behind [`ConversationStore`]; the core reads snapshots and records
//! completed exchanges, it does not own persistence.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// One completed question/answer turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub prompt: String,
    pub response: String,
    pub sql: String,
    pub result_json: String,
    pub tables: Vec<String>,
    pub schema_text: String,
    pub asked_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Prior exchanges for a conversation, oldest first.
    async fn history(&self, parent_id: Uuid) -> Result<Vec<Exchange>>;

    /// Previously proven SQL for an identically-worded question, if any.
    /// Callers pass the output of [`normalize_question`].
    async fn find_matching_sql(&self, normalized_question: &str) -> Result<Option<String>>;

    /// Record a successful exchange so follow-ups and the exact-match
    /// shortcut can see it.
    async fn record(&self, parent_id: Uuid, exchange: Exchange) -> Result<()>;
}

/// Case- and whitespace-insensitive question identity for the exact-match
/// shortcut.
pub fn normalize_question(question: &str) -> String {
    question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Process-local store for the CLI and tests.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<Uuid, Vec<Exchange>>>,
    sql_by_question: Mutex<HashMap<String, String>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn history(&self, parent_id: Uuid) -> Result<Vec<Exchange>> {
        Ok(self
            .conversations
            .lock()
            .map(|guard| guard.get(&parent_id).cloned().unwrap_or_default())
            .unwrap_or_default())
    }

    async fn find_matching_sql(&self, normalized_question: &str) -> Result<Option<String>> {
        Ok(self
            .sql_by_question
            .lock()
            .map(|guard| guard.get(normalized_question).cloned())
            .unwrap_or(None))
    }

    async fn record(&self, parent_id: Uuid, exchange: Exchange) -> Result<()> {
        if !exchange.sql.is_empty() {
            if let Ok(mut guard) = self.sql_by_question.lock() {
                guard.insert(normalize_question(&exchange.question), exchange.sql.clone());
            }
        }
        if let Ok(mut guard) = self.conversations.lock() {
            guard.entry(parent_id).or_default().push(exchange);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_question() {
        assert_eq!(
            normalize_question("  How many   Members\njoined? "),
            "how many members joined?"
        );
    }

    #[tokio::test]
    async fn test_record_then_find_matching_sql() {
        let store = InMemoryConversationStore::new();
        let parent = Uuid::new_v4();
        store
            .record(
                parent,
                Exchange {
                    question: "How many members joined?".to_string(),
                    prompt: String::new(),
                    response: String::new(),
                    sql: "SELECT COUNT(*) FROM dim_member".to_string(),
                    result_json: String::new(),
                    tables: vec!["dim_member".to_string()],
                    schema_text: String::new(),
                    asked_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let found = store
            .find_matching_sql(&normalize_question("how many MEMBERS joined?"))
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("SELECT COUNT(*) FROM dim_member"));
        assert_eq!(store.history(parent).await.unwrap().len(), 1);
    }
}
