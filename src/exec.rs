//! Execution collaborator interface
//!
//! The target database is external; the core hands SQL to a [`QueryExecutor`]
//! and receives rows or a database-reported error string. Execution errors
//! are values, not crate errors, because the fix loop consumes them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success(ResultSet),
    /// Database-reported error text, suitable for the fix prompt.
    Error(String),
}

/// Read-only SQL execution against the target analytical database.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> ExecutionOutcome;
}
