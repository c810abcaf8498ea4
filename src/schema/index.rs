//! Schema Index
//!
//! Answers "which K tables are most relevant to this question?" via semantic
//! search over one document per table, and exposes the catalog's schema text
//! for prompting.

use crate::error::Result;
use crate::schema::catalog::SchemaCatalog;
use crate::schema::embed::Embedder;
use crate::schema::store::{Document, VectorStore};
use std::sync::Arc;
use tracing::{info, warn};

/// One retrieval result: a table with its real columns and schema text.
#[derive(Debug, Clone)]
pub struct RetrievedSchema {
    pub table_name: String,
    pub columns: Vec<String>,
    pub create_statement: String,
}

/// Read-only after [`SchemaIndex::build`]; shared across requests.
pub struct SchemaIndex {
    store: VectorStore,
    catalog: Arc<SchemaCatalog>,
    embedder: Arc<dyn Embedder>,
}

/// Schema text beyond this length adds noise, not retrieval signal.
const DOCUMENT_SCHEMA_CHARS: usize = 500;

impl SchemaIndex {
    /// Embed one document per catalog table. Construction cost is paid once
    /// at startup; the index takes no writes afterwards.
    pub async fn build(catalog: Arc<SchemaCatalog>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let mut store = VectorStore::new();

        for table in catalog.tables() {
            let text = format!(
                "Table: {}\nColumns: {}\nSchema: {}",
                table.name,
                table.columns.join(", "),
                truncate(&table.create_statement, DOCUMENT_SCHEMA_CHARS),
            );
            let embedding = embedder.embed(&text).await?;
            store.add(Document {
                id: table.name.to_uppercase(),
                text,
                embedding,
            });
        }

        info!("Schema index built with {} table documents", store.len());
        Ok(Self { store, catalog, embedder })
    }

    /// Top-k tables for a natural-language query, most similar first.
    /// Returns an empty list when the index is unbuilt or the query cannot
    /// be embedded; callers broaden their assumptions on empty results.
    pub async fn relevant_schemas(&self, query: &str, top_k: usize) -> Vec<RetrievedSchema> {
        if self.store.is_empty() {
            warn!("Schema index is empty; returning no retrieval results");
            return Vec::new();
        }

        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Query embedding failed, returning no retrieval results: {}", e);
                return Vec::new();
            }
        };

        self.store
            .search(&query_embedding, top_k)
            .into_iter()
            .filter_map(|hit| self.catalog.table(&hit.id))
            .map(|table| RetrievedSchema {
                table_name: table.name.clone(),
                columns: table.columns.clone(),
                create_statement: table.create_statement.clone(),
            })
            .collect()
    }

    pub fn schema_context_for_tables<S: AsRef<str>>(&self, names: &[S]) -> String {
        self.catalog.schema_context_for_tables(names)
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn document_count(&self) -> usize {
        self.store.len()
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::embed::HashingEmbedder;

    fn catalog() -> Arc<SchemaCatalog> {
        Arc::new(SchemaCatalog::from_create_statements([
            (
                "FACT_LOAN",
                "CREATE TABLE fact_loan (\n  loan_key INT,\n  member_key INT,\n  loan_amount DECIMAL(18,2),\n  open_date_key INT\n)".to_string(),
            ),
            (
                "DIM_MEMBER",
                "CREATE TABLE dim_member (\n  member_key INT,\n  member_name NVARCHAR(100)\n)".to_string(),
            ),
            (
                "DIM_DATE",
                "CREATE TABLE dim_date (\n  date_key INT,\n  full_date DATE,\n  year INT\n)".to_string(),
            ),
        ]))
    }

    #[tokio::test]
    async fn test_retrieval_ranks_matching_table_first() {
        let index = SchemaIndex::build(catalog(), Arc::new(HashingEmbedder::default()))
            .await
            .unwrap();
        assert_eq!(index.document_count(), 3);

        let results = index.relevant_schemas("total loan amount per member", 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].table_name, "fact_loan");
    }

    #[tokio::test]
    async fn test_unbuilt_index_returns_empty() {
        let empty = SchemaIndex::build(
            Arc::new(SchemaCatalog::default()),
            Arc::new(HashingEmbedder::default()),
        )
        .await
        .unwrap();
        assert!(empty.relevant_schemas("anything", 5).await.is_empty());
    }
}
