//! Embedding providers
//!
//! The index treats embedding as a black-box capability. Production uses the
//! OpenAI embeddings API; offline runs and tests use a deterministic hashing
//! embedder so retrieval still works without network access.

use crate::config::Settings;
use crate::error::{Result, SenseError};
use crate::schema::store::Embedding;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Embedding client using the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.llm_timeout_seconds))
            .build()
            .map_err(|e| SenseError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: settings.llm_api_key.clone(),
            base_url: settings.llm_base_url.trim_end_matches('/').to_string(),
            model: settings.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SenseError::Llm(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SenseError::Llm(format!("Embedding API error ({}): {}", status, error_text)));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SenseError::Llm(format!("Failed to parse embedding response: {}", e)))?;

        let data = payload
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| SenseError::Llm("No embedding data in response".to_string()))?;

        let embedding: Embedding = data
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| SenseError::Llm("No embedding vector in response".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }
}

/// Deterministic bag-of-words embedder: each token hashes into a bucket, and
/// the counts are L2-normalized. Shared vocabulary between a question and a
/// table document yields a higher cosine score, which is enough to rank
/// schema documents without a model.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(8) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut buckets = vec![0.0f32; self.dimensions];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let slot = (hasher.finish() as usize) % self.dimensions;
            buckets[slot] += 1.0;
        }

        let norm: f32 = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut buckets {
                *v /= norm;
            }
        }

        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::store::cosine_similarity;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("total loan amount by branch").await.unwrap();
        let b = embedder.embed("total loan amount by branch").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("loans by branch name").await.unwrap();
        let loans = embedder
            .embed("Table: fact_loan Columns: loan_key, branch_key, loan_amount")
            .await
            .unwrap();
        let dates = embedder
            .embed("Table: dim_date Columns: date_key, full_date, year, quarter")
            .await
            .unwrap();

        assert!(cosine_similarity(&query, &loans) > cosine_similarity(&query, &dates));
    }
}
