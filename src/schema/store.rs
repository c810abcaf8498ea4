//! In-memory vector store with cosine-similarity search.

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub embedding: Embedding,
}

/// Search result from the store
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// Linear-scan store. The corpus is one document per table, so a scan over a
/// few hundred vectors is well below retrieval latency concerns.
#[derive(Debug, Default)]
pub struct VectorStore {
    documents: Vec<Document>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, document: Document) {
        self.documents.push(document);
    }

    /// Top-k most similar documents, most similar first.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .documents
            .iter()
            .map(|doc| SearchHit {
                id: doc.id.clone(),
                score: cosine_similarity(query_embedding, &doc.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 1.0);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut store = VectorStore::new();
        store.add(Document {
            id: "far".to_string(),
            text: String::new(),
            embedding: vec![0.0, 1.0],
        });
        store.add(Document {
            id: "near".to_string(),
            text: String::new(),
            embedding: vec![1.0, 0.1],
        });

        let hits = store.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[1].id, "far");

        let hits = store.search(&[1.0, 0.0], 1);
        assert_eq!(hits.len(), 1);
    }
}
