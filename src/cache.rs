//! Response Cache
//!
//! In-memory TTL cache for per-question responses. Read-mostly after warmup;
//! a coarse lock around the map is sufficient for the request rates this
//! serves. Consulted explicitly by the orchestrator.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::history::normalize_question;

struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

pub struct ResponseCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(question: &str, question_type: &str) -> String {
        format!("{}:{}", question_type, normalize_question(question))
    }

    pub fn get(&self, question: &str, question_type: &str) -> Option<T> {
        let key = Self::key(question, question_type);
        let mut entries = self.entries.lock().ok()?;

        if let Some(entry) = entries.get(&key) {
            if Instant::now() < entry.expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for question type '{}'", question_type);
                return Some(entry.data.clone());
            }
            entries.remove(&key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, question: &str, question_type: &str, data: T) {
        self.set_with_ttl(question, question_type, data, self.default_ttl);
    }

    pub fn set_with_ttl(&self, question: &str, question_type: &str, data: T, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                Self::key(question, question_type),
                CacheEntry { data, expires_at: Instant::now() + ttl },
            );
        }
    }

    pub fn invalidate(&self, question: &str, question_type: &str) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(&Self::key(question, question_type)).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Drop expired entries; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|mut entries| {
                let before = entries.len();
                entries.retain(|_, entry| now < entry.expires_at);
                before - entries.len()
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.entries.lock().map(|e| e.len()).unwrap_or(0),
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_normalizes_question() {
        let cache: ResponseCache<String> = ResponseCache::new(Duration::from_secs(60));
        cache.set("How many  members?", "original", "answer".to_string());

        assert_eq!(cache.get("how many members?", "original").as_deref(), Some("answer"));
        assert!(cache.get("how many members?", "followup").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entries_are_misses_and_cleaned() {
        let cache: ResponseCache<u32> = ResponseCache::new(Duration::from_secs(60));
        cache.set_with_ttl("q", "original", 7, Duration::from_millis(0));

        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("q", "original").is_none());

        cache.set_with_ttl("other", "original", 9, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.cleanup_expired(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache: ResponseCache<u32> = ResponseCache::new(Duration::from_secs(60));
        cache.set("q", "original", 1);
        assert!(cache.invalidate("q", "original"));
        assert!(!cache.invalidate("q", "original"));

        cache.set("q", "original", 1);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
