//! Query Metrics
//!
//! Counters for pipeline outcomes, recorded explicitly by the orchestrator.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct QueryMetrics {
    total_questions: AtomicU64,
    successful_questions: AtomicU64,
    failed_questions: AtomicU64,
    extraction_failures: AtomicU64,
    validation_failures: AtomicU64,
    execution_errors: AtomicU64,
    cache_hits: AtomicU64,
    reused_sql: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_questions: u64,
    pub successful_questions: u64,
    pub failed_questions: u64,
    pub extraction_failures: u64,
    pub validation_failures: u64,
    pub execution_errors: u64,
    pub cache_hits: u64,
    pub reused_sql: u64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_question(&self) {
        self.total_questions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_questions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_questions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction_failure(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution_error(&self) {
        self.execution_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reused_sql(&self) {
        self.reused_sql.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_questions: self.total_questions.load(Ordering::Relaxed),
            successful_questions: self.successful_questions.load(Ordering::Relaxed),
            failed_questions: self.failed_questions.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            execution_errors: self.execution_errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            reused_sql: self.reused_sql.load(Ordering::Relaxed),
        }
    }
}
