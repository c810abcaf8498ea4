//! Runtime settings
//!
//! Read once from the environment at startup and passed by reference to the
//! components that need them. `.env` files are honored via dotenv.

use crate::error::{Result, SenseError};

#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of an OpenAI-compatible API (chat completions + embeddings).
    pub llm_base_url: String,
    pub llm_api_key: String,

    /// Model used for stage-2 SQL generation and error fixes.
    pub model_main: String,
    /// Model used for stage-1 table/column selection.
    pub model_selection: String,
    /// Model used for output formatting and chart options.
    pub model_formatting: String,
    /// Model used for related/insight question generation.
    pub model_questions: String,
    pub embedding_model: String,

    /// Maximum SQL execution attempts per question (generation + fixes).
    pub max_sql_retries: u32,
    /// Per-call LLM timeout.
    pub llm_timeout_seconds: u64,
    /// Transient-failure retry budget per LLM call.
    pub llm_max_retries: u32,

    pub enable_sql_caching: bool,
    pub cache_ttl_seconds: u64,

    /// Tables retrieved from the schema index per question.
    pub retrieval_top_k: usize,
    /// Rows shown to the user before truncation kicks in.
    pub max_display_rows: usize,

    /// Last date for which data exists in the target warehouse. Queries must
    /// anchor relative date math here instead of the current date.
    pub data_horizon: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),
            model_main: "gpt-4".to_string(),
            model_selection: "gpt-4".to_string(),
            model_formatting: "gpt-4".to_string(),
            model_questions: "gpt-4".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_sql_retries: 3,
            llm_timeout_seconds: 60,
            llm_max_retries: 3,
            enable_sql_caching: true,
            cache_ttl_seconds: 3600,
            retrieval_top_k: 6,
            max_display_rows: 30,
            data_horizon: None,
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Settings::default();
        Ok(Self {
            llm_base_url: env_or("OPENAI_BASE_URL", &defaults.llm_base_url),
            llm_api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            model_main: env_or("MODEL_TO_USE_MAIN", &defaults.model_main),
            model_selection: env_or("MODEL_TO_USE_SELECTION", &defaults.model_selection),
            model_formatting: env_or("MODEL_TO_USE_OUTPUT_FORMATTING", &defaults.model_formatting),
            model_questions: env_or("MODEL_TO_USE_QUESTION_GENERATION", &defaults.model_questions),
            embedding_model: env_or("EMBEDDING_MODEL", &defaults.embedding_model),
            max_sql_retries: env_parsed("MAX_SQL_RETRIES", defaults.max_sql_retries)?,
            llm_timeout_seconds: env_parsed("LLM_TIMEOUT_SECONDS", defaults.llm_timeout_seconds)?,
            llm_max_retries: env_parsed("LLM_MAX_RETRIES", defaults.llm_max_retries)?,
            enable_sql_caching: env_or("ENABLE_SQL_CACHING", "true").to_lowercase() == "true",
            cache_ttl_seconds: env_parsed("CACHE_TTL_SECONDS", defaults.cache_ttl_seconds)?,
            retrieval_top_k: env_parsed("RETRIEVAL_TOP_K", defaults.retrieval_top_k)?,
            max_display_rows: env_parsed("MAX_DISPLAY_ROWS", defaults.max_display_rows)?,
            data_horizon: std::env::var("DATA_HORIZON_DATE").ok().filter(|v| !v.is_empty()),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| SenseError::Config(format!("Invalid value for {}: {}", key, raw))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_sql_retries, 3);
        assert_eq!(settings.llm_timeout_seconds, 60);
        assert_eq!(settings.retrieval_top_k, 6);
        assert_eq!(settings.max_display_rows, 30);
    }
}
