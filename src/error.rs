use thiserror::Error;

#[derive(Error, Debug)]
pub enum SenseError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("SQL extraction error: {0}")]
    Extraction(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SenseError>;
