pub mod cache;
pub mod charts;
pub mod config;
pub mod error;
pub mod exec;
pub mod extract;
pub mod format;
pub mod history;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod prompts;
pub mod repair;
pub mod schema;
pub mod twostage;
pub mod validate;

pub use config::Settings;
pub use error::{Result, SenseError};
pub use orchestrator::{AnswerOutcome, Orchestrator};
pub use schema::{SchemaCatalog, SchemaIndex};
pub use validate::validate_sql;
