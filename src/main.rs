//! CLI for generating and validating SQL against a schema file.
//!
//! The schema file is a JSON object mapping table names to CREATE TABLE
//! statements. Generation needs an OpenAI-compatible endpoint configured via
//! the environment; `validate` works fully offline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlsense::config::Settings;
use sqlsense::llm::LlmClient;
use sqlsense::schema::embed::{Embedder, HashingEmbedder, OpenAiEmbedder};
use sqlsense::schema::{SchemaCatalog, SchemaIndex};
use sqlsense::twostage::TwoStageGenerator;
use sqlsense::validate::validate_sql;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlsense", about = "Schema-grounded NL-to-SQL generation and validation")]
struct Args {
    /// Path to a JSON file mapping table names to CREATE TABLE statements
    #[arg(long)]
    schema: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate SQL for a natural-language question (two-stage, validated)
    Ask {
        question: String,
        /// Use the deterministic offline embedder instead of the API
        #[arg(long)]
        offline: bool,
    },
    /// Validate a SQL statement against the schema without executing it
    Validate { sql: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = Arc::new(Settings::from_env()?);

    let raw = std::fs::read_to_string(&args.schema)
        .with_context(|| format!("reading schema file {}", args.schema.display()))?;
    let statements: std::collections::BTreeMap<String, String> =
        serde_json::from_str(&raw).context("schema file must map table names to CREATE TABLE text")?;
    let catalog = Arc::new(SchemaCatalog::from_create_statements(statements));

    match args.command {
        Command::Validate { sql } => {
            let (is_valid, issues) = validate_sql(&sql, &catalog);
            if is_valid {
                println!("SQL is valid against {} tables", catalog.len());
            } else {
                println!("SQL has {} issue(s):", issues.len());
                for issue in issues {
                    println!("  - {}", issue);
                }
                std::process::exit(1);
            }
        }
        Command::Ask { question, offline } => {
            if settings.llm_api_key.is_empty() {
                bail!("OPENAI_API_KEY is required for generation");
            }

            let embedder: Arc<dyn Embedder> = if offline {
                Arc::new(HashingEmbedder::default())
            } else {
                Arc::new(OpenAiEmbedder::new(&settings)?)
            };
            let index = Arc::new(SchemaIndex::build(Arc::clone(&catalog), embedder).await?);
            let llm = Arc::new(LlmClient::new(&settings)?);
            let generator = TwoStageGenerator::new(index, llm, Arc::clone(&settings));

            let generated = generator.generate(&question).await?;
            println!("-- {}", generated.message);
            println!("{}", generated.sql);
            if !generated.is_valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
