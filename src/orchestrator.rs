//! Retry Orchestrator
//!
//! Drives the end-to-end attempt loop for a question: generate, execute,
//! fix with execution feedback, bounded by the configured retry budget.
//! Also owns the follow-up enhancement, the exact-match shortcut, insight
//! and related-question flows, and terminal result formatting.

use crate::cache::ResponseCache;
use crate::charts::{self, ChartConfig};
use crate::config::Settings;
use crate::error::{Result, SenseError};
use crate::exec::{ExecutionOutcome, QueryExecutor, ResultSet};
use crate::extract::guard_sql;
use crate::format::{self, chart_eligible, handle_too_many_rows};
use crate::history::{normalize_question, ConversationStore, Exchange};
use crate::llm::CompletionModel;
use crate::metrics::QueryMetrics;
use crate::prompts;
use crate::repair::fix_subquery_issues;
use crate::schema::SchemaIndex;
use crate::twostage::TwoStageGenerator;
use crate::validate::referenced_tables;
use chrono::Utc;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Terminal result for one question.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub question_id: Uuid,
    pub sql: Option<String>,
    pub formatted_output: String,
    pub reused_sql: bool,
    pub show_chart: bool,
    pub attempts: u32,
    pub result: Option<ResultSet>,
}

#[derive(Debug, Clone)]
pub struct InsightOutcome {
    pub insight_question: String,
    pub sql: Option<String>,
    pub formatted_output: String,
}

pub struct Orchestrator {
    generator: TwoStageGenerator,
    index: Arc<SchemaIndex>,
    llm: Arc<dyn CompletionModel>,
    executor: Arc<dyn QueryExecutor>,
    history: Arc<dyn ConversationStore>,
    cache: Option<ResponseCache<AnswerOutcome>>,
    metrics: Arc<QueryMetrics>,
    settings: Arc<Settings>,
}

struct PipelineRun {
    sql: String,
    outcome: ExecutionOutcome,
    attempts: u32,
    reused: bool,
}

impl Orchestrator {
    pub fn new(
        index: Arc<SchemaIndex>,
        llm: Arc<dyn CompletionModel>,
        executor: Arc<dyn QueryExecutor>,
        history: Arc<dyn ConversationStore>,
        settings: Arc<Settings>,
    ) -> Self {
        let cache = settings
            .enable_sql_caching
            .then(|| ResponseCache::new(Duration::from_secs(settings.cache_ttl_seconds)));

        Self {
            generator: TwoStageGenerator::new(Arc::clone(&index), Arc::clone(&llm), Arc::clone(&settings)),
            index,
            llm,
            executor,
            history,
            cache,
            metrics: Arc::new(QueryMetrics::new()),
            settings,
        }
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    /// Answer a fresh question end to end.
    pub async fn answer(&self, question: &str) -> Result<AnswerOutcome> {
        self.metrics.record_question();
        let question_id = Uuid::new_v4();

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(question, "original") {
                self.metrics.record_cache_hit();
                info!("Cache hit for question {}", question_id);
                return Ok(hit);
            }
        }

        // Exact-match shortcut: an identically-worded question with proven
        // SQL skips generation entirely and executes as attempt 1.
        let stored_sql = self
            .history
            .find_matching_sql(&normalize_question(question))
            .await
            .unwrap_or_default();

        let run = match stored_sql {
            Some(sql) => {
                info!("Reusing stored SQL for question {}", question_id);
                self.metrics.record_reused_sql();
                self.run_attempts(question, sql, true).await
            }
            None => match self.generate_first_sql(question).await {
                Ok(sql) => self.run_attempts(question, sql, false).await,
                Err(outcome) => {
                    self.metrics.record_failure();
                    return Ok(outcome.into_answer(question_id));
                }
            },
        };

        let outcome = self.finish(question_id, question, run).await;

        if outcome.sql.is_some() && outcome.result.is_some() {
            if let Some(cache) = &self.cache {
                cache.set(question, "original", outcome.clone());
            }
        }

        Ok(outcome)
    }

    /// Answer a follow-up in the context of its parent conversation. The
    /// prior transcript and the original SQL are injected into the
    /// generation input; the algorithm is otherwise identical.
    pub async fn answer_follow_up(&self, parent_id: Uuid, question: &str) -> Result<AnswerOutcome> {
        self.metrics.record_question();
        let question_id = Uuid::new_v4();

        let exchanges = self.history.history(parent_id).await?;
        let enhanced_query = match exchanges.first() {
            Some(first) => {
                let transcript = exchanges
                    .iter()
                    .map(|e| {
                        format!(
                            "[Previous-Question]{}[/Previous-Question]\n[Previous-Response]```sql {}``` \n Execution Result - {}[/Previous-Response]",
                            e.question, e.sql, e.result_json
                        )
                    })
                    .join("\n");
                prompts::enhanced_follow_up_query(question, &first.question, &first.sql, &transcript)
            }
            None => {
                warn!("Follow-up {} has no parent history; treating as fresh question", question_id);
                question.to_string()
            }
        };

        let run = match self.generate_first_sql(&enhanced_query).await {
            Ok(sql) => self.run_attempts(&enhanced_query, sql, false).await,
            Err(outcome) => {
                self.metrics.record_failure();
                return Ok(outcome.into_answer(question_id));
            }
        };

        let mut outcome = self.finish(question_id, question, run).await;
        // Follow-up exchanges extend the parent conversation.
        if let (Some(sql), Some(result)) = (&outcome.sql, &outcome.result) {
            self.record_exchange(parent_id, question, sql, result).await;
        }
        outcome.question_id = question_id;
        Ok(outcome)
    }

    /// Generate one additional insight question for the given query and
    /// answer it through the same pipeline.
    pub async fn insight(&self, question: &str) -> Result<InsightOutcome> {
        let schema_text = self.retrieval_context(question).await;
        let prompt = prompts::insight_question_prompt(question, &schema_text);
        let insight_question = self
            .llm
            .complete(&prompt, &self.settings.model_questions)
            .await?
            .trim()
            .to_string();

        info!("Generated insight question: {}", insight_question);

        let question_id = Uuid::new_v4();
        let run = match self.generate_first_sql(&insight_question).await {
            Ok(sql) => self.run_attempts(&insight_question, sql, false).await,
            Err(fatal) => {
                warn!("Insight generation failed: {}", fatal.message);
                return Ok(InsightOutcome {
                    insight_question,
                    sql: None,
                    formatted_output:
                        "<p>Unable to generate additional insights for this question. The insight may require data not available in the current schema.</p>"
                            .to_string(),
                });
            }
        };

        let outcome = self.finish(question_id, &insight_question, run).await;
        Ok(InsightOutcome {
            insight_question,
            sql: outcome.sql,
            formatted_output: outcome.formatted_output,
        })
    }

    /// Three schema-answerable follow-up suggestions, returned as the raw
    /// model text (a JSON array of strings by instruction).
    pub async fn related_questions(&self, question: &str) -> Result<String> {
        let schema_text = self.retrieval_context(question).await;
        let prompt = prompts::related_questions_prompt(question, &schema_text);
        self.llm.complete(&prompt, &self.settings.model_questions).await
    }

    pub async fn chart_options(&self, result: &ResultSet) -> Result<ChartConfig> {
        let result_json = serde_json::to_string(&result.rows)?;
        charts::chart_options_for(self.llm.as_ref(), &self.settings.model_formatting, &result_json).await
    }

    pub async fn edit_chart_options(&self, code: &str, instructions: &str) -> Result<ChartConfig> {
        charts::edit_chart_options(self.llm.as_ref(), &self.settings.model_formatting, code, instructions).await
    }

    async fn generate_first_sql(&self, gen_query: &str) -> std::result::Result<String, FatalOutcome> {
        match self.generator.generate(gen_query).await {
            Ok(generated) => {
                if !generated.is_valid {
                    self.metrics.record_validation_failure();
                    warn!("Generated SQL failed validation: {}", generated.message);
                } else {
                    info!("Generation result: {}", generated.message);
                }
                Ok(generated.sql)
            }
            Err(SenseError::Extraction(e)) => {
                self.metrics.record_extraction_failure();
                error!("SQL extraction failed: {}", e);
                Err(FatalOutcome::new(
                    "I encountered an error generating the SQL query. Please try again.",
                ))
            }
            Err(SenseError::Llm(e)) => {
                error!("LLM failure during generation: {}", e);
                Err(FatalOutcome::new(
                    "The language model is currently unavailable. Please try again in a moment.",
                ))
            }
            Err(e) => {
                error!("Unexpected generation failure: {}", e);
                Err(FatalOutcome::new(
                    "Something went wrong while answering this question. Please try again.",
                ))
            }
        }
    }

    /// Execute with the fix loop. Attempts are strictly sequential: each fix
    /// depends on the previous execution error. The "more than 1 value"
    /// cardinality error gets one deterministic rewrite before model fixes.
    async fn run_attempts(&self, gen_query: &str, initial_sql: String, reused: bool) -> PipelineRun {
        let mut sql = initial_sql;
        let mut attempts: u32 = 1;
        let mut tried_cardinality_rewrite = false;
        let mut outcome = self.guarded_execute(&sql).await;

        loop {
            let error_text = match &outcome {
                ExecutionOutcome::Success(_) => break,
                ExecutionOutcome::Error(e) => e.clone(),
            };
            self.metrics.record_execution_error();

            if !tried_cardinality_rewrite && is_cardinality_error(&error_text) {
                tried_cardinality_rewrite = true;
                let rewritten = fix_subquery_issues(&sql, self.index.catalog());
                if rewritten != sql {
                    info!("Applying deterministic subquery rewrite before fix loop");
                    sql = rewritten;
                    outcome = self.guarded_execute(&sql).await;
                    continue;
                }
            }

            if attempts >= self.settings.max_sql_retries {
                warn!("Retry budget exhausted after {} attempts", attempts);
                break;
            }
            attempts += 1;

            match self.generator.fix(&sql, gen_query, &error_text).await {
                Ok(fixed) => {
                    info!("Fix attempt {}: {}", attempts, fixed.message);
                    sql = fixed.sql;
                }
                Err(SenseError::Extraction(e)) => {
                    self.metrics.record_extraction_failure();
                    error!("Fix attempt {} produced no SQL: {}", attempts, e);
                    break;
                }
                Err(e) => {
                    error!("Fix attempt {} failed: {}", attempts, e);
                    break;
                }
            }

            outcome = self.guarded_execute(&sql).await;
        }

        PipelineRun { sql, outcome, attempts, reused }
    }

    /// The read-only contract is enforced before anything reaches the
    /// database: a statement the guard rejects never executes.
    async fn guarded_execute(&self, sql: &str) -> ExecutionOutcome {
        match guard_sql(sql) {
            Ok(()) => self.executor.execute(sql).await,
            Err(reason) => ExecutionOutcome::Error(reason),
        }
    }

    /// Terminal formatting: truncation, model-formatted output, chart flag,
    /// history recording.
    async fn finish(&self, question_id: Uuid, display_question: &str, run: PipelineRun) -> AnswerOutcome {
        match run.outcome {
            ExecutionOutcome::Success(result) => {
                let truncation = handle_too_many_rows(result, self.settings.max_display_rows);
                let displayed = truncation.result;

                let mut formatted = match format::format_db_output(
                    self.llm.as_ref(),
                    &self.settings.model_formatting,
                    &displayed,
                    display_question,
                )
                .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Formatting failed, falling back to plain table: {}", e);
                        format::convert_to_html_table(&displayed)
                    }
                };
                if let Some(note) = truncation.note {
                    formatted = format!("{}{}", note, formatted);
                }

                self.record_exchange(question_id, display_question, &run.sql, &displayed).await;
                self.metrics.record_success();

                AnswerOutcome {
                    question_id,
                    sql: Some(run.sql),
                    formatted_output: formatted,
                    reused_sql: run.reused,
                    show_chart: chart_eligible(displayed.row_count()),
                    attempts: run.attempts,
                    result: Some(displayed),
                }
            }
            ExecutionOutcome::Error(e) => {
                self.metrics.record_failure();
                AnswerOutcome {
                    question_id,
                    sql: None,
                    formatted_output: format!("ran into error {}", e),
                    reused_sql: run.reused,
                    show_chart: false,
                    attempts: run.attempts,
                    result: None,
                }
            }
        }
    }

    async fn record_exchange(&self, conversation_id: Uuid, question: &str, sql: &str, result: &ResultSet) {
        let exchange = Exchange {
            question: question.to_string(),
            prompt: String::new(),
            response: String::new(),
            sql: sql.to_string(),
            result_json: serde_json::to_string(&result.rows).unwrap_or_default(),
            tables: referenced_tables(sql),
            schema_text: String::new(),
            asked_at: Utc::now(),
        };
        if let Err(e) = self.history.record(conversation_id, exchange).await {
            warn!("Failed to record exchange: {}", e);
        }
    }

    async fn retrieval_context(&self, question: &str) -> String {
        let retrieved = self.index.relevant_schemas(question, 5).await;
        let names: Vec<String> = retrieved.iter().map(|s| s.table_name.clone()).collect();
        self.index.schema_context_for_tables(&names)
    }
}

struct FatalOutcome {
    message: String,
}

impl FatalOutcome {
    fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }

    fn into_answer(self, question_id: Uuid) -> AnswerOutcome {
        AnswerOutcome {
            question_id,
            sql: None,
            formatted_output: self.message,
            reused_sql: false,
            show_chart: false,
            attempts: 0,
            result: None,
        }
    }
}

fn is_cardinality_error(error_text: &str) -> bool {
    error_text.to_lowercase().contains("more than 1 value")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_error_detection() {
        assert!(is_cardinality_error(
            "Subquery returned more than 1 value. This is not permitted when the subquery follows ="
        ));
        assert!(!is_cardinality_error("Invalid column name 'member_nam'"));
    }
}
