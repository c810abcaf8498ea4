//! Two-Stage SQL Generation
//!
//! Stage 1 asks the model to select exact tables and columns from retrieved
//! schema; stage 2 generates SQL constrained to that validated selection.
//! Constraining stage 2 to verified schema elements is what keeps invented
//! tables and columns out of the generated SQL.

use crate::config::Settings;
use crate::error::{Result, SenseError};
use crate::extract::extract_sql;
use crate::llm::CompletionModel;
use crate::prompts;
use crate::repair::repair_sql;
use crate::schema::{RetrievedSchema, SchemaIndex};
use crate::validate::validate_sql;
use itertools::Itertools;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which step produced a piece of SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    Constrained,
    HeuristicRepair,
    ModelFix,
}

/// One generated SQL statement with its validation status. Never mutated;
/// every repair or regeneration produces a new value.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub is_valid: bool,
    pub message: String,
    pub stage: GenerationStage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinHint {
    #[serde(rename = "from", default)]
    pub from_column: String,
    #[serde(rename = "to", default)]
    pub to_column: String,
}

/// Stage-1 output: the model's table/column/join selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableSelection {
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub columns: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub joins: Vec<JoinHint>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone)]
pub struct SelectionParseError {
    pub detail: String,
}

/// Parse the stage-1 response, tolerating a ```json or plain ``` fence.
/// Failure is a normal branch, not an error path: the caller falls back to
/// all retrieved tables.
pub fn parse_selection(response: &str) -> std::result::Result<TableSelection, SelectionParseError> {
    let body = if let Some(rest) = response.split("```json").nth(1) {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some(rest) = response.split("```").nth(1) {
        rest.split("```").next().unwrap_or(rest)
    } else {
        response
    };

    serde_json::from_str(body.trim()).map_err(|e| SelectionParseError { detail: e.to_string() })
}

impl TableSelection {
    /// Safe degradation when stage 1 returns nothing usable: select every
    /// retrieved table with all of its columns and no join hints.
    pub fn all_of(retrieved: &[RetrievedSchema]) -> Self {
        Self {
            tables: retrieved.iter().map(|s| s.table_name.clone()).collect(),
            columns: retrieved
                .iter()
                .map(|s| (s.table_name.clone(), s.columns.clone()))
                .collect(),
            joins: Vec::new(),
            reasoning: String::new(),
        }
    }
}

pub struct TwoStageGenerator {
    index: Arc<SchemaIndex>,
    llm: Arc<dyn CompletionModel>,
    settings: Arc<Settings>,
}

impl TwoStageGenerator {
    pub fn new(index: Arc<SchemaIndex>, llm: Arc<dyn CompletionModel>, settings: Arc<Settings>) -> Self {
        Self { index, llm, settings }
    }

    /// Full two-stage generation for a question (original or
    /// follow-up-enhanced). Validation failure is reported in the returned
    /// value; only extraction failure and exhausted LLM retries are errors.
    pub async fn generate(&self, query: &str) -> Result<GeneratedSql> {
        let retrieved = self
            .index
            .relevant_schemas(query, self.settings.retrieval_top_k)
            .await;

        let selection = self.select_tables(query, &retrieved).await?;
        let validated_columns = self.intersect_with_catalog(&selection);
        let full_schemas = self.index.schema_context_for_tables(&selection.tables);

        let sql_prompt = prompts::constrained_sql_prompt(
            query,
            &selection.tables,
            &validated_columns,
            &selection.joins,
            &full_schemas,
            self.settings.data_horizon.as_deref(),
        );
        let response = self.llm.complete(&sql_prompt, &self.settings.model_main).await?;

        let sql = extract_sql(&response).ok_or_else(|| {
            SenseError::Extraction("Model response contained no recognizable SQL".to_string())
        })?;

        Ok(self.validate_with_one_repair(sql, GenerationStage::Constrained))
    }

    /// Model-assisted repair: validate, try the deterministic fix, then
    /// regenerate with the error context inlined. No looping here; the
    /// orchestrator owns the retry budget.
    pub async fn fix(&self, sql: &str, query: &str, error_context: &str) -> Result<GeneratedSql> {
        let catalog = self.index.catalog();
        let (is_valid, issues) = validate_sql(sql, catalog);

        if is_valid && error_context.is_empty() {
            return Ok(GeneratedSql {
                sql: sql.to_string(),
                is_valid: true,
                message: "SQL is valid".to_string(),
                stage: GenerationStage::Constrained,
            });
        }

        if !issues.is_empty() {
            let (repaired, remaining) = repair_sql(sql, &issues, catalog);
            if remaining.is_empty() {
                let (revalid, _) = validate_sql(&repaired, catalog);
                if revalid && error_context.is_empty() {
                    return Ok(GeneratedSql {
                        sql: repaired,
                        is_valid: true,
                        message: "SQL auto-corrected".to_string(),
                        stage: GenerationStage::HeuristicRepair,
                    });
                }
            }
        }

        let retrieved = self.index.relevant_schemas(query, self.settings.retrieval_top_k).await;
        let table_names: Vec<String> = retrieved.iter().map(|s| s.table_name.clone()).collect();
        let full_schemas = self.index.schema_context_for_tables(&table_names);

        let combined_context = if error_context.is_empty() {
            issues.iter().map(|i| i.message.clone()).join("\n")
        } else {
            error_context.to_string()
        };

        let fix_prompt = prompts::sql_fix_prompt(sql, &combined_context, &full_schemas);
        let response = self.llm.complete(&fix_prompt, &self.settings.model_main).await?;

        let fixed_sql = extract_sql(&response).ok_or_else(|| {
            SenseError::Extraction("Fix response contained no recognizable SQL".to_string())
        })?;

        let (is_valid, new_issues) = validate_sql(&fixed_sql, catalog);
        let message = if is_valid {
            "SQL regenerated and validated".to_string()
        } else {
            format!(
                "Still has errors: {}",
                new_issues.iter().map(|i| i.message.clone()).join("; ")
            )
        };

        Ok(GeneratedSql { sql: fixed_sql, is_valid, message, stage: GenerationStage::ModelFix })
    }

    async fn select_tables(
        &self,
        query: &str,
        retrieved: &[RetrievedSchema],
    ) -> Result<TableSelection> {
        let selection_prompt = prompts::table_column_selection_prompt(query, retrieved);
        let response = self
            .llm
            .complete(&selection_prompt, &self.settings.model_selection)
            .await?;

        match parse_selection(&response) {
            Ok(selection) if !selection.tables.is_empty() => {
                debug!("Stage 1 selected tables: {}", selection.tables.join(", "));
                Ok(selection)
            }
            Ok(_) => {
                info!("Stage 1 selected no tables; falling back to all retrieved tables");
                Ok(TableSelection::all_of(retrieved))
            }
            Err(e) => {
                info!("Stage 1 selection parse failed ({}); falling back to all retrieved tables", e.detail);
                Ok(TableSelection::all_of(retrieved))
            }
        }
    }

    /// Drop selected columns the catalog does not actually have. Invented
    /// names are removed silently here; stage 2 plus post-validation enforce
    /// correctness strictly.
    fn intersect_with_catalog(&self, selection: &TableSelection) -> HashMap<String, Vec<String>> {
        let catalog = self.index.catalog();
        let mut validated = HashMap::new();

        for (table, columns) in &selection.columns {
            let Some(valid_columns) = catalog.columns_for(table) else {
                continue;
            };
            let kept: Vec<String> = columns
                .iter()
                .filter(|c| valid_columns.iter().any(|v| v == &c.to_lowercase()))
                .cloned()
                .collect();
            if kept.len() < columns.len() {
                warn!(
                    "Dropped {} invented column(s) from stage-1 selection for table {}",
                    columns.len() - kept.len(),
                    table
                );
            }
            validated.insert(table.clone(), kept);
        }

        validated
    }

    fn validate_with_one_repair(&self, sql: String, stage: GenerationStage) -> GeneratedSql {
        let catalog = self.index.catalog();
        let (is_valid, issues) = validate_sql(&sql, catalog);

        if is_valid {
            return GeneratedSql {
                sql,
                is_valid: true,
                message: "SQL validated successfully".to_string(),
                stage,
            };
        }

        let (repaired, _remaining) = repair_sql(&sql, &issues, catalog);
        let (revalid, reissues) = validate_sql(&repaired, catalog);

        if revalid {
            GeneratedSql {
                sql: repaired,
                is_valid: true,
                message: "SQL auto-corrected and validated".to_string(),
                stage: GenerationStage::HeuristicRepair,
            }
        } else {
            GeneratedSql {
                sql: repaired,
                is_valid: false,
                message: format!(
                    "Validation errors: {}",
                    reissues.iter().map(|i| i.message.clone()).join("; ")
                ),
                stage: GenerationStage::HeuristicRepair,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection_plain_json() {
        let selection = parse_selection(
            r#"{"tables": ["fact_loan"], "columns": {"fact_loan": ["loan_amount"]}, "joins": [], "reasoning": "loan totals"}"#,
        )
        .unwrap();
        assert_eq!(selection.tables, vec!["fact_loan"]);
        assert_eq!(selection.columns["fact_loan"], vec!["loan_amount"]);
    }

    #[test]
    fn test_parse_selection_tolerates_json_fence() {
        let response = "Here is my selection:\n```json\n{\"tables\": [\"dim_member\"], \"columns\": {}}\n```\nDone.";
        let selection = parse_selection(response).unwrap();
        assert_eq!(selection.tables, vec!["dim_member"]);
    }

    #[test]
    fn test_parse_selection_tolerates_plain_fence_and_join_fields() {
        let response = "```\n{\"tables\": [\"a\"], \"joins\": [{\"from\": \"a.x\", \"to\": \"b.x\"}]}\n```";
        let selection = parse_selection(response).unwrap();
        assert_eq!(selection.joins.len(), 1);
        assert_eq!(selection.joins[0].from_column, "a.x");
        assert_eq!(selection.joins[0].to_column, "b.x");
    }

    #[test]
    fn test_parse_selection_failure_is_typed() {
        let err = parse_selection("I think you need the loans table.").unwrap_err();
        assert!(!err.detail.is_empty());
    }

    #[test]
    fn test_fallback_selection_uses_all_retrieved() {
        let retrieved = vec![
            RetrievedSchema {
                table_name: "fact_loan".to_string(),
                columns: vec!["loan_key".to_string()],
                create_statement: String::new(),
            },
            RetrievedSchema {
                table_name: "dim_member".to_string(),
                columns: vec!["member_key".to_string()],
                create_statement: String::new(),
            },
        ];
        let selection = TableSelection::all_of(&retrieved);
        assert_eq!(selection.tables.len(), 2);
        assert!(selection.joins.is_empty());
        assert_eq!(selection.columns["dim_member"], vec!["member_key"]);
    }
}
