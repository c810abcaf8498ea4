//! Chart Configuration
//!
//! Model-produced ApexCharts options for a result set, plus an edit variant
//! that applies user instructions to existing options.

use crate::error::Result;
use crate::llm::CompletionModel;
use crate::prompts::{chart_edit_prompt, chart_options_prompt};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChartConfig {
    pub chart_type: String,
    pub chart_options: String,
    pub chart_data: Vec<serde_json::Value>,
}

lazy_static! {
    static ref CODE_BLOCK: Regex = Regex::new(r"(?s)```(?:\w+\n)?(.*?)\n?```").unwrap();
}

fn extract_code_block(text: &str) -> String {
    match CODE_BLOCK.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

pub async fn chart_options_for(
    llm: &dyn CompletionModel,
    model: &str,
    result_json: &str,
) -> Result<ChartConfig> {
    let response = llm.complete(&chart_options_prompt(result_json), model).await?;

    Ok(ChartConfig {
        chart_type: "apex".to_string(),
        chart_options: extract_code_block(&response),
        chart_data: Vec::new(),
    })
}

pub async fn edit_chart_options(
    llm: &dyn CompletionModel,
    model: &str,
    existing_code: &str,
    instructions: &str,
) -> Result<ChartConfig> {
    let response = llm
        .complete(&chart_edit_prompt(existing_code, instructions), model)
        .await?;

    Ok(ChartConfig {
        chart_type: "apex".to_string(),
        chart_options: extract_code_block(&response),
        chart_data: Vec::new(),
    })
}
