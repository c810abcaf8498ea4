//! Result Formatting
//!
//! Row truncation, HTML table rendering, and model-formatted answers with
//! code-fence and document-tag cleanup.

use crate::error::Result;
use crate::exec::ResultSet;
use crate::llm::CompletionModel;
use crate::prompts::output_format_prompt;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

/// Chart rendering works for result sets in this row range: below it there
/// is nothing to plot, above it the chart is unreadable.
pub const CHART_MIN_ROWS: usize = 5;
pub const CHART_MAX_ROWS: usize = 30;

pub fn chart_eligible(row_count: usize) -> bool {
    (CHART_MIN_ROWS..=CHART_MAX_ROWS).contains(&row_count)
}

#[derive(Debug, Clone)]
pub struct Truncation {
    pub result: ResultSet,
    pub truncated: bool,
    pub note: Option<String>,
}

/// Cap a result set at `max_rows`, attaching a user-visible note naming the
/// original and displayed counts. Not a failure: terminal formatting only.
pub fn handle_too_many_rows(result: ResultSet, max_rows: usize) -> Truncation {
    let total = result.row_count();
    if total <= max_rows {
        return Truncation { result, truncated: false, note: None };
    }

    let note = format!(
        "<p><span class='highlight'>Note</span>: The complete dataset contains a total of {} rows. \
         To provide a concise overview, only the top {} rows are displayed below.</p>",
        total, max_rows
    );

    let mut result = result;
    result.rows.truncate(max_rows);
    Truncation { result, truncated: true, note: Some(note) }
}

/// Plain HTML table straight from the rows; the fallback when the formatting
/// model call fails.
pub fn convert_to_html_table(result: &ResultSet) -> String {
    let mut html = String::from("<table>");

    html.push_str("<tr>");
    for column in &result.columns {
        html.push_str(&format!("<th>{}</th>", column));
    }
    html.push_str("</tr>");

    for row in &result.rows {
        html.push_str("<tr>");
        for column in &result.columns {
            let value = match row.get(column) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(v) => v.to_string(),
            };
            html.push_str(&format!("<td>{}</td>", value));
        }
        html.push_str("</tr>");
    }

    html.push_str("</table>");
    html
}

lazy_static! {
    static ref HTML_FENCE: Regex = Regex::new(r"(?s)```html\s*(.*?)\s*```").unwrap();
    static ref ANY_FENCE_EDGES: Regex = Regex::new(r"(?m)^```\w*\s*$|^```\s*").unwrap();
    static ref DOCTYPE_TAG: Regex = Regex::new(r"(?i)<!DOCTYPE html[^>]*>").unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"(?i)</?html[^>]*>").unwrap();
    static ref BODY_TAG: Regex = Regex::new(r"(?i)</?body>").unwrap();
    static ref HEAD_BLOCK: Regex = Regex::new(r"(?is)<head>.*?</head>").unwrap();
    static ref HEADING_BLOCK: Regex = Regex::new(r"(?is)<h[1-6]>.*?</h[1-6]>").unwrap();
}

/// Unwrap a ```html fence if the model added one despite instructions.
pub fn extract_html_block(text: &str) -> String {
    match HTML_FENCE.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.to_string(),
    }
}

/// Strip full-document scaffolding (doctype, html/body wrappers, head,
/// headings) so the fragment embeds cleanly in the caller's page.
pub fn strip_document_tags(text: &str) -> String {
    let text = extract_html_block(text);
    let text = DOCTYPE_TAG.replace_all(&text, "");
    let text = HEAD_BLOCK.replace_all(&text, "");
    let text = HTML_TAG.replace_all(&text, "");
    let text = BODY_TAG.replace_all(&text, "");
    let text = HEADING_BLOCK.replace_all(&text, "");
    text.trim().to_string()
}

/// Ask the model to present the rows as an HTML answer; fall back to the
/// plain table when the call fails.
pub async fn format_db_output(
    llm: &dyn CompletionModel,
    model: &str,
    result: &ResultSet,
    user_query: &str,
) -> Result<String> {
    let result_json = serde_json::to_string(&result.rows)?;
    let prompt = output_format_prompt(&result_json, user_query);

    match llm.complete(&prompt, model).await {
        Ok(response) => {
            let cleaned = ANY_FENCE_EDGES.replace_all(response.trim(), "");
            Ok(cleaned.trim().to_string())
        }
        Err(e) => {
            warn!("Output formatting call failed, using plain table: {}", e);
            Ok(convert_to_html_table(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Row;

    fn result_with_rows(n: usize) -> ResultSet {
        let rows = (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".to_string(), i.into());
                row
            })
            .collect();
        ResultSet { columns: vec!["id".to_string()], rows }
    }

    #[test]
    fn test_truncation_at_45_rows() {
        let truncation = handle_too_many_rows(result_with_rows(45), 30);
        assert!(truncation.truncated);
        assert_eq!(truncation.result.row_count(), 30);
        let note = truncation.note.unwrap();
        assert!(note.contains("45"));
        assert!(note.contains("30"));
    }

    #[test]
    fn test_no_truncation_at_12_rows() {
        let truncation = handle_too_many_rows(result_with_rows(12), 30);
        assert!(!truncation.truncated);
        assert!(truncation.note.is_none());
        assert_eq!(truncation.result.row_count(), 12);
    }

    #[test]
    fn test_chart_eligibility_window() {
        assert!(!chart_eligible(4));
        assert!(chart_eligible(5));
        assert!(chart_eligible(30));
        assert!(!chart_eligible(31));
    }

    #[test]
    fn test_html_table_rendering() {
        let html = convert_to_html_table(&result_with_rows(2));
        assert!(html.starts_with("<table><tr><th>id</th></tr>"));
        assert!(html.contains("<td>0</td>"));
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn test_strip_document_tags() {
        let text = "```html\n<!DOCTYPE html><html><head><title>x</title></head><body><h1>Title</h1><p>kept</p></body></html>\n```";
        assert_eq!(strip_document_tags(text), "<p>kept</p>");
    }
}
