//! SQL Extraction
//!
//! Pulls one SQL statement out of free-form model output. Layered patterns,
//! first match wins: tagged ```sql fence, untagged fence that starts with
//! SELECT, a CTE in plain text, then a bare SELECT. Plain-text matches are
//! truncated at the first blank line or explanation marker.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error};

lazy_static! {
    static ref FENCED_SQL: Regex = Regex::new(r"(?is)```sql\s*(.*?)\s*```").unwrap();
    static ref FENCED_SELECT: Regex = Regex::new(r"(?is)```\s*(SELECT.*?)\s*```").unwrap();
    static ref CTE_IN_TEXT: Regex =
        Regex::new(r"(?is)(WITH\s+\w+\s+AS\s*\([\s\S]*?SELECT[\s\S]*?)(?:\n[ \t]*\n|$)").unwrap();
    static ref SELECT_IN_TEXT: Regex = Regex::new(r"(?is)(SELECT[\s\S]*?)(?:\n[ \t]*\n|$)").unwrap();
    static ref EXPLANATION_MARKER: Regex =
        Regex::new(r"(?i)\n\s*(?:Explanation|Note|This query)").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

/// Extract one best-guess SQL statement from model output text.
/// `None` means no recognizable SQL anywhere in the response.
pub fn extract_sql(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        error!("Empty input to extract_sql");
        return None;
    }

    if let Some(caps) = FENCED_SQL.captures(text) {
        debug!("Extracted SQL from ```sql block");
        return Some(strip_comments(caps[1].trim()));
    }

    if let Some(caps) = FENCED_SELECT.captures(text) {
        debug!("Extracted SQL from untagged ``` block");
        return Some(strip_comments(caps[1].trim()));
    }

    if let Some(caps) = CTE_IN_TEXT.captures(text) {
        debug!("Extracted CTE SQL from plain text");
        let sql = cut_at_explanation(caps[1].trim());
        return Some(strip_comments(&sql));
    }

    if let Some(caps) = SELECT_IN_TEXT.captures(text) {
        debug!("Extracted plain SELECT SQL");
        let sql = cut_at_explanation(caps[1].trim());
        return Some(strip_comments(sql.trim_end_matches(';').trim()));
    }

    error!(
        "Failed to extract SQL. Response preview: {}",
        &text[..text.char_indices().nth(500).map(|(i, _)| i).unwrap_or(text.len())]
    );
    None
}

fn cut_at_explanation(sql: &str) -> String {
    match EXPLANATION_MARKER.find(sql) {
        Some(m) => sql[..m.start()].trim().to_string(),
        None => sql.to_string(),
    }
}

fn strip_comments(sql: &str) -> String {
    let sql = LINE_COMMENT.replace_all(sql, "");
    let sql = BLOCK_COMMENT.replace_all(&sql, "");
    sql.trim().to_string()
}

lazy_static! {
    static ref MUTATING_KEYWORD: Regex =
        Regex::new(r"\b(DROP|DELETE|TRUNCATE|INSERT|UPDATE|ALTER|CREATE|EXEC)\b").unwrap();
}

/// Sanity-check an extracted statement before it reaches the database.
/// The target is read-only by contract; this is the statement-level half of
/// that enforcement.
pub fn guard_sql(sql: &str) -> std::result::Result<(), String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err("No SQL query extracted".to_string());
    }

    let upper = trimmed.to_uppercase();

    if !["SELECT", "WITH", "DECLARE"].iter().any(|kw| upper.starts_with(kw)) {
        return Err(format!(
            "SQL must start with SELECT, WITH, or DECLARE. Found: {}",
            &trimmed[..trimmed.char_indices().nth(50).map(|(i, _)| i).unwrap_or(trimmed.len())]
        ));
    }

    let forbidden: Vec<&str> = MUTATING_KEYWORD
        .captures_iter(&upper)
        .map(|c| c.get(1).map(|m| m.as_str()).unwrap_or_default())
        .collect();
    if !forbidden.is_empty() {
        return Err(format!("Query contains forbidden operations: {}", forbidden.join(", ")));
    }

    if trimmed.matches('(').count() != trimmed.matches(')').count() {
        return Err("Unbalanced parentheses in query".to_string());
    }

    if trimmed.len() < 20 {
        return Err("Query too short to be valid".to_string());
    }

    if !upper.contains("FROM") && upper.contains("SELECT") {
        // allow trivial statements like SELECT 1
        if trimmed.len() < 30 {
            return Ok(());
        }
        return Err("SELECT query missing FROM clause".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_sql_block_wins_over_bare_select() {
        let text = "SELECT * FROM wrong_pick\n\nUse this instead:\n```sql\nSELECT member_name FROM dim_member\n```";
        let sql = extract_sql(text).unwrap();
        assert_eq!(sql, "SELECT member_name FROM dim_member");
    }

    #[test]
    fn test_untagged_fence_requires_select() {
        let text = "```\nSELECT 1 FROM dual\n```";
        assert_eq!(extract_sql(text).unwrap(), "SELECT 1 FROM dual");
    }

    #[test]
    fn test_cte_in_plain_text_stops_at_blank_line() {
        let text = "WITH recent AS (SELECT date_key FROM dim_date) SELECT * FROM recent\n\nThis pulls recent dates.";
        let sql = extract_sql(text).unwrap();
        assert!(sql.starts_with("WITH recent AS"));
        assert!(!sql.contains("This pulls"));
    }

    #[test]
    fn test_bare_select_drops_explanation_and_semicolon() {
        let text = "SELECT member_name FROM dim_member;\nExplanation: simple lookup";
        let sql = extract_sql(text).unwrap();
        assert_eq!(sql, "SELECT member_name FROM dim_member");
    }

    #[test]
    fn test_comments_are_stripped() {
        let text = "```sql\nSELECT member_name -- display name\nFROM dim_member /* dimension */\n```";
        let sql = extract_sql(text).unwrap();
        assert!(!sql.contains("--"));
        assert!(!sql.contains("/*"));
        assert!(sql.contains("FROM dim_member"));
    }

    #[test]
    fn test_no_sql_returns_none() {
        assert!(extract_sql("I cannot answer that question.").is_none());
        assert!(extract_sql("").is_none());
    }

    #[test]
    fn test_guard_rejects_mutating_sql() {
        let err = guard_sql("DELETE FROM dim_member WHERE member_key = 1").unwrap_err();
        assert!(err.contains("SELECT, WITH, or DECLARE"));

        let err = guard_sql("SELECT 1; DROP TABLE dim_member").unwrap_err();
        assert!(err.contains("DROP"));
    }

    #[test]
    fn test_guard_allows_column_names_containing_keywords() {
        assert!(guard_sql("SELECT last_updated_date FROM dim_member").is_ok());
    }

    #[test]
    fn test_guard_checks_structure() {
        assert!(guard_sql("SELECT (1 FROM x").is_err());
        assert!(guard_sql("SELECT 1").is_err()); // below minimum length
        assert!(guard_sql("SELECT 1 AS one_value").is_ok());
        let err = guard_sql(&format!("SELECT {}", "a, ".repeat(20))).unwrap_err();
        assert!(err.contains("missing FROM"));
    }
}
