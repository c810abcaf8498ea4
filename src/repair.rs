//! Heuristic Repair
//!
//! Deterministic SQL rewrites for validator-flagged issues, applied without a
//! model call: suggested-column substitution and TOP 1 insertion into
//! risky `= (SELECT ...)` subqueries. One pass per error set; any looping
//! lives in the orchestrator.

use crate::schema::SchemaCatalog;
use crate::validate::{IssueKind, ValidationIssue};
use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;
use tracing::{debug, warn};

/// A suggested column is substituted automatically only when it is at least
/// this similar to the wrong name. Below the floor the issue is left for
/// model-assisted repair instead of a silent low-confidence rewrite.
pub const SUGGESTION_CONFIDENCE_FLOOR: f64 = 0.55;

lazy_static! {
    static ref EQ_SUBQUERY: Regex =
        Regex::new(r"(?i)=\s*\(\s*SELECT\s+[^)]+\s+FROM\s+[^)]+\)").unwrap();
    static ref NESTED_SUBQUERY: Regex =
        Regex::new(r"(?i)\(\s*SELECT\s+[^)]+WHERE[^)]+\(\s*SELECT\s+[^)]+\)\s*\)").unwrap();
    static ref TOP1_SUBQUERY: Regex = Regex::new(r"(?i)\(\s*SELECT\s+TOP\s+1[^)]+\)").unwrap();
    static ref SELECT_KEYWORD: Regex = Regex::new(r"(?i)(SELECT\s+)").unwrap();
    static ref FROM_TABLE: Regex = Regex::new(r"(?i)FROM\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

const AGGREGATE_MARKERS: [&str; 5] = ["MAX(", "MIN(", "COUNT(", "SUM(", "AVG("];

/// Apply deterministic fixes for the given issues. Returns the possibly
/// rewritten SQL and the issues no textual transform could address; callers
/// re-validate the result.
pub fn repair_sql(
    sql: &str,
    issues: &[ValidationIssue],
    catalog: &SchemaCatalog,
) -> (String, Vec<ValidationIssue>) {
    let mut fixed = sql.to_string();
    let mut remaining = Vec::new();

    for issue in issues {
        match &issue.kind {
            IssueKind::UnknownColumn { column, suggestion: Some(suggestion), .. } => {
                let confidence = jaro_winkler(&column.to_lowercase(), &suggestion.to_lowercase());
                if confidence < SUGGESTION_CONFIDENCE_FLOOR {
                    debug!(
                        "Suggestion '{}' for column '{}' below confidence floor ({:.2})",
                        suggestion, column, confidence
                    );
                    remaining.push(issue.clone());
                    continue;
                }
                fixed = replace_word(&fixed, column, suggestion);
            }
            IssueKind::SubqueryRisk => {
                fixed = fix_subquery_issues(&fixed, catalog);
            }
            _ => remaining.push(issue.clone()),
        }
    }

    (fixed, remaining)
}

/// Whole-word, case-insensitive replacement everywhere in the SQL.
fn replace_word(sql: &str, word: &str, replacement: &str) -> String {
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))) {
        Ok(pattern) => pattern.replace_all(sql, replacement).into_owned(),
        Err(e) => {
            warn!("Could not build replacement pattern for '{}': {}", word, e);
            sql.to_string()
        }
    }
}

/// Rewrite subquery shapes that return multiple values where `=` needs one:
/// insert `TOP 1` into flat and one-level-nested `= (SELECT ...)` subqueries
/// lacking an aggregate, and give date-dimension TOP 1 subqueries a
/// deterministic ORDER BY.
pub fn fix_subquery_issues(sql: &str, catalog: &SchemaCatalog) -> String {
    let with_top = EQ_SUBQUERY.replace_all(sql, |caps: &regex::Captures| {
        let subquery = &caps[0];
        let upper = subquery.to_uppercase();
        if upper.contains("TOP") || AGGREGATE_MARKERS.iter().any(|m| upper.contains(m)) {
            return subquery.to_string();
        }
        SELECT_KEYWORD.replacen(subquery, 1, "${1}TOP 1 ").into_owned()
    });

    let with_nested = NESTED_SUBQUERY.replace_all(&with_top, |caps: &regex::Captures| {
        let subquery = &caps[0];
        if subquery.to_uppercase().contains("TOP") {
            return subquery.to_string();
        }
        SELECT_KEYWORD.replacen(subquery, 1, "${1}TOP 1 ").into_owned()
    });

    // TOP 1 against the date dimension is only meaningful with an order
    let with_order = TOP1_SUBQUERY.replace_all(&with_nested, |caps: &regex::Captures| {
        let subquery = &caps[0];
        if subquery.to_uppercase().contains("ORDER BY") {
            return subquery.to_string();
        }
        let targets_date_dimension = FROM_TABLE
            .captures_iter(subquery)
            .any(|c| catalog.is_date_dimension(&c[1]));
        if !targets_date_dimension {
            return subquery.to_string();
        }
        match subquery.strip_suffix(')') {
            Some(body) => format!("{} ORDER BY full_date DESC)", body.trim_end()),
            None => subquery.to_string(),
        }
    });

    with_order.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_sql;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_create_statements([
            (
                "CUSTOMERS",
                "CREATE TABLE customers (\n  id INT,\n  name NVARCHAR(100)\n)".to_string(),
            ),
            (
                "ORDERS",
                "CREATE TABLE orders (\n  id INT,\n  total DECIMAL(18,2)\n)".to_string(),
            ),
            (
                "DIM_DATE",
                "CREATE TABLE dim_date (\n  date_key INT,\n  full_date DATE,\n  year INT\n)".to_string(),
            ),
        ])
    }

    #[test]
    fn test_suggested_column_fix_converges() {
        let catalog = catalog();
        let sql = "SELECT c.nam FROM customers c WHERE c.nam LIKE 'A%'";
        let (_, issues) = validate_sql(sql, &catalog);

        let (fixed, remaining) = repair_sql(sql, &issues, &catalog);
        assert!(remaining.is_empty());
        assert_eq!(fixed, "SELECT c.name FROM customers c WHERE c.name LIKE 'A%'");

        let (is_valid, reissues) = validate_sql(&fixed, &catalog);
        assert!(is_valid, "repair did not converge: {:?}", reissues);
    }

    #[test]
    fn test_low_confidence_suggestion_is_not_applied() {
        let catalog = catalog();
        let issue = ValidationIssue {
            kind: IssueKind::UnknownColumn {
                table: "ORDERS".to_string(),
                column: "zzz_qty".to_string(),
                suggestion: Some("id".to_string()),
            },
            message: "Column 'zzz_qty' does not exist in table 'ORDERS'.".to_string(),
        };
        let sql = "SELECT o.zzz_qty FROM orders o";

        let (fixed, remaining) = repair_sql(sql, &[issue], &catalog);
        assert_eq!(fixed, sql);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_unknown_table_passes_through() {
        let catalog = catalog();
        let sql = "SELECT * FROM ORDRS";
        let (_, issues) = validate_sql(sql, &catalog);

        let (fixed, remaining) = repair_sql(sql, &issues, &catalog);
        assert_eq!(fixed, sql);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_top1_inserted_into_eq_subquery() {
        let catalog = catalog();
        let sql = "SELECT * FROM orders WHERE total = (SELECT total FROM orders)";
        let (_, issues) = validate_sql(sql, &catalog);

        let (fixed, _) = repair_sql(sql, &issues, &catalog);
        assert!(fixed.contains("(SELECT TOP 1 total FROM orders)"));

        let (is_valid, _) = validate_sql(&fixed, &catalog);
        assert!(is_valid);
    }

    #[test]
    fn test_aggregate_subquery_left_alone() {
        let catalog = catalog();
        let sql = "SELECT * FROM orders WHERE total = (SELECT MAX(total) FROM orders)";
        assert_eq!(fix_subquery_issues(sql, &catalog), sql);
    }

    #[test]
    fn test_date_dimension_subquery_gets_order_by() {
        let catalog = catalog();
        let sql = "SELECT * FROM orders o WHERE o.id = (SELECT date_key FROM dim_date WHERE year = 2024)";
        let fixed = fix_subquery_issues(sql, &catalog);
        assert!(fixed.contains("SELECT TOP 1 date_key FROM dim_date"));
        assert!(fixed.contains("ORDER BY full_date DESC)"));
    }

    #[test]
    fn test_non_date_subquery_gets_no_order_by() {
        let catalog = catalog();
        let sql = "SELECT * FROM orders WHERE total = (SELECT total FROM orders)";
        let fixed = fix_subquery_issues(sql, &catalog);
        assert!(!fixed.contains("ORDER BY"));
    }
}
