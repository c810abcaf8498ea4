//! Schema Validation
//!
//! Static referential checks of a SQL statement against the catalog, without
//! executing it. Table and column references are pulled out with regex scans;
//! this is a best-effort pre-filter for the dominant hallucination classes,
//! not a parser. Separately flags subquery shapes that fail at runtime with
//! "subquery returned more than 1 value".

use crate::schema::SchemaCatalog;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    UnknownTable {
        table: String,
    },
    UnknownColumn {
        table: String,
        column: String,
        suggestion: Option<String>,
    },
    SubqueryRisk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

lazy_static! {
    static ref TABLE_REF: Regex =
        Regex::new(r"(?i)\b(?:FROM|JOIN|INTO|UPDATE)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref ALIAS_DEF: Regex =
        Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*)\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref COLUMN_REF: Regex =
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\b").unwrap();
    static ref EQ_SUBQUERY_SELECT_LIST: Regex =
        Regex::new(r"=\s*\(\s*SELECT\s+([^)]+?)\s+FROM").unwrap();
    static ref NESTED_EQ_SUBQUERY: Regex =
        Regex::new(r"=\s*\(\s*SELECT[^)]+WHERE[^)]+\(\s*SELECT").unwrap();
    static ref GROUPED_EQ_SUBQUERY: Regex =
        Regex::new(r"=\s*\(\s*SELECT[^)]+GROUP\s+BY[^)]+\)").unwrap();
}

/// Identifiers after FROM/JOIN that are clause keywords, not aliases.
const ALIAS_KEYWORD_COLLISIONS: [&str; 14] = [
    "ON", "WHERE", "AND", "OR", "INNER", "LEFT", "RIGHT", "OUTER", "CROSS", "JOIN", "GROUP",
    "ORDER", "HAVING", "UNION",
];

const AGGREGATE_MARKERS: [&str; 6] = ["MAX(", "MIN(", "COUNT(", "SUM(", "AVG(", "TOP 1"];

const TABLE_HINT_LIMIT: usize = 10;
const COLUMN_HINT_LIMIT: usize = 15;

/// Check SQL against the catalog. Pure function of its inputs: no model
/// calls, no database round-trip. `is_valid` is true iff no issues.
pub fn validate_sql(sql: &str, catalog: &SchemaCatalog) -> (bool, Vec<ValidationIssue>) {
    let mut issues = Vec::new();

    let tables_used = extract_tables(sql);
    let columns_used = extract_columns_by_table(sql);

    for table in &tables_used {
        if !catalog.contains_table(table) {
            let hints = catalog.table_names().into_iter().take(TABLE_HINT_LIMIT).join(", ");
            issues.push(ValidationIssue {
                kind: IssueKind::UnknownTable { table: table.clone() },
                message: format!("Table '{}' does not exist. Available tables: {}", table, hints),
            });
        }
    }

    for (table, columns) in &columns_used {
        let Some(valid_columns) = catalog.columns_for(table) else {
            // unknown table is reported above when referenced via FROM/JOIN
            continue;
        };
        for column in columns {
            if valid_columns.iter().any(|c| c == &column.to_lowercase()) {
                continue;
            }
            let suggestion = catalog.suggest_column(table, column);
            let suggestion_text = suggestion
                .as_deref()
                .map(|s| format!(" Did you mean: {}?", s))
                .unwrap_or_default();
            let hints = valid_columns.iter().take(COLUMN_HINT_LIMIT).join(", ");
            issues.push(ValidationIssue {
                kind: IssueKind::UnknownColumn {
                    table: table.clone(),
                    column: column.clone(),
                    suggestion,
                },
                message: format!(
                    "Column '{}' does not exist in table '{}'.{} Valid columns: {}",
                    column, table, suggestion_text, hints
                ),
            });
        }
    }

    issues.extend(subquery_risks(sql));

    (issues.is_empty(), issues)
}

/// Table names referenced after FROM/JOIN/INTO/UPDATE, deduplicated
/// case-insensitively, in first-seen order.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    extract_tables(sql)
}

fn extract_tables(sql: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tables = Vec::new();
    for caps in TABLE_REF.captures_iter(sql) {
        let table = caps[1].to_string();
        if seen.insert(table.to_uppercase()) {
            tables.push(table);
        }
    }
    tables
}

/// Map alias -> table for `FROM table [AS] alias` / `JOIN table [AS] alias`.
fn build_alias_map(sql: &str) -> HashMap<String, String> {
    let mut alias_map = HashMap::new();
    for caps in ALIAS_DEF.captures_iter(sql) {
        let table = caps[1].to_string();
        let alias = caps[2].to_string();
        if !ALIAS_KEYWORD_COLLISIONS.contains(&alias.to_uppercase().as_str()) {
            alias_map.insert(alias.to_lowercase(), table);
        }
    }
    alias_map
}

/// `alias.column` / `table.column` references grouped by resolved table
/// (upper-cased, sorted for deterministic error ordering); unmapped
/// qualifiers fall back to the literal token.
fn extract_columns_by_table(sql: &str) -> BTreeMap<String, Vec<String>> {
    let alias_map = build_alias_map(sql);
    let mut columns_by_table: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for caps in COLUMN_REF.captures_iter(sql) {
        let qualifier = caps[1].to_string();
        let column = caps[2].to_string();
        let table = alias_map
            .get(&qualifier.to_lowercase())
            .cloned()
            .unwrap_or(qualifier);
        let entry = columns_by_table.entry(table.to_uppercase()).or_default();
        if !entry.contains(&column) {
            entry.push(column);
        }
    }

    columns_by_table
}

/// The three shapes that statistically produce "subquery returned more than
/// 1 value" at runtime.
fn subquery_risks(sql: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let upper = sql.to_uppercase();

    for caps in EQ_SUBQUERY_SELECT_LIST.captures_iter(&upper) {
        let select_list = &caps[1];
        if !AGGREGATE_MARKERS.iter().any(|m| select_list.contains(m)) {
            issues.push(ValidationIssue {
                kind: IssueKind::SubqueryRisk,
                message: "SUBQUERY WARNING: Subquery with '=' may return multiple values. \
                          Use 'TOP 1' or aggregate functions (MAX, MIN) in subquery, or use 'IN' instead of '='."
                    .to_string(),
            });
            break;
        }
    }

    if NESTED_EQ_SUBQUERY.is_match(&upper) {
        issues.push(ValidationIssue {
            kind: IssueKind::SubqueryRisk,
            message: "SUBQUERY WARNING: Nested subqueries with '=' operator detected. \
                      Consider using JOINs or ensure each subquery returns exactly one value with TOP 1."
                .to_string(),
        });
    }

    if GROUPED_EQ_SUBQUERY.is_match(&upper) && !upper.contains("TOP 1") {
        issues.push(ValidationIssue {
            kind: IssueKind::SubqueryRisk,
            message: "SUBQUERY WARNING: Subquery with GROUP BY used with '=' operator may return \
                      multiple values. Add 'TOP 1' or use 'IN' operator instead."
                .to_string(),
        });
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_create_statements([
            (
                "ORDERS",
                "CREATE TABLE orders (\n  id INT,\n  total DECIMAL(18,2)\n)".to_string(),
            ),
            (
                "CUSTOMERS",
                "CREATE TABLE customers (\n  id INT,\n  name NVARCHAR(100)\n)".to_string(),
            ),
        ])
    }

    #[test]
    fn test_valid_sql_passes() {
        let (is_valid, issues) =
            validate_sql("SELECT o.total FROM orders o JOIN customers c ON o.id = c.id", &catalog());
        assert!(is_valid, "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_unknown_table_lists_known_tables() {
        let (is_valid, issues) = validate_sql("SELECT * FROM ORDRS", &catalog());
        assert!(!is_valid);
        assert_eq!(issues.len(), 1);
        assert!(matches!(issues[0].kind, IssueKind::UnknownTable { .. }));
        assert!(issues[0].message.contains("ORDRS"));
        assert!(issues[0].message.contains("ORDERS"));
        assert!(issues[0].message.contains("CUSTOMERS"));
    }

    #[test]
    fn test_unknown_column_with_suggestion_through_alias() {
        let (is_valid, issues) =
            validate_sql("SELECT c.nam FROM customers AS c", &catalog());
        assert!(!is_valid);
        match &issues[0].kind {
            IssueKind::UnknownColumn { table, column, suggestion } => {
                assert_eq!(table, "CUSTOMERS");
                assert_eq!(column, "nam");
                assert_eq!(suggestion.as_deref(), Some("name"));
            }
            other => panic!("expected unknown column, got {:?}", other),
        }
        assert!(issues[0].message.contains("Did you mean: name?"));
    }

    #[test]
    fn test_eq_subquery_without_limit_is_flagged() {
        let (is_valid, issues) =
            validate_sql("SELECT * FROM orders WHERE total = (SELECT total FROM orders)", &catalog());
        assert!(!is_valid);
        assert!(issues.iter().any(|i| i.kind == IssueKind::SubqueryRisk));
    }

    #[test]
    fn test_top1_and_aggregate_subqueries_are_not_flagged() {
        let (is_valid, _) = validate_sql(
            "SELECT * FROM orders WHERE total = (SELECT TOP 1 total FROM orders)",
            &catalog(),
        );
        assert!(is_valid);

        let (is_valid, _) = validate_sql(
            "SELECT * FROM orders WHERE total = (SELECT MAX(total) FROM orders)",
            &catalog(),
        );
        assert!(is_valid);
    }

    #[test]
    fn test_nested_eq_subqueries_are_flagged() {
        let sql = "SELECT * FROM orders WHERE id = (SELECT id FROM customers WHERE name = (SELECT name FROM customers))";
        let (_, issues) = validate_sql(sql, &catalog());
        assert!(issues
            .iter()
            .any(|i| i.message.contains("Nested subqueries")));
    }

    #[test]
    fn test_grouped_eq_subquery_without_top1_is_flagged() {
        let sql = "SELECT * FROM orders WHERE total = (SELECT total FROM orders GROUP BY total)";
        let (_, issues) = validate_sql(sql, &catalog());
        assert!(issues.iter().any(|i| i.message.contains("GROUP BY")));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let sql = "SELECT c.nam FROM customers c WHERE c.id = (SELECT id FROM ORDRS)";
        let first = validate_sql(sql, &catalog());
        let second = validate_sql(sql, &catalog());
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn test_alias_map_skips_clause_keywords() {
        // WHERE must not be read as an alias for orders
        let (is_valid, issues) = validate_sql("SELECT id FROM orders WHERE total > 5", &catalog());
        assert!(is_valid, "unexpected issues: {:?}", issues);
    }
}
