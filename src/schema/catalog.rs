//! Schema Catalog
//!
//! The authoritative table -> columns mapping that validation trusts. Built
//! once from CREATE TABLE text (supplied or discovered) and immutable after
//! construction.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Original-cased table name.
    pub name: String,
    /// Column names, lower-cased, in declaration order.
    pub columns: Vec<String>,
    /// Full CREATE TABLE text, used verbatim in prompts.
    pub create_statement: String,
}

/// Case-insensitive table lookup keyed by upper-cased name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    /// Build a catalog from table name -> CREATE TABLE statement pairs.
    pub fn from_create_statements<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = (S, String)>,
        S: AsRef<str>,
    {
        let mut tables = BTreeMap::new();
        for (name, create_stmt) in statements {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let columns = extract_columns_from_create(&create_stmt);
            tables.insert(
                name.to_uppercase(),
                TableSchema {
                    name: name.to_string(),
                    columns,
                    create_statement: create_stmt,
                },
            );
        }
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.trim().to_uppercase())
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn columns_for(&self, table: &str) -> Option<&[String]> {
        self.table(table).map(|t| t.columns.as_slice())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> + '_ {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.values().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Concatenated CREATE TABLE text for the given tables, order-preserving,
    /// unknown names skipped.
    pub fn schema_context_for_tables<S: AsRef<str>>(&self, names: &[S]) -> String {
        let mut parts = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            let key = name.as_ref().trim().to_uppercase();
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(table) = self.tables.get(&key) {
                parts.push(table.create_statement.clone());
            }
        }
        parts.join("\n\n")
    }

    /// A table acts as the date dimension when it carries a `full_date`
    /// column; the deterministic ORDER BY repair targets those tables.
    pub fn is_date_dimension(&self, table: &str) -> bool {
        self.columns_for(table)
            .map(|cols| cols.iter().any(|c| c == "full_date"))
            .unwrap_or(false)
    }

    /// Best-effort replacement for a column that does not exist in `table`:
    /// substring containment first, then `_`/whitespace word overlap.
    pub fn suggest_column(&self, table: &str, column: &str) -> Option<String> {
        let columns = self.columns_for(table)?;
        let column = column.to_lowercase();

        for valid in columns {
            if valid.contains(&column) || column.contains(valid.as_str()) {
                return Some(valid.clone());
            }
        }

        let column_words: HashSet<&str> = split_words(&column).collect();
        let mut best: Option<(&String, usize)> = None;
        for valid in columns {
            let overlap = split_words(valid).filter(|w| column_words.contains(w)).count();
            if overlap > best.map(|(_, score)| score).unwrap_or(0) {
                best = Some((valid, overlap));
            }
        }

        best.map(|(name, _)| name.clone())
    }
}

fn split_words(name: &str) -> impl Iterator<Item = &str> + '_ {
    name.split(|c: char| c == '_' || c.is_whitespace()).filter(|w| !w.is_empty())
}

lazy_static! {
    // Column definitions live between the outer parentheses; trailing comment
    // blocks (/* Foreign Keys ... */ etc.) sit after the closing paren.
    static ref CREATE_BODY: Regex = Regex::new(r"(?s)\((.*)\)").unwrap();
}

const NON_COLUMN_KEYWORDS: [&str; 5] = ["PRIMARY", "FOREIGN", "CONSTRAINT", "INDEX", "UNIQUE"];

/// Pull column names out of a CREATE TABLE statement. Heuristic: one column
/// definition per line, first token is the column name unless the line opens
/// a constraint clause.
pub fn extract_columns_from_create(create_stmt: &str) -> Vec<String> {
    let mut columns = Vec::new();

    // Constraint/sample-data comment blocks after the body confuse the
    // greedy paren match, so cut the statement at the first comment block.
    let body_source = create_stmt.split("/*").next().unwrap_or(create_stmt);
    let Some(body) = CREATE_BODY.captures(body_source).and_then(|c| c.get(1)) else {
        return columns;
    };

    for line in body.as_str().lines() {
        let line = line.trim().trim_end_matches(',');
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };
        if NON_COLUMN_KEYWORDS.contains(&first.to_uppercase().as_str()) {
            continue;
        }
        let name = first.trim_matches(|c| matches!(c, '`' | '"' | '[' | ']'));
        if !name.is_empty() {
            columns.push(name.to_lowercase());
        }
    }

    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> SchemaCatalog {
        SchemaCatalog::from_create_statements([
            (
                "DIM_MEMBER",
                "CREATE TABLE dim_member (\n  member_key INT PRIMARY KEY,\n  member_name NVARCHAR(100) NOT NULL,\n  is_current BIT,\n  PRIMARY KEY (member_key)\n)".to_string(),
            ),
            (
                "DIM_DATE",
                "CREATE TABLE dim_date (\n  date_key INT PRIMARY KEY,\n  full_date DATE,\n  year INT,\n  quarter INT\n)\n/* Sample data:\ndate_key: 1, 2, 3\n*/".to_string(),
            ),
        ])
    }

    #[test]
    fn test_extract_columns_skips_constraints_and_comments() {
        let catalog = sample_catalog();
        let columns = catalog.columns_for("dim_member").unwrap();
        assert_eq!(columns, &["member_key", "member_name", "is_current"]);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = sample_catalog();
        assert!(catalog.contains_table("dim_date"));
        assert!(catalog.contains_table("DIM_DATE"));
        assert!(!catalog.contains_table("dim_branch"));
    }

    #[test]
    fn test_trailing_comment_block_does_not_leak_columns() {
        let catalog = sample_catalog();
        let columns = catalog.columns_for("DIM_DATE").unwrap();
        assert_eq!(columns, &["date_key", "full_date", "year", "quarter"]);
    }

    #[test]
    fn test_schema_context_skips_unknown_and_dedupes() {
        let catalog = sample_catalog();
        let context = catalog.schema_context_for_tables(&["dim_date", "nope", "DIM_DATE", "dim_member"]);
        assert_eq!(context.matches("CREATE TABLE dim_date").count(), 1);
        assert!(context.contains("CREATE TABLE dim_member"));
    }

    #[test]
    fn test_date_dimension_detection() {
        let catalog = sample_catalog();
        assert!(catalog.is_date_dimension("dim_date"));
        assert!(!catalog.is_date_dimension("dim_member"));
    }

    #[test]
    fn test_suggest_column_substring_then_word_overlap() {
        let catalog = sample_catalog();
        // substring containment
        assert_eq!(
            catalog.suggest_column("dim_member", "name").as_deref(),
            Some("member_name")
        );
        // word overlap without containment either way
        assert_eq!(
            catalog.suggest_column("dim_date", "date_full").as_deref(),
            Some("full_date")
        );
        assert_eq!(catalog.suggest_column("dim_date", "zzz"), None);
    }
}
