//! Schema discovery
//!
//! Builds the catalog from a live database through the execution
//! collaborator: INFORMATION_SCHEMA columns with primary keys, foreign key
//! relationships, and a few sample rows per table, synthesized into CREATE
//! TABLE text the prompts can carry.

use crate::error::{Result, SenseError};
use crate::exec::{ExecutionOutcome, QueryExecutor, ResultSet};
use crate::schema::catalog::SchemaCatalog;
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::warn;

const SAMPLE_ROWS_PER_TABLE: usize = 3;

/// Discover the given tables and build an immutable catalog from them.
pub async fn build_schema_catalog(
    executor: &dyn QueryExecutor,
    table_names: &[String],
) -> Result<SchemaCatalog> {
    let quoted = table_names.iter().map(|t| format!("'{}'", t.trim())).join(",");

    let schema_rows = run(executor, &column_metadata_query(&quoted)).await?;
    let fk_rows = run(executor, &foreign_key_query(&quoted)).await?;

    let mut tables: BTreeMap<String, TableParts> = BTreeMap::new();

    for row in &schema_rows.rows {
        let table = string_field(row, "TABLE_NAME");
        if table.is_empty() {
            continue;
        }
        let entry = tables.entry(table.to_uppercase()).or_insert_with(|| TableParts {
            name: table.clone(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        });

        let mut col_def = format!(
            "{} {}",
            string_field(row, "COLUMN_NAME"),
            string_field(row, "DATA_TYPE")
        );
        if let Some(max_len) = row.get("CHARACTER_MAXIMUM_LENGTH").and_then(|v| v.as_i64()) {
            if max_len > 0 {
                col_def.push_str(&format!("({})", max_len));
            }
        }
        if row.get("IS_PRIMARY_KEY").and_then(|v| v.as_i64()) == Some(1) {
            col_def.push_str(" PRIMARY KEY");
        }
        if string_field(row, "IS_NULLABLE") == "NO" {
            col_def.push_str(" NOT NULL");
        }
        entry.columns.push(col_def);
    }

    for row in &fk_rows.rows {
        let parent = string_field(row, "Parent_Table").to_uppercase();
        if let Some(entry) = tables.get_mut(&parent) {
            let fk = format!(
                "{} -> {}.{}",
                string_field(row, "Parent_Column"),
                string_field(row, "Referenced_Table"),
                string_field(row, "Referenced_Column")
            );
            if !entry.foreign_keys.contains(&fk) {
                entry.foreign_keys.push(fk);
            }
        }
    }

    let mut statements = Vec::new();
    for parts in tables.values() {
        let sample = sample_rows(executor, &parts.name).await;
        statements.push((parts.name.clone(), parts.to_create_statement(sample.as_ref())));
    }

    Ok(SchemaCatalog::from_create_statements(statements))
}

struct TableParts {
    name: String,
    columns: Vec<String>,
    foreign_keys: Vec<String>,
}

impl TableParts {
    fn to_create_statement(&self, sample: Option<&ResultSet>) -> String {
        let mut stmt = format!("CREATE TABLE {} (\n  {}\n)", self.name, self.columns.join(",\n  "));

        if !self.foreign_keys.is_empty() {
            stmt.push_str("\n/* Foreign Keys:\n");
            for fk in &self.foreign_keys {
                stmt.push_str(&format!("   - {}\n", fk));
            }
            stmt.push_str("*/");
        }

        if let Some(sample) = sample.filter(|s| !s.is_empty()) {
            stmt.push_str("\n/* Sample data:\n");
            stmt.push_str(&format_sample_data(sample));
            stmt.push_str("\n*/");
        }

        stmt
    }
}

async fn run(executor: &dyn QueryExecutor, sql: &str) -> Result<ResultSet> {
    match executor.execute(sql).await {
        ExecutionOutcome::Success(rows) => Ok(rows),
        ExecutionOutcome::Error(e) => Err(SenseError::Schema(format!("Schema discovery query failed: {}", e))),
    }
}

async fn sample_rows(executor: &dyn QueryExecutor, table: &str) -> Option<ResultSet> {
    let sql = format!("SELECT TOP {} * FROM {}", SAMPLE_ROWS_PER_TABLE, table);
    match executor.execute(&sql).await {
        ExecutionOutcome::Success(rows) => Some(rows),
        ExecutionOutcome::Error(e) => {
            warn!("Sample data fetch failed for {}: {}", table, e);
            None
        }
    }
}

/// One line per column: `column: value1, value2, value3`.
fn format_sample_data(sample: &ResultSet) -> String {
    sample
        .columns
        .iter()
        .map(|column| {
            let values = sample
                .rows
                .iter()
                .map(|row| match row.get(column) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => "NULL".to_string(),
                })
                .join(", ");
            format!("{}: {}", column, values)
        })
        .join("\n")
}

fn string_field(row: &crate::exec::Row, key: &str) -> String {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(v) => v.to_string(),
    }
}

fn column_metadata_query(quoted_tables: &str) -> String {
    format!(
        "SELECT
    t.TABLE_SCHEMA,
    t.TABLE_NAME,
    c.COLUMN_NAME,
    c.DATA_TYPE,
    c.CHARACTER_MAXIMUM_LENGTH,
    c.IS_NULLABLE,
    CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END as IS_PRIMARY_KEY,
    c.ORDINAL_POSITION
FROM INFORMATION_SCHEMA.TABLES t
INNER JOIN INFORMATION_SCHEMA.COLUMNS c
    ON t.TABLE_NAME = c.TABLE_NAME AND t.TABLE_SCHEMA = c.TABLE_SCHEMA
LEFT JOIN (
    SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    INNER JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
        ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
) pk ON c.TABLE_NAME = pk.TABLE_NAME
    AND c.COLUMN_NAME = pk.COLUMN_NAME
    AND c.TABLE_SCHEMA = pk.TABLE_SCHEMA
WHERE t.TABLE_NAME IN ({})
    AND t.TABLE_TYPE = 'BASE TABLE'
ORDER BY t.TABLE_NAME, c.ORDINAL_POSITION",
        quoted_tables
    )
}

fn foreign_key_query(quoted_tables: &str) -> String {
    format!(
        "SELECT
    fk.name AS FK_Name,
    OBJECT_NAME(fk.parent_object_id) AS Parent_Table,
    COL_NAME(fkc.parent_object_id, fkc.parent_column_id) AS Parent_Column,
    OBJECT_NAME(fk.referenced_object_id) AS Referenced_Table,
    COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS Referenced_Column
FROM sys.foreign_keys fk
INNER JOIN sys.foreign_key_columns fkc
    ON fk.object_id = fkc.constraint_object_id
WHERE OBJECT_NAME(fk.parent_object_id) IN ({0})
    OR OBJECT_NAME(fk.referenced_object_id) IN ({0})",
        quoted_tables
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubDb;

    #[async_trait]
    impl QueryExecutor for StubDb {
        async fn execute(&self, sql: &str) -> ExecutionOutcome {
            if sql.contains("INFORMATION_SCHEMA") {
                let mut rows = Vec::new();
                for (col, dtype, pk) in [
                    ("member_key", "int", 1),
                    ("member_name", "nvarchar", 0),
                ] {
                    let mut row = crate::exec::Row::new();
                    row.insert("TABLE_NAME".into(), "dim_member".into());
                    row.insert("COLUMN_NAME".into(), col.into());
                    row.insert("DATA_TYPE".into(), dtype.into());
                    row.insert("IS_NULLABLE".into(), "NO".into());
                    row.insert("IS_PRIMARY_KEY".into(), pk.into());
                    rows.push(row);
                }
                return ExecutionOutcome::Success(ResultSet {
                    columns: vec!["TABLE_NAME".into(), "COLUMN_NAME".into()],
                    rows,
                });
            }
            if sql.contains("sys.foreign_keys") {
                return ExecutionOutcome::Success(ResultSet::default());
            }
            // sample data query
            let mut row = crate::exec::Row::new();
            row.insert("member_key".into(), 1.into());
            row.insert("member_name".into(), "Alice".into());
            ExecutionOutcome::Success(ResultSet {
                columns: vec!["member_key".into(), "member_name".into()],
                rows: vec![row],
            })
        }
    }

    #[tokio::test]
    async fn test_discovered_catalog_has_columns_and_samples() {
        let catalog = build_schema_catalog(&StubDb, &["dim_member".to_string()])
            .await
            .unwrap();

        assert_eq!(catalog.columns_for("dim_member").unwrap(), &["member_key", "member_name"]);
        let stmt = &catalog.table("dim_member").unwrap().create_statement;
        assert!(stmt.contains("member_key int PRIMARY KEY NOT NULL"));
        assert!(stmt.contains("Sample data"));
        assert!(stmt.contains("member_name: Alice"));
    }
}
