//! Prompt construction
//!
//! All model prompts in one place: both generation stages, the error-driven
//! fix, output formatting, question generation, and chart options.

use crate::schema::RetrievedSchema;
use crate::twostage::JoinHint;
use itertools::Itertools;
use std::collections::HashMap;

/// Stage 1: ask the model to pick exact tables/columns for the question.
pub fn table_column_selection_prompt(query: &str, available_schemas: &[RetrievedSchema]) -> String {
    let schema_info = available_schemas
        .iter()
        .map(|schema| {
            format!(
                "TABLE: {}\nCOLUMNS: {}\n---",
                schema.table_name,
                schema.columns.join(", ")
            )
        })
        .join("\n");

    format!(
        r#"You are a database schema expert. Your task is to identify which tables and columns are needed to answer a question.

AVAILABLE TABLES AND COLUMNS:
{schema_info}

USER QUESTION: {query}

TASK: Identify the EXACT tables and columns needed. ONLY use columns that exist in the list above.

NOTE: If this is a FOLLOW-UP question with an ORIGINAL SQL provided, make sure to include all tables from the original SQL plus any additional tables needed for the follow-up.

Return your answer as JSON:
{{
    "tables": ["table1", "table2"],
    "columns": {{
        "table1": ["col1", "col2"],
        "table2": ["col3", "col4"]
    }},
    "joins": [
        {{"from": "table1.col", "to": "table2.col"}}
    ],
    "reasoning": "Brief explanation"
}}

CRITICAL: Only include columns that EXACTLY match the available columns listed above. Do not invent or guess column names."#
    )
}

/// Stage 2: constrained SQL generation over the validated selection.
pub fn constrained_sql_prompt(
    query: &str,
    selected_tables: &[String],
    selected_columns: &HashMap<String, Vec<String>>,
    join_hints: &[JoinHint],
    full_schemas: &str,
    data_horizon: Option<&str>,
) -> String {
    let columns_list = selected_columns
        .iter()
        .sorted_by(|a, b| a.0.cmp(b.0))
        .map(|(table, cols)| format!("  {}: {}", table, cols.join(", ")))
        .join("\n");

    let joins_list = join_hints
        .iter()
        .map(|join| format!("  - {} = {}", join.from_column, join.to_column))
        .join("\n");

    let date_rules = match data_horizon {
        Some(horizon) => format!(
            r#"3. Data exists ONLY through {horizon}. NEVER use GETDATE() or CURRENT_TIMESTAMP.
4. For "last N days/months" use: DATEADD(day/month, -N, CAST('{horizon}' AS DATE))"#
        ),
        None => "3. NEVER use GETDATE() or CURRENT_TIMESTAMP; anchor date math to dates present in the data.".to_string(),
    };

    format!(
        r#"You are an MS SQL expert. Generate a SQL query using ONLY the pre-selected tables and columns below.

CONSTRAINT: You MUST use ONLY these tables and columns. Do NOT use any other columns.

SELECTED TABLES: {tables}

SELECTED COLUMNS (use ONLY these):
{columns_list}

SUGGESTED JOINS:
{joins_list}

FULL SCHEMA REFERENCE:
{full_schemas}

USER QUESTION: {query}

FOLLOW-UP QUESTION HANDLING:
- If this contains "FOLLOW-UP QUESTION" and "ORIGINAL SQL", use the ORIGINAL SQL as your starting point
- Modify the original SQL to answer the follow-up question
- Keep the same table joins and structure where applicable
- Add/modify GROUP BY, WHERE, or SELECT as needed for the follow-up

CRITICAL RULES:
1. Use ONLY columns from the SELECTED COLUMNS list above
2. Use the *_key columns to join fact tables to their dimension tables
{date_rules}

IMPORTANT - NEVER SHOW IDs IN RESULTS:
- NEVER return _key or _id columns in SELECT - always JOIN to the dimension table and show the descriptive name/value instead
- The final SELECT should contain human-readable values, NOT numeric IDs/keys

Return ONLY the SQL query in a ```sql code block. No explanation."#,
        tables = selected_tables.join(", "),
    )
}

/// Model-assisted repair with the validator/database error text inlined.
pub fn sql_fix_prompt(sql: &str, error_context: &str, full_schemas: &str) -> String {
    format!(
        r#"The following SQL has errors. Fix it using ONLY valid columns.

ORIGINAL SQL:
{sql}

ERRORS:
{error_context}

VALID SCHEMA:
{full_schemas}

IMPORTANT - NEVER SHOW IDs IN RESULTS:
- NEVER return _key or _id columns in SELECT - JOIN to dimension tables and show descriptive names
- Final SELECT must contain human-readable values, NOT numeric IDs/keys

Check the schema for EXACT column names. Do NOT guess column names.
Generate corrected SQL using ONLY columns that exist in the schema above.
Return ONLY the corrected SQL in a ```sql code block."#
    )
}

pub fn output_format_prompt(db_output: &str, user_query: &str) -> String {
    format!(
        "Given that for the question '{user_query}', database output is '{db_output}', \
         provide the answer in HTML format without any css code. Add a 'highlight' class to the \
         metrics, column names and any other key entities in the answer. Include a table with the \
         given data with improved names for the column headings. IMPORTANT: Return ONLY the raw \
         HTML content without wrapping it in code blocks or markdown. Do NOT use ```html or ``` tags."
    )
}

pub fn related_questions_prompt(user_query: &str, db_schema: &str) -> String {
    format!(
        r#"Given user's question: {user_query}

Generate THREE easy follow-up questions.

CRITICAL: Questions MUST be answerable using ONLY tables/columns in this schema: {db_schema}

Rules:
- NEVER suggest questions requiring columns not in schema
- Schema shows ALL available columns
- Questions should be simple and SQL-friendly

Return as: ["question one", "question two", "question three"]"#
    )
}

pub fn insight_question_prompt(user_query: &str, db_schema: &str) -> String {
    format!(
        r#"Given user's question: {user_query}

Generate ONE additional insight question that explores the same data from a different angle.

CRITICAL: Question MUST be answerable using ONLY tables/columns in this schema: {db_schema}

Rules:
- NEVER suggest questions requiring columns not in schema
- Schema shows ALL available columns - don't assume more exist
- Question should be simple and directly answerable

Generate simple, answerable question based on available schema."#
    )
}

pub fn chart_options_prompt(dataset_json: &str) -> String {
    format!(
        r#"Provide apexcharts options value to create best suited chart for this dataset.

IMPORTANT CHART REQUIREMENTS:
1. CHART SIZE - chart.height: '500' or '100%', chart.width: '100%'
2. LEGEND - legend.position: 'bottom' or 'right', legend.horizontalAlign: 'center', legend.fontSize: '14px'
3. TITLE - clear and descriptive, title.align: 'center', title.style.fontSize: '18px'; wrap long titles with an array value or \n line breaks
4. DATA LABELS - dataLabels.enabled: true for pie/donut, dataLabels.style.fontSize: '12px'
5. RESPONSIVE - add a breakpoint at 480 that keeps width '100%' and moves the legend to the bottom
6. TOOLTIP - tooltip.enabled: true with a y formatter for numbers
7. AXIS LABELS - xaxis.labels.rotate: -45 for long category names, xaxis.labels.trim: true

Give only the options value and nothing else in a code block. Dataset - {dataset_json}"#
    )
}

pub fn chart_edit_prompt(existing_code: &str, instructions: &str) -> String {
    format!(
        r#"Update apexcharts options value to apply the given instructions.

MAINTAIN THESE CHART REQUIREMENTS:
1. CHART SIZE - keep chart.height: '500' or '100%', chart.width: '100%'
2. LEGEND - legend.position: 'bottom' or 'right', legend.horizontalAlign: 'center'
3. TITLE - title.align: 'center'; wrap long titles with an array value or \n line breaks
4. AXIS LABELS - xaxis.labels.rotate: -45 for long category names, xaxis.labels.trim: true
5. RESPONSIVE - keep responsive breakpoints

Give only the options value and nothing else in a code block. Check JSON is valid once again.

Existing code: {existing_code}

Change instructions: {instructions}"#
    )
}

/// Follow-up questions are answered by modifying the parent's SQL, not by
/// starting fresh; the enhanced query carries that context into stage 1.
pub fn enhanced_follow_up_query(
    follow_up: &str,
    original_question: &str,
    original_sql: &str,
    history_transcript: &str,
) -> String {
    format!(
        r#"FOLLOW-UP QUESTION: {follow_up}

ORIGINAL QUESTION: {original_question}

ORIGINAL SQL THAT WORKED:
```sql
{original_sql}
```

CONVERSATION HISTORY:
{history_transcript}

IMPORTANT: This is a FOLLOW-UP question. The user is asking about the same data context as the original question.
- Use the ORIGINAL SQL as a starting point and modify it to answer the FOLLOW-UP QUESTION
- Keep the same tables and joins from the original query where relevant
- Apply any filters, groupings, or modifications needed to answer the follow-up
- If the follow-up asks for a breakdown, add GROUP BY
- If the follow-up asks for a different time period, adjust the date filter
- If the follow-up asks for specific criteria, add WHERE conditions"#
    )
}
