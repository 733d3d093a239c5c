//! Schema and survey-metadata descriptions used as model grounding.
//!
//! Both functions are read-only and deterministic for a given store state.

use std::fmt::Write as _;

use uuid::Uuid;

use crate::error::Result;
use crate::store::{SurveyStore, TableSchema};

/// Describe every base table, sorted by name, one line per column:
///
/// ```text
/// Table: SurveyQuestion
/// - Id (TEXT, not null)
/// - Description (TEXT, nullable)
/// ```
pub async fn describe_schema(store: &dyn SurveyStore) -> Result<String> {
    let mut tables = store.describe_tables().await?;
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(render_tables(&tables))
}

pub fn render_tables(tables: &[TableSchema]) -> String {
    let mut out = String::new();
    for table in tables {
        let _ = writeln!(out, "Table: {}", table.name);
        for column in &table.columns {
            let nullability = if column.nullable {
                "nullable"
            } else {
                "not null"
            };
            let _ = writeln!(
                out,
                "- {} ({}, {})",
                column.name, column.data_type, nullability
            );
        }
    }
    out
}

/// One `id|question|dataType|description` line per question of the survey,
/// ordered by question text. An empty or unknown survey yields `""`.
pub async fn describe_survey_metadata(store: &dyn SurveyStore, survey_id: Uuid) -> Result<String> {
    let questions = store.list_questions(survey_id).await?;
    let mut out = String::new();
    for q in &questions {
        let _ = writeln!(
            out,
            "{}|{}|{}|{}",
            q.id,
            q.question,
            q.data_type,
            q.description.as_deref().unwrap_or("")
        );
    }
    Ok(out)
}
