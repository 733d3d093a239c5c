//! Read-only survey listing: `surveys`, `questions`, `schema`, `metadata`.

use anyhow::{Context, Result};
use uuid::Uuid;

use survey_chat_core::introspect::{describe_schema, describe_survey_metadata};
use survey_chat_core::store::SurveyStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Parse a survey id given on the command line.
pub fn parse_survey_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid survey id: '{}'", raw))
}

pub async fn run_surveys(config: &Config) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let surveys = store.list_surveys().await?;

    if surveys.is_empty() {
        println!("No surveys.");
    } else {
        println!("{:<38} {:<10} FILENAME", "ID", "VERSION");
        for survey in &surveys {
            println!(
                "{:<38} {:<10} {}",
                survey.id.to_string(),
                survey.version,
                survey.filename
            );
        }
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_questions(config: &Config, survey_id: &str) -> Result<()> {
    let survey_id = parse_survey_id(survey_id)?;
    let store = SqliteStore::new(db::connect(config).await?);

    if store.get_survey(survey_id).await?.is_none() {
        store.pool().close().await;
        anyhow::bail!("survey not found: {}", survey_id);
    }

    let questions = store.list_questions(survey_id).await?;
    if questions.is_empty() {
        println!("No questions.");
    }
    for question in &questions {
        let embedded = if question.embedding.is_some() {
            "embedded"
        } else {
            "pending"
        };
        println!("{} [{}] ({})", question.question, question.data_type, embedded);
        if let Some(description) = question.description.as_deref().filter(|d| !d.is_empty()) {
            println!("    {}", description);
        }
        println!("    id: {}", question.id);
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_schema(config: &Config) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let schema = describe_schema(&store).await?;
    print!("{}", schema);
    store.pool().close().await;
    Ok(())
}

pub async fn run_metadata(config: &Config, survey_id: &str) -> Result<()> {
    let survey_id = parse_survey_id(survey_id)?;
    let store = SqliteStore::new(db::connect(config).await?);
    let metadata = describe_survey_metadata(&store, survey_id).await?;
    print!("{}", metadata);
    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_survey_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_survey_id(&format!(" {} ", id)).unwrap(), id);
        assert!(parse_survey_id("survey-1").is_err());
    }
}
