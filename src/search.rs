//! `search questions` and `search answers`.
//!
//! Thin CLI wrappers over the core retrieval functions: embed the text with
//! the configured provider, rank, and print one block per hit.

use anyhow::{bail, Result};

use survey_chat_core::retrieval::{find_relevant_answers, find_relevant_questions};
use survey_chat_core::store::{AnswerColumn, AnswerFilter, FilterOperator, FilterValue};

use crate::catalog::parse_survey_id;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

fn require_embeddings(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    Ok(())
}

pub async fn run_search_questions(
    config: &Config,
    survey_id: &str,
    text: &str,
    limit: Option<usize>,
    explain: bool,
) -> Result<()> {
    let survey_id = parse_survey_id(survey_id)?;
    if text.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    require_embeddings(config)?;

    let embedder = embedding::create_embedder(&config.embedding)?;
    let query_vec = embedder.embed(text).await?;
    let store = SqliteStore::new(db::connect(config).await?);
    let k = limit.unwrap_or(config.retrieval.relevant_questions);

    let results = find_relevant_questions(&store, survey_id, text, &query_vec, k).await?;
    store.pool().close().await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            result.score,
            result.item.question,
            result.item.data_type
        );
        if explain {
            println!(
                "    semantic rank: {}",
                result
                    .semantic_rank
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!(
                "    keyword rank: {}",
                result
                    .keyword_rank
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        println!("    id: {}", result.id);
    }

    Ok(())
}

pub async fn run_search_answers(
    config: &Config,
    survey_id: &str,
    text: &str,
    limit: Option<usize>,
    question: Option<String>,
) -> Result<()> {
    let survey_id = parse_survey_id(survey_id)?;
    if text.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    require_embeddings(config)?;

    let filters: Vec<AnswerFilter> = question
        .map(|q| {
            AnswerFilter::new(
                AnswerColumn::SurveyQuestionId,
                FilterOperator::Eq,
                FilterValue::Text(q.trim().to_string()),
            )
        })
        .into_iter()
        .collect();

    let embedder = embedding::create_embedder(&config.embedding)?;
    let query_vec = embedder.embed(text).await?;
    let store = SqliteStore::new(db::connect(config).await?);
    let top_k = limit.unwrap_or(config.retrieval.answer_top_k);

    let results =
        find_relevant_answers(&store, survey_id, &query_vec, &filters, &[], top_k).await?;
    store.pool().close().await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let answer = &result.item;
        println!(
            "{}. [{:.4}] \"{}\"",
            i + 1,
            result.score,
            answer.text_answer().unwrap_or_default().replace('\n', " ").trim()
        );
        let sentiment = &answer.sentiment;
        if let (Some(pos), Some(neu), Some(neg)) =
            (sentiment.positive, sentiment.neutral, sentiment.negative)
        {
            println!("    sentiment: +{:.2} ={:.2} -{:.2}", pos, neu, neg);
        }
        println!("    question: {}", answer.survey_question_id);
        println!("    response: {}", answer.survey_response_id);
    }

    Ok(())
}
