//! Conversational commands: `ask`, `split`, `suggest`, `title`, `history`,
//! `conversations`, `delete`.
//!
//! Each command wires an [`Orchestrator`] over the SQLite store with the
//! configured embedding provider and language model. `ask` prints the tool
//! trace followed by the answer and, when given a conversation id, saves the
//! full message list to `conversation_history`. Saved conversations belong
//! to the `--user` that created them.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

use survey_chat_core::conversation::{ConversationMessage, Role};
use survey_chat_core::history::{Conversation, HistoryStore};
use survey_chat_core::orchestrator::Orchestrator;

use crate::catalog::parse_survey_id;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::llm;
use crate::sqlite_history::SqliteHistoryStore;
use crate::sqlite_store::SqliteStore;

/// User id recorded when `--user` is not given.
pub const DEFAULT_USER: &str = "cli";

/// Build an orchestrator over `pool` from the configured providers.
pub fn build_orchestrator(config: &Config, pool: SqlitePool) -> Result<Orchestrator> {
    let store = Arc::new(SqliteStore::new(pool));
    let embedder = embedding::create_embedder(&config.embedding)?;
    let model = llm::create_model(&config.llm)?;
    Ok(Orchestrator::new(
        store,
        embedder,
        model,
        config.orchestrator_config(),
    ))
}

fn require_llm(config: &Config) -> Result<()> {
    if !config.llm.is_enabled() {
        bail!("LLM provider is disabled. Set [llm] provider in config.");
    }
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    survey_id: &str,
    question: &str,
    conversation_id: Option<String>,
    user_id: &str,
) -> Result<()> {
    let survey_id = parse_survey_id(survey_id)?;
    require_llm(config)?;
    if !config.embedding.is_enabled() {
        bail!("ask requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let history = SqliteHistoryStore::new(pool.clone());
    let orchestrator = build_orchestrator(config, pool.clone())?;

    let mut conversation = match &conversation_id {
        Some(id) => history
            .load(user_id, id)
            .await?
            .unwrap_or_else(|| Conversation::new(id.clone(), user_id)),
        None => Conversation::new(String::new(), user_id),
    };
    conversation
        .messages
        .push(ConversationMessage::user(question));
    let sent = conversation.messages.len();

    let messages = match orchestrator.turn(survey_id, &conversation.messages).await {
        Ok(messages) => messages,
        Err(e) => {
            pool.close().await;
            return Err(e.into());
        }
    };
    let kept = sent.min(messages.len());
    let appended = messages[kept..].to_vec();

    // A rejected save prints nothing.
    if conversation_id.is_some() {
        conversation.messages = messages;
        conversation.updated_at = Utc::now();
        if let Err(e) = history.save(&conversation).await {
            pool.close().await;
            return Err(e.into());
        }
    }

    print_trace(&appended);
    if conversation_id.is_some() {
        println!();
        println!("saved conversation {}", conversation.id);
    }

    pool.close().await;
    Ok(())
}

fn print_trace(appended: &[ConversationMessage]) {
    for message in appended {
        match message.role {
            Role::Tool => println!("tool: {}", message.content),
            _ => {
                println!();
                println!("{}", message.content);
            }
        }
    }
}

pub async fn run_split(config: &Config, question: &str) -> Result<()> {
    require_llm(config)?;
    let pool = db::connect(config).await?;
    let orchestrator = build_orchestrator(config, pool.clone())?;

    let components = orchestrator.split_question(question).await;
    pool.close().await;

    for (i, component) in components?.iter().enumerate() {
        println!("{}. {}", i + 1, component);
    }
    Ok(())
}

pub async fn run_suggest(
    config: &Config,
    survey_id: &str,
    conversation_id: Option<String>,
    user_id: &str,
) -> Result<()> {
    let survey_id = parse_survey_id(survey_id)?;
    require_llm(config)?;
    let pool = db::connect(config).await?;
    let history = SqliteHistoryStore::new(pool.clone());
    let orchestrator = build_orchestrator(config, pool.clone())?;

    let messages = match conversation_id {
        Some(id) => history
            .load(user_id, &id)
            .await?
            .map(|c| c.messages)
            .unwrap_or_default(),
        None => Vec::new(),
    };

    let suggestions = orchestrator.suggest_questions(survey_id, &messages).await;
    pool.close().await;

    for suggestion in suggestions? {
        println!("- {}", suggestion);
    }
    Ok(())
}

pub async fn run_title(config: &Config, conversation_id: &str, user_id: &str) -> Result<()> {
    require_llm(config)?;
    let pool = db::connect(config).await?;
    let history = SqliteHistoryStore::new(pool.clone());
    let orchestrator = build_orchestrator(config, pool.clone())?;

    let Some(conversation) = history.load(user_id, conversation_id).await? else {
        pool.close().await;
        bail!("conversation not found: {}", conversation_id);
    };

    let title = orchestrator.generate_title(&conversation.messages).await?;
    history.set_title(user_id, conversation_id, &title).await?;
    pool.close().await;

    println!("{}", title);
    Ok(())
}

pub async fn run_history(config: &Config, conversation_id: &str, user_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let history = SqliteHistoryStore::new(pool.clone());

    let conversation = history.load(user_id, conversation_id).await?;
    pool.close().await;

    let Some(conversation) = conversation else {
        bail!("conversation not found: {}", conversation_id);
    };

    println!(
        "conversation {} (user: {})",
        conversation.id, conversation.user_id
    );
    if let Some(title) = &conversation.title {
        println!("title: {}", title);
    }
    println!(
        "updated: {}",
        conversation.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
    for message in &conversation.messages {
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.role,
            message.content
        );
    }
    Ok(())
}

pub async fn run_conversations(
    config: &Config,
    user_id: &str,
    limit: Option<usize>,
    offset: usize,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let history = SqliteHistoryStore::new(pool.clone());
    let conversations = history.list(user_id, limit, offset).await;
    pool.close().await;
    let conversations = conversations?;

    if conversations.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    println!("{:<38} {:<20} {:>8}  TITLE", "ID", "UPDATED", "MESSAGES");
    for conversation in &conversations {
        println!(
            "{:<38} {:<20} {:>8}  {}",
            conversation.id,
            conversation.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            conversation.messages.len(),
            conversation.title.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Delete one conversation, or every conversation of the user when
/// `conversation_id` is `None`.
pub async fn run_delete(
    config: &Config,
    conversation_id: Option<&str>,
    user_id: &str,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let history = SqliteHistoryStore::new(pool.clone());

    let outcome = match conversation_id {
        Some(id) => history.delete(user_id, id).await.map(|deleted| deleted as u64),
        None => history.delete_all(user_id).await,
    };
    pool.close().await;
    let deleted = outcome?;

    match conversation_id {
        Some(id) if deleted == 0 => bail!("conversation not found: {}", id),
        Some(id) => println!("deleted conversation {}", id),
        None => println!("deleted {} conversations of {}", deleted, user_id),
    }
    Ok(())
}
