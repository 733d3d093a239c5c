//! # Survey Chat CLI (`survey-chat`)
//!
//! Ask natural-language questions about ingested survey data. The CLI
//! initializes the database, lists surveys and their questions, backfills
//! question embeddings, exposes the retrieval primitives, and runs chat
//! turns through the query orchestrator.
//!
//! ## Usage
//!
//! ```bash
//! survey-chat --config ./config/survey-chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `survey-chat init` | Create the SQLite database and run schema migrations |
//! | `survey-chat surveys` | List ingested surveys |
//! | `survey-chat questions <survey-id>` | List the questions of a survey |
//! | `survey-chat schema` | Print the schema description given to the model |
//! | `survey-chat metadata <survey-id>` | Print the survey's question metadata |
//! | `survey-chat search questions <survey-id> "<text>"` | Fused question ranking |
//! | `survey-chat search answers <survey-id> "<text>"` | Semantic answer ranking |
//! | `survey-chat embed pending` | Backfill missing question embeddings |
//! | `survey-chat ask <survey-id> "<question>"` | Run one chat turn |
//! | `survey-chat split "<question>"` | Split a multi-part question |
//! | `survey-chat suggest <survey-id>` | Suggest questions to ask |
//! | `survey-chat title <conversation-id>` | Generate and store a conversation title |
//! | `survey-chat history <conversation-id>` | Print a saved conversation |
//! | `survey-chat conversations` | List saved conversations of a user |
//! | `survey-chat delete <conversation-id>` | Delete a saved conversation (`--all` for every one) |
//!
//! ## Logging
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG` (default
//! `warn`) to see more, e.g. `RUST_LOG=survey_chat_core=debug`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use survey_chat::{catalog, chat, config, embed_cmd, migrate, search};

/// Survey Chat: ask questions about survey results in plain language.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/survey-chat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "survey-chat",
    about = "Survey Chat: ask questions about survey results in plain language",
    version,
    long_about = "Survey Chat finds the survey questions relevant to a question with hybrid \
    (semantic + keyword) retrieval, asks a language model for an aggregate query over the \
    survey tables, executes it, and answers with the result."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/survey-chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the survey tables, the keyword index and the conversation
    /// history table. Safe to run repeatedly.
    Init,

    /// List ingested surveys.
    Surveys,

    /// List the questions of a survey.
    Questions {
        /// Survey UUID.
        survey_id: String,
    },

    /// Print the table schema description given to the model.
    Schema,

    /// Print `id|question|dataType|description` lines for a survey.
    Metadata {
        /// Survey UUID.
        survey_id: String,
    },

    /// Run the retrieval primitives directly.
    Search {
        #[command(subcommand)]
        target: SearchTarget,
    },

    /// Manage question embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Ask a question about a survey.
    ///
    /// Prints the tool trace (embedding, question lookup, generated query,
    /// result rows) and the answer.
    Ask {
        /// Survey UUID.
        survey_id: String,

        /// The question.
        question: String,

        /// Continue and save this conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Owner of the conversation.
        #[arg(long, default_value = chat::DEFAULT_USER)]
        user: String,
    },

    /// Split a multi-part question into sub-questions.
    Split {
        question: String,
    },

    /// Suggest questions to ask about a survey.
    Suggest {
        /// Survey UUID.
        survey_id: String,

        /// Take the saved conversation into account.
        #[arg(long)]
        conversation: Option<String>,

        /// Owner of the conversation.
        #[arg(long, default_value = chat::DEFAULT_USER)]
        user: String,
    },

    /// Generate and store a title for a saved conversation.
    Title {
        conversation_id: String,

        /// Owner of the conversation.
        #[arg(long, default_value = chat::DEFAULT_USER)]
        user: String,
    },

    /// Print a saved conversation.
    History {
        conversation_id: String,

        /// Owner of the conversation.
        #[arg(long, default_value = chat::DEFAULT_USER)]
        user: String,
    },

    /// List a user's saved conversations, most recent first.
    Conversations {
        /// Owner of the conversations.
        #[arg(long, default_value = chat::DEFAULT_USER)]
        user: String,

        /// Maximum number of conversations to list.
        #[arg(long)]
        limit: Option<usize>,

        /// Number of conversations to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Delete a saved conversation, or all of a user's conversations.
    Delete {
        /// Conversation to delete.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        conversation_id: Option<String>,

        /// Delete every conversation of the user.
        #[arg(long)]
        all: bool,

        /// Owner of the conversations.
        #[arg(long, default_value = chat::DEFAULT_USER)]
        user: String,
    },
}

#[derive(Subcommand)]
enum SearchTarget {
    /// Rank a survey's questions against the text (semantic + keyword).
    Questions {
        /// Survey UUID.
        survey_id: String,

        /// The search text.
        text: String,

        /// Number of questions to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Show the semantic and keyword ranks behind each score.
        #[arg(long)]
        explain: bool,
    },

    /// Rank a survey's text answers by semantic similarity.
    Answers {
        /// Survey UUID.
        survey_id: String,

        /// The search text.
        text: String,

        /// Number of answers to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Only answers to this question id.
        #[arg(long)]
        question: Option<String>,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed questions that have no embedding yet.
    Pending {
        /// Maximum number of questions to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Surveys => {
            catalog::run_surveys(&cfg).await?;
        }
        Commands::Questions { survey_id } => {
            catalog::run_questions(&cfg, &survey_id).await?;
        }
        Commands::Schema => {
            catalog::run_schema(&cfg).await?;
        }
        Commands::Metadata { survey_id } => {
            catalog::run_metadata(&cfg, &survey_id).await?;
        }
        Commands::Search { target } => match target {
            SearchTarget::Questions {
                survey_id,
                text,
                limit,
                explain,
            } => {
                search::run_search_questions(&cfg, &survey_id, &text, limit, explain).await?;
            }
            SearchTarget::Answers {
                survey_id,
                text,
                limit,
                question,
            } => {
                search::run_search_answers(&cfg, &survey_id, &text, limit, question).await?;
            }
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                embed_cmd::run_embed_pending(&cfg, limit, dry_run).await?;
            }
        },
        Commands::Ask {
            survey_id,
            question,
            conversation,
            user,
        } => {
            chat::run_ask(&cfg, &survey_id, &question, conversation, &user).await?;
        }
        Commands::Split { question } => {
            chat::run_split(&cfg, &question).await?;
        }
        Commands::Suggest {
            survey_id,
            conversation,
            user,
        } => {
            chat::run_suggest(&cfg, &survey_id, conversation, &user).await?;
        }
        Commands::Title {
            conversation_id,
            user,
        } => {
            chat::run_title(&cfg, &conversation_id, &user).await?;
        }
        Commands::History {
            conversation_id,
            user,
        } => {
            chat::run_history(&cfg, &conversation_id, &user).await?;
        }
        Commands::Conversations {
            user,
            limit,
            offset,
        } => {
            chat::run_conversations(&cfg, &user, limit, offset).await?;
        }
        Commands::Delete {
            conversation_id,
            all: _,
            user,
        } => {
            chat::run_delete(&cfg, conversation_id.as_deref(), &user).await?;
        }
    }

    Ok(())
}
