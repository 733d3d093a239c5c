//! `embed pending`: backfill question embeddings.
//!
//! Questions are ingested without vectors; this command embeds every
//! question whose `Embedding` is NULL, in batches of
//! `[embedding] batch_size`. A failed batch is reported and skipped so the
//! next run picks it up again.

use anyhow::{bail, Result};
use tracing::warn;

use survey_chat_core::embedding::{check_dims, Embedder};
use survey_chat_core::store::SurveyStore;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Counts reported by one backfill run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbedStats {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
}

pub async fn run_embed_pending(config: &Config, limit: Option<usize>, dry_run: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let store = SqliteStore::new(db::connect(config).await?);

    if dry_run {
        let pending = store.questions_missing_embedding(limit).await?;
        println!("embed pending (dry-run)");
        println!("  questions needing embeddings: {}", pending.len());
        store.pool().close().await;
        return Ok(());
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let stats = embed_pending(
        &store,
        embedder.as_ref(),
        limit,
        config.embedding.batch_size,
    )
    .await?;
    store.pool().close().await;

    println!("embed pending");
    if stats.pending == 0 {
        println!("  all questions up to date");
        return Ok(());
    }
    println!("  total pending: {}", stats.pending);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);
    Ok(())
}

/// Embed up to `limit` questions that have no vector yet.
pub async fn embed_pending(
    store: &dyn SurveyStore,
    embedder: &dyn Embedder,
    limit: Option<usize>,
    batch_size: usize,
) -> Result<EmbedStats> {
    let pending = store.questions_missing_embedding(limit).await?;
    let mut stats = EmbedStats {
        pending: pending.len(),
        ..EmbedStats::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|q| q.embedding_text()).collect();

        let embedded = embedder.embed_batch(&texts).await.and_then(|vectors| {
            for vector in &vectors {
                check_dims(embedder.dims(), vector)?;
            }
            Ok(vectors)
        });
        match embedded {
            Ok(vectors) => {
                for (question, vector) in batch.iter().zip(vectors.iter()) {
                    store.set_question_embedding(question.id, vector).await?;
                    stats.embedded += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "embedding batch failed");
                eprintln!("Warning: embedding batch failed: {}", e);
                stats.failed += batch.len();
            }
        }
    }

    Ok(stats)
}
