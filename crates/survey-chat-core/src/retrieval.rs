//! Hybrid retrieval of survey questions and semantic retrieval of answers.
//!
//! Both entry points are storage-agnostic: they pull candidates from a
//! [`SurveyStore`] and rank them with [`fusion`](crate::fusion).
//!
//! # Question retrieval
//!
//! 1. Validate `k >= 1` and that the survey exists.
//! 2. Fetch up to `k` semantic candidates (embedded questions only).
//! 3. Fetch up to `k` keyword candidates. When step 2 found nothing the
//!    keyword search covers all questions (keyword-only fallback);
//!    otherwise it is restricted to embedded questions.
//! 4. Fuse with RRF and hydrate the ranked ids into full questions.
//!
//! # Answer retrieval
//!
//! Text answers with an embedding are filtered by the caller's predicates,
//! sorted by distance (then the caller's orderings, then id), truncated
//! to `top_k` and scored with the same RRF formula over the single
//! semantic ranking.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::fusion::{fuse, rrf_score};
use crate::models::{HybridSearchResult, SurveyQuestion, SurveyQuestionAnswer};
use crate::store::{AnswerFilter, AnswerOrdering, SurveyStore};

/// Return up to `k` questions of `survey_id` ranked by fused relevance to
/// the utterance.
///
/// Fails with [`CoreError::NotFound`] only when the survey does not exist;
/// an empty result is valid.
pub async fn find_relevant_questions(
    store: &dyn SurveyStore,
    survey_id: Uuid,
    query_text: &str,
    query_embedding: &[f32],
    k: usize,
) -> Result<Vec<HybridSearchResult<SurveyQuestion>>> {
    if k < 1 {
        return Err(CoreError::invalid_argument("k must be at least 1"));
    }
    if store.get_survey(survey_id).await?.is_none() {
        return Err(CoreError::not_found(format!("survey {}", survey_id)));
    }

    let semantic = store
        .semantic_question_candidates(survey_id, query_embedding, k)
        .await?;
    let keyword_only = semantic.is_empty();
    if keyword_only {
        warn!(%survey_id, "no embedded questions, falling back to keyword-only ranking");
    }
    let keyword = store
        .keyword_question_candidates(survey_id, query_text, k, !keyword_only)
        .await?;
    debug!(
        %survey_id,
        semantic = semantic.len(),
        keyword = keyword.len(),
        "question candidates"
    );

    let fused = fuse(k, &semantic, &keyword)?;
    if fused.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = fused.iter().map(|e| e.id).collect();
    let mut by_id: HashMap<Uuid, SurveyQuestion> = store
        .get_questions(&ids)
        .await?
        .into_iter()
        .map(|q| (q.id, q))
        .collect();

    Ok(fused
        .into_iter()
        .filter_map(|entry| {
            by_id.remove(&entry.id).map(|item| HybridSearchResult {
                id: entry.id,
                score: entry.score,
                semantic_rank: entry.semantic_rank,
                keyword_rank: entry.keyword_rank,
                item,
            })
        })
        .collect())
}

/// Return up to `top_k` text answers of `survey_id` nearest to the query
/// embedding that satisfy every filter.
pub async fn find_relevant_answers(
    store: &dyn SurveyStore,
    survey_id: Uuid,
    query_embedding: &[f32],
    filters: &[AnswerFilter],
    orderings: &[AnswerOrdering],
    top_k: usize,
) -> Result<Vec<HybridSearchResult<SurveyQuestionAnswer>>> {
    if top_k < 1 {
        return Err(CoreError::invalid_argument("top_k must be at least 1"));
    }
    for filter in filters {
        filter.validate()?;
    }
    if store.get_survey(survey_id).await?.is_none() {
        return Err(CoreError::not_found(format!("survey {}", survey_id)));
    }

    let mut candidates = store
        .semantic_answer_candidates(survey_id, query_embedding, filters)
        .await?;
    if let Some(bad) = candidates.iter().find(|c| !c.distance.is_finite()) {
        return Err(CoreError::invalid_argument(format!(
            "non-finite distance for answer {}",
            bad.answer.id
        )));
    }
    debug!(%survey_id, candidates = candidates.len(), "answer candidates");

    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| {
                orderings
                    .iter()
                    .map(|o| o.compare(&a.answer, &b.answer))
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then(a.answer.id.cmp(&b.answer.id))
    });
    candidates.truncate(top_k);

    let mut results = Vec::with_capacity(candidates.len());
    let mut rank = 0u32;
    let mut previous: Option<f64> = None;
    for (position, candidate) in candidates.into_iter().enumerate() {
        if previous != Some(candidate.distance) {
            rank = position as u32 + 1;
            previous = Some(candidate.distance);
        }
        results.push(HybridSearchResult {
            id: candidate.answer.id,
            score: rrf_score(top_k, rank),
            semantic_rank: Some(rank),
            keyword_rank: None,
            item: candidate.answer,
        });
    }
    Ok(results)
}
