//! Reciprocal Rank Fusion (RRF) of a semantic and a keyword ranking.
//!
//! The engine is storage-agnostic: callers fetch raw candidates from a
//! [`SurveyStore`](crate::store::SurveyStore), hand them over as
//! [`SemanticCandidate`]s and [`KeywordCandidate`]s, and get back one
//! deterministic fused ranking.
//!
//! # Algorithm
//!
//! 1. Sort semantic candidates by distance (ascending) and keyword
//!    candidates by relevance (descending), ties by id.
//! 2. Truncate each list to `k`.
//! 3. Assign `RANK()`-style ranks: equal values share a rank and the next
//!    distinct value skips (`1, 1, 3`).
//! 4. Full outer join on id:
//!    `score = 1/(k + semantic_rank) + 1/(k + keyword_rank)`, a missing
//!    side contributing `0`.
//! 5. Sort by score (desc), semantic rank (asc, absent last), keyword rank
//!    (asc, absent last), id (asc).
//! 6. Truncate to `k`.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// A candidate from vector search, scored by cosine distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticCandidate {
    pub id: Uuid,
    /// Cosine distance from the query embedding (lower is better).
    pub distance: f64,
}

/// A candidate from full-text search, scored by relevance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordCandidate {
    pub id: Uuid,
    /// Full-text relevance (higher is better).
    pub relevance: f64,
}

/// One entry of the fused ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusedEntry {
    pub id: Uuid,
    pub score: f64,
    pub semantic_rank: Option<u32>,
    pub keyword_rank: Option<u32>,
}

/// Contribution of a single rank to the fused score: `1 / (k + rank)`.
pub fn rrf_score(k: usize, rank: u32) -> f64 {
    1.0 / (k as f64 + rank as f64)
}

/// Fuse two rankings with Reciprocal Rank Fusion.
///
/// Returns at most `k` entries. An id present in only one list is still
/// eligible. Fails with [`CoreError::InvalidArgument`] when `k < 1` or a
/// candidate carries a non-finite score.
pub fn fuse(
    k: usize,
    semantic: &[SemanticCandidate],
    keyword: &[KeywordCandidate],
) -> Result<Vec<FusedEntry>> {
    if k < 1 {
        return Err(CoreError::invalid_argument("k must be >= 1"));
    }

    let semantic_ranks = rank_candidates(
        semantic.iter().map(|c| (c.id, c.distance)).collect(),
        k,
        Direction::Ascending,
    )?;
    let keyword_ranks = rank_candidates(
        keyword.iter().map(|c| (c.id, c.relevance)).collect(),
        k,
        Direction::Descending,
    )?;

    let mut joined: HashMap<Uuid, (Option<u32>, Option<u32>)> = HashMap::new();
    for (id, rank) in &semantic_ranks {
        joined.entry(*id).or_default().0 = Some(*rank);
    }
    for (id, rank) in &keyword_ranks {
        joined.entry(*id).or_default().1 = Some(*rank);
    }

    let mut fused: Vec<FusedEntry> = joined
        .into_iter()
        .map(|(id, (semantic_rank, keyword_rank))| {
            let s = semantic_rank.map(|r| rrf_score(k, r)).unwrap_or(0.0);
            let kw = keyword_rank.map(|r| rrf_score(k, r)).unwrap_or(0.0);
            FusedEntry {
                id,
                score: s + kw,
                semantic_rank,
                keyword_rank,
            }
        })
        .collect();

    fused.sort_by(compare_fused);
    fused.truncate(k);
    Ok(fused)
}

fn compare_fused(a: &FusedEntry, b: &FusedEntry) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(rank_key(a.semantic_rank).cmp(&rank_key(b.semantic_rank)))
        .then(rank_key(a.keyword_rank).cmp(&rank_key(b.keyword_rank)))
        .then(a.id.cmp(&b.id))
}

// Absent ranks sort after every present rank.
fn rank_key(rank: Option<u32>) -> u32 {
    rank.unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Ascending,
    Descending,
}

/// Sort, dedupe, truncate to `k`, and assign competition ranks.
fn rank_candidates(
    mut items: Vec<(Uuid, f64)>,
    k: usize,
    direction: Direction,
) -> Result<Vec<(Uuid, u32)>> {
    if let Some((id, value)) = items.iter().find(|(_, v)| !v.is_finite()) {
        return Err(CoreError::invalid_argument(format!(
            "candidate {} has a non-finite score ({})",
            id, value
        )));
    }

    items.sort_by(|a, b| {
        let by_value = match direction {
            Direction::Ascending => a.1.partial_cmp(&b.1),
            Direction::Descending => b.1.partial_cmp(&a.1),
        };
        by_value.unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0))
    });

    let mut seen = std::collections::HashSet::new();
    items.retain(|(id, _)| seen.insert(*id));
    items.truncate(k);

    let mut ranked = Vec::with_capacity(items.len());
    let mut previous: Option<(f64, u32)> = None;
    for (position, (id, value)) in items.into_iter().enumerate() {
        let rank = match previous {
            Some((prev_value, prev_rank)) if prev_value == value => prev_rank,
            _ => position as u32 + 1,
        };
        previous = Some((value, rank));
        ranked.push((id, rank));
    }
    Ok(ranked)
}
