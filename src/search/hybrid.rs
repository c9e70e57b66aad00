use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::embed::EmbeddingBackend;
use crate::matrix::MatrixCache;
use crate::store::{make_preview, ChunkQueries};

use super::lexical::{fts_search, LexicalHit};
use super::semantic::rerank;
use super::{Deadline, SearchError};

/// Width of the lexical normalization window: candidates this many bm25
/// points behind the best score normalize to zero.
pub const FUSION_WIDTH: f64 = 10.0;

/// Classification thresholds on the RAW scores. Both are part of the
/// wire-visible contract; the lexical one is calibrated against FTS5 bm25
/// output and must be re-derived if the index layer changes.
pub const STRONG_LEXICAL_THRESHOLD: f64 = -8.0;
pub const STRONG_SEMANTIC_THRESHOLD: f32 = 0.25;

/// Which signal dominated a hybrid result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchClass {
    Hybrid,
    Keyword,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridHit {
    pub chunk_id: i64,
    pub file_path: String,
    pub heading: Option<String>,
    pub preview: String,
    /// Fused score in [0, 1].
    pub score: f64,
    /// Raw bm25 value from the lexical stage; null for hits that only the
    /// semantic side produced.
    pub lexical_score: Option<f64>,
    /// Cosine similarity clamped to [0, 1]; 0 when the embedder was down.
    pub semantic_score: f32,
    pub match_class: MatchClass,
}

/// A candidate scored for cluster voting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub chunk_id: i64,
    pub score: f64,
}

/// Runs lexical retrieval, semantic rerank and score fusion.
pub struct HybridSearcher {
    pool: SqlitePool,
    matrix: Arc<MatrixCache>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    embed_gate: Arc<Semaphore>,
}

impl HybridSearcher {
    #[inline]
    pub fn new(
        pool: SqlitePool,
        matrix: Arc<MatrixCache>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
        embed_width: usize,
    ) -> Self {
        Self {
            pool,
            matrix,
            embedder,
            embed_gate: Arc::new(Semaphore::new(embed_width.max(1))),
        }
    }

    /// Hybrid search: lexical candidates fused with a cosine rerank.
    /// `module_id` restricts the lexical stage to one module's files.
    ///
    /// When the query matches nothing lexically but an embedder is up, falls
    /// back to a pure semantic scan that only keeps strong matches. When the
    /// embedder is unreachable the search degrades to lexical-only: every
    /// hit is classified `keyword` with `semantic_score = 0`.
    pub async fn search(
        &self,
        query: &str,
        fts_k: i64,
        limit: usize,
        module_id: Option<i64>,
        deadline: Deadline,
    ) -> Result<Vec<HybridHit>, SearchError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        deadline.check()?;
        let lexical = fts_search(&self.pool, trimmed, fts_k, module_id).await?;
        if lexical.is_empty() && module_id.is_none() {
            return self.semantic_fallback(trimmed, limit, deadline).await;
        }
        if lexical.is_empty() {
            return Ok(Vec::new());
        }

        let semantic = self.semantic_scores(trimmed, &lexical, deadline).await?;

        let mut hits = fuse(&lexical, semantic.as_ref());
        hits.truncate(limit);
        Ok(hits)
    }

    /// Candidates with the member scores used by cluster voting, in rank
    /// order: semantic order when the embedder is up, lexical otherwise.
    pub async fn scored_candidates(
        &self,
        query: &str,
        fts_k: i64,
        deadline: Deadline,
    ) -> Result<Vec<ScoredCandidate>, SearchError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        deadline.check()?;
        let lexical = fts_search(&self.pool, trimmed, fts_k, None).await?;
        if lexical.is_empty() {
            return Ok(Vec::new());
        }

        let semantic = self.semantic_scores(trimmed, &lexical, deadline).await?;

        let candidates = match semantic {
            Some(scores) => {
                let mut ranked: Vec<ScoredCandidate> = lexical
                    .iter()
                    .map(|hit| ScoredCandidate {
                        chunk_id: hit.chunk_id,
                        score: scores.get(&hit.chunk_id).copied().unwrap_or(0.0).max(0.0)
                            as f64,
                    })
                    .collect();
                ranked.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
                });
                ranked
            }
            None => {
                let best = best_lexical_score(&lexical);
                lexical
                    .iter()
                    .map(|hit| ScoredCandidate {
                        chunk_id: hit.chunk_id,
                        score: lex_norm(hit.score, best),
                    })
                    .collect()
            }
        };

        Ok(candidates)
    }

    /// Cosine scores for every candidate with a vector in the matrix
    /// snapshot, or `None` when no embedder is configured or it is down.
    async fn semantic_scores(
        &self,
        query: &str,
        lexical: &[LexicalHit],
        deadline: Deadline,
    ) -> Result<Option<HashMap<i64, f32>>, SearchError> {
        let Some(query_vec) = self.query_vector(query, deadline).await? else {
            return Ok(None);
        };

        let matrix = self.matrix.snapshot();
        let candidates: Vec<(i64, Vec<f32>)> = lexical
            .iter()
            .filter_map(|hit| {
                matrix
                    .vector_of(hit.chunk_id)
                    .map(|v| (hit.chunk_id, v.to_vec()))
            })
            .collect();

        deadline.check()?;
        let reranked = rerank(&query_vec, &candidates);
        Ok(Some(
            reranked.iter().map(|h| (h.chunk_id, h.score)).collect(),
        ))
    }

    /// No lexical candidates: scan the matrix for strong semantic matches.
    async fn semantic_fallback(
        &self,
        query: &str,
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<HybridHit>, SearchError> {
        let Some(query_vec) = self.query_vector(query, deadline).await? else {
            return Ok(Vec::new());
        };

        let matrix = self.matrix.snapshot();
        let neighbors = matrix.knn(&query_vec, limit, None, deadline)?;

        let strong: Vec<(i64, f32)> = neighbors
            .into_iter()
            .filter(|(_, score)| *score > STRONG_SEMANTIC_THRESHOLD)
            .collect();
        if strong.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = strong.iter().map(|(id, _)| *id).collect();
        let chunks = ChunkQueries::get_many(&self.pool, &ids)
            .await
            .map_err(SearchError::Index)?;
        let by_id: HashMap<i64, _> = chunks.iter().map(|c| (c.id, c)).collect();

        Ok(strong
            .into_iter()
            .filter_map(|(id, cosine)| {
                by_id.get(&id).map(|chunk| HybridHit {
                    chunk_id: id,
                    file_path: chunk.file_path.clone(),
                    heading: chunk.heading.clone(),
                    preview: chunk.preview(),
                    score: 0.5 * cosine.max(0.0) as f64,
                    lexical_score: None,
                    semantic_score: cosine.max(0.0),
                    match_class: MatchClass::Semantic,
                })
            })
            .collect())
    }

    /// Embed the query, or `None` when no embedder is configured or the
    /// backend is down (degrade, never fail).
    async fn query_vector(
        &self,
        query: &str,
        deadline: Deadline,
    ) -> Result<Option<Vec<f32>>, SearchError> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(None);
        };

        deadline.check()?;
        let _permit = self
            .embed_gate
            .acquire()
            .await
            .map_err(|_| SearchError::EmbedderUnavailable)?;
        deadline.check()?;

        let backend = Arc::clone(embedder);
        let text = query.to_string();
        let budget = deadline.remaining();

        let result = tokio::task::spawn_blocking(move || {
            backend.embed_batch(std::slice::from_ref(&text), budget)
        })
        .await;

        match result {
            Ok(Ok(mut vectors)) => Ok(vectors.pop().map(Some).unwrap_or(None)),
            Ok(Err(e)) => {
                warn!("embedder unavailable, degrading to lexical-only: {e}");
                Ok(None)
            }
            Err(e) => {
                warn!("embedder task failed, degrading to lexical-only: {e}");
                Ok(None)
            }
        }
    }
}

#[inline]
fn best_lexical_score(lexical: &[LexicalHit]) -> f64 {
    lexical
        .iter()
        .map(|h| h.score)
        .fold(f64::INFINITY, f64::min)
}

/// Normalize a raw bm25 score against the best one in the candidate set:
/// the best maps to 1, scores `FUSION_WIDTH` points behind it to 0.
#[inline]
fn lex_norm(score: f64, best: f64) -> f64 {
    (1.0 - (score - best) / FUSION_WIDTH).clamp(0.0, 1.0)
}

/// Fuse lexical and semantic signals and classify each hit.
///
/// `semantic` is `None` when the embedder was unavailable; every hit then
/// degrades to `keyword`.
fn fuse(lexical: &[LexicalHit], semantic: Option<&HashMap<i64, f32>>) -> Vec<HybridHit> {
    let best = best_lexical_score(lexical);

    let mut hits: Vec<HybridHit> = lexical
        .iter()
        .map(|hit| {
            let cosine = semantic
                .and_then(|scores| scores.get(&hit.chunk_id))
                .copied()
                .unwrap_or(0.0);
            let semantic_norm = cosine.max(0.0);
            let score = 0.5 * lex_norm(hit.score, best) + 0.5 * semantic_norm as f64;

            let match_class = if semantic.is_none() {
                MatchClass::Keyword
            } else {
                let strong_lex = hit.score > STRONG_LEXICAL_THRESHOLD;
                let strong_sem = cosine > STRONG_SEMANTIC_THRESHOLD;
                match (strong_lex, strong_sem) {
                    (true, true) => MatchClass::Hybrid,
                    (true, false) => MatchClass::Keyword,
                    (false, true) => MatchClass::Semantic,
                    // The candidate came from the lexical side.
                    (false, false) => MatchClass::Keyword,
                }
            };

            HybridHit {
                chunk_id: hit.chunk_id,
                file_path: hit.file_path.clone(),
                heading: if hit.heading.is_empty() {
                    None
                } else {
                    Some(hit.heading.clone())
                },
                preview: make_preview(&hit.content),
                score,
                lexical_score: Some(hit.score),
                semantic_score: semantic_norm,
                match_class,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.semantic_score
                    .partial_cmp(&a.semantic_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits
}
