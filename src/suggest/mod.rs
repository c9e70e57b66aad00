#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::matrix::MatrixCache;
use crate::search::hybrid::HybridSearcher;
use crate::search::{Deadline, SearchError};
use crate::store::{Chunk, ChunkQueries, ClusterQueries};

/// How a related item was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    SameTopic,
    SemanticSimilarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelatedMode {
    Cluster,
    Embed,
}

impl std::str::FromStr for RelatedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(RelatedMode::Cluster),
            "embed" => Ok(RelatedMode::Embed),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedItem {
    pub chunk_id: i64,
    pub file_path: String,
    pub heading: Option<String>,
    pub preview: String,
    /// Cosine similarity clamped to [0, 1]; 1.0 for cluster mode without
    /// embeddings.
    pub score: f64,
    pub reason: Reason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedNote {
    pub file_path: String,
    pub score: f64,
    pub reason: Reason,
    pub matched_chunks: usize,
    pub top_chunk_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSuggestion {
    pub cluster_id: i64,
    pub name: String,
    pub score: f64,
}

/// Passage- and file-level relatedness over the store and the embedding
/// matrix snapshot.
pub struct Recommender {
    pool: SqlitePool,
    matrix: Arc<MatrixCache>,
}

impl Recommender {
    #[inline]
    pub fn new(pool: SqlitePool, matrix: Arc<MatrixCache>) -> Self {
        Self { pool, matrix }
    }

    /// Passages related to `chunk_id`, the input itself always excluded.
    /// Deterministic: equal scores order by lower chunk id.
    pub async fn related(
        &self,
        chunk_id: i64,
        mode: RelatedMode,
        k: usize,
        deadline: Deadline,
    ) -> Result<Vec<RelatedItem>, SearchError> {
        match mode {
            RelatedMode::Cluster => self.related_by_cluster(chunk_id, k, deadline).await,
            RelatedMode::Embed => self.related_by_embedding(chunk_id, k, deadline).await,
        }
    }

    /// File-level aggregation of the passage-level result.
    ///
    /// Oversamples `max(50, 5k)` passages, groups by file; the file score is
    /// its best passage score and the reason that passage's reason.
    /// Tie-break: more matched passages, then lower minimum chunk id.
    pub async fn related_notes(
        &self,
        chunk_id: i64,
        mode: RelatedMode,
        k: usize,
        deadline: Deadline,
    ) -> Result<Vec<RelatedNote>, SearchError> {
        let sample = (5 * k).max(50);
        let items = self.related(chunk_id, mode, sample, deadline).await?;

        struct FileAgg {
            score: f64,
            reason: Reason,
            matched: usize,
            min_chunk_id: i64,
            top_ids: Vec<i64>,
        }

        let mut by_file: HashMap<String, FileAgg> = HashMap::new();
        for item in &items {
            let agg = by_file.entry(item.file_path.clone()).or_insert(FileAgg {
                score: item.score,
                reason: item.reason,
                matched: 0,
                min_chunk_id: item.chunk_id,
                top_ids: Vec::new(),
            });
            agg.matched += 1;
            agg.min_chunk_id = agg.min_chunk_id.min(item.chunk_id);
            if item.score > agg.score {
                agg.score = item.score;
                agg.reason = item.reason;
            }
            if agg.top_ids.len() < 5 {
                agg.top_ids.push(item.chunk_id);
            }
        }

        let mut notes: Vec<(FileAgg, String)> = by_file
            .into_iter()
            .map(|(path, agg)| (agg, path))
            .collect();
        notes.sort_by(|a, b| {
            b.0.score
                .partial_cmp(&a.0.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.matched.cmp(&a.0.matched))
                .then_with(|| a.0.min_chunk_id.cmp(&b.0.min_chunk_id))
        });
        notes.truncate(k);

        Ok(notes
            .into_iter()
            .map(|(agg, file_path)| RelatedNote {
                file_path,
                score: agg.score,
                reason: agg.reason,
                matched_chunks: agg.matched,
                top_chunk_ids: agg.top_ids,
            })
            .collect())
    }

    /// Other members of the passage's cluster, ranked by cosine similarity
    /// to the passage's own embedding, or in id order when no embeddings
    /// are loaded.
    async fn related_by_cluster(
        &self,
        chunk_id: i64,
        k: usize,
        deadline: Deadline,
    ) -> Result<Vec<RelatedItem>, SearchError> {
        let Some(cluster_id) = ClusterQueries::cluster_of(&self.pool, chunk_id)
            .await
            .map_err(SearchError::Index)?
        else {
            return Ok(Vec::new());
        };

        let member_ids: Vec<i64> = ClusterQueries::member_ids(&self.pool, cluster_id)
            .await
            .map_err(SearchError::Index)?
            .into_iter()
            .filter(|&id| id != chunk_id)
            .collect();
        if member_ids.is_empty() {
            return Ok(Vec::new());
        }

        let matrix = self.matrix.snapshot();
        let mut ranked: Vec<(i64, f64)> = match matrix.vector_of(chunk_id) {
            Some(query_vec) => {
                let mut scored: Vec<(i64, f64)> = Vec::with_capacity(member_ids.len());
                for (i, &member) in member_ids.iter().enumerate() {
                    if i % crate::search::DEADLINE_CHECK_INTERVAL == 0 {
                        deadline.check()?;
                    }
                    let score = matrix
                        .vector_of(member)
                        .map(|v| crate::embed::dot(query_vec, v).clamp(0.0, 1.0) as f64)
                        .unwrap_or(0.0);
                    scored.push((member, score));
                }
                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                scored
            }
            None => member_ids.into_iter().map(|id| (id, 1.0)).collect(),
        };
        ranked.truncate(k);

        self.hydrate(ranked, Reason::SameTopic).await
    }

    /// Brute-force cosine kNN over all embeddings. Scores clamp to [0, 1];
    /// non-positive neighbors are dropped unless fewer than `k` positive
    /// ones exist.
    async fn related_by_embedding(
        &self,
        chunk_id: i64,
        k: usize,
        deadline: Deadline,
    ) -> Result<Vec<RelatedItem>, SearchError> {
        let matrix = self.matrix.snapshot();
        let Some(query_vec) = matrix.vector_of(chunk_id) else {
            return Ok(Vec::new());
        };

        let neighbors = matrix.knn(query_vec, matrix.len(), Some(chunk_id), deadline)?;

        let positives: Vec<(i64, f64)> = neighbors
            .iter()
            .filter(|(_, score)| *score > 0.0)
            .take(k)
            .map(|&(id, score)| (id, score.min(1.0) as f64))
            .collect();

        let ranked: Vec<(i64, f64)> = if positives.len() >= k {
            positives
        } else {
            neighbors
                .iter()
                .take(k)
                .map(|&(id, score)| (id, (score.clamp(0.0, 1.0)) as f64))
                .collect()
        };

        self.hydrate(ranked, Reason::SemanticSimilarity).await
    }

    /// Fetch chunk records and assemble items, preserving the given order.
    async fn hydrate(
        &self,
        ranked: Vec<(i64, f64)>,
        reason: Reason,
    ) -> Result<Vec<RelatedItem>, SearchError> {
        let ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
        let chunks = ChunkQueries::get_many(&self.pool, &ids)
            .await
            .map_err(SearchError::Index)?;
        let by_id: HashMap<i64, &Chunk> = chunks.iter().map(|c| (c.id, c)).collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(&id).map(|chunk| RelatedItem {
                    chunk_id: id,
                    file_path: chunk.file_path.clone(),
                    heading: chunk.heading.clone(),
                    preview: chunk.preview(),
                    score,
                    reason,
                })
            })
            .collect())
    }
}

/// Topic routing: score clusters by the rank-weighted mean of their matched
/// candidates, normalized to [0, 1] across the reported clusters.
/// Single-member matches are retained but sorted after multi-member ones.
pub async fn suggest_clusters(
    pool: &SqlitePool,
    searcher: &HybridSearcher,
    query: &str,
    limit: usize,
    fts_k: i64,
    deadline: Deadline,
) -> Result<Vec<ClusterSuggestion>, SearchError> {
    let candidates = searcher.scored_candidates(query, fts_k, deadline).await?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = candidates.iter().map(|c| c.chunk_id).collect();
    let memberships = ClusterQueries::clusters_of(pool, &ids)
        .await
        .map_err(SearchError::Index)?;
    if memberships.is_empty() {
        return Ok(Vec::new());
    }
    let cluster_of: HashMap<i64, i64> = memberships.into_iter().collect();

    struct Vote {
        weighted_sum: f64,
        weight: f64,
        matched: usize,
    }

    let mut votes: HashMap<i64, Vote> = HashMap::new();
    for (rank, candidate) in candidates.iter().enumerate() {
        let Some(&cluster_id) = cluster_of.get(&candidate.chunk_id) else {
            continue;
        };
        // Higher-ranked members count more.
        let weight = 1.0 / (1.0 + rank as f64);
        let vote = votes.entry(cluster_id).or_insert(Vote {
            weighted_sum: 0.0,
            weight: 0.0,
            matched: 0,
        });
        vote.weighted_sum += weight * candidate.score;
        vote.weight += weight;
        vote.matched += 1;
    }

    let mut scored: Vec<(i64, f64, usize)> = votes
        .into_iter()
        .map(|(id, v)| (id, v.weighted_sum / v.weight.max(f64::EPSILON), v.matched))
        .collect();

    scored.sort_by(|a, b| {
        let a_multi = a.2 >= 2;
        let b_multi = b.2 >= 2;
        b_multi
            .cmp(&a_multi)
            .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.0.cmp(&b.0))
    });

    let max_score = scored
        .iter()
        .map(|(_, s, _)| *s)
        .fold(0.0f64, f64::max);

    let mut suggestions = Vec::new();
    for (cluster_id, score, _) in scored.into_iter().take(limit) {
        let Some(cluster) = ClusterQueries::get(pool, cluster_id)
            .await
            .map_err(SearchError::Index)?
        else {
            continue;
        };
        let normalized = if max_score > 0.0 { score / max_score } else { 0.0 };
        suggestions.push(ClusterSuggestion {
            cluster_id,
            name: cluster.name,
            score: normalized,
        });
    }

    Ok(suggestions)
}
