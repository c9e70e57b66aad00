use crate::embed::dot;

/// One reranked candidate; `score` is the cosine similarity in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticHit {
    pub chunk_id: i64,
    pub score: f32,
}

/// Rerank candidates by cosine similarity to the query vector.
///
/// Pure: no I/O beyond what the caller supplies. Vectors are unit-norm by
/// store invariant, so cosine is the plain dot product. Candidates without
/// embeddings simply are not in `candidates` and so are absent from the
/// result. Descending by score, ties by lower chunk id.
pub fn rerank(query_vec: &[f32], candidates: &[(i64, Vec<f32>)]) -> Vec<SemanticHit> {
    let mut hits: Vec<SemanticHit> = candidates
        .iter()
        .map(|(chunk_id, vec)| SemanticHit {
            chunk_id: *chunk_id,
            score: dot(query_vec, vec),
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits
}
