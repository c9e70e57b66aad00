use sqlx::SqlitePool;

use super::text::build_match_query;
use super::SearchError;

/// bm25 column weights, in FTS table column order (content, heading,
/// file_path). Heading outranks file path outranks body.
pub const BM25_WEIGHT_CONTENT: f64 = 1.0;
pub const BM25_WEIGHT_HEADING: f64 = 3.0;
pub const BM25_WEIGHT_FILE_PATH: f64 = 2.0;

pub const DEFAULT_FTS_K: i64 = 200;

/// One lexical candidate. `score` is the raw FTS5 bm25 value: numerically
/// smaller is a better match, and the list is ordered best-first. The value
/// is carried through hybrid fusion untouched.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LexicalHit {
    pub chunk_id: i64,
    pub file_path: String,
    pub heading: String,
    pub content: String,
    pub score: f64,
}

/// Tokenized full-text query over the inverted index.
///
/// Returns the best `limit` candidates, best first. An empty query or an
/// empty index yields an empty list, not an error. `module_id` restricts
/// results to files assigned to one module.
pub async fn fts_search(
    pool: &SqlitePool,
    query: &str,
    limit: i64,
    module_id: Option<i64>,
) -> Result<Vec<LexicalHit>, SearchError> {
    let match_query = build_match_query(query);
    if match_query.is_empty() {
        return Ok(Vec::new());
    }

    let hits = if let Some(module_id) = module_id {
        sqlx::query_as::<_, LexicalHit>(
            r#"
            SELECT
                c.id AS chunk_id,
                c.file_path AS file_path,
                COALESCE(c.heading, '') AS heading,
                c.content AS content,
                bm25(chunks_fts, ?, ?, ?) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            JOIN file_modules fm ON fm.file_path = c.file_path
            WHERE chunks_fts MATCH ? AND fm.module_id = ?
            ORDER BY score ASC
            LIMIT ?
            "#,
        )
        .bind(BM25_WEIGHT_CONTENT)
        .bind(BM25_WEIGHT_HEADING)
        .bind(BM25_WEIGHT_FILE_PATH)
        .bind(&match_query)
        .bind(module_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as::<_, LexicalHit>(
            r#"
            SELECT
                c.id AS chunk_id,
                c.file_path AS file_path,
                COALESCE(c.heading, '') AS heading,
                c.content AS content,
                bm25(chunks_fts, ?, ?, ?) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            WHERE chunks_fts MATCH ?
            ORDER BY score ASC
            LIMIT ?
            "#,
        )
        .bind(BM25_WEIGHT_CONTENT)
        .bind(BM25_WEIGHT_HEADING)
        .bind(BM25_WEIGHT_FILE_PATH)
        .bind(&match_query)
        .bind(limit)
        .fetch_all(pool)
        .await
    };

    hits.map_err(|e| SearchError::Index(anyhow::Error::new(e).context("FTS query failed")))
}
