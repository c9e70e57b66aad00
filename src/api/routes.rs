use axum::extract::{Path, Query, State};
use axum::Json;

use crate::search::SearchError;
use crate::store::{make_preview, ChunkQueries, ClusterQueries};
use crate::suggest::{suggest_clusters, RelatedMode};

use super::schemas::*;
use super::tree::{build_file_tree, TreeNode};
use super::{AppState, RequestError};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// GET /search: hybrid search over the corpus.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, RequestError> {
    let _permit = state.admit()?;
    let deadline = state.deadline();

    let limit = params.limit.clamp(1, 100);
    let fts_k = params.fts_k.clamp(1, 1000);

    let items = state
        .searcher
        .search(&params.q, fts_k, limit, params.module_id, deadline)
        .await?;

    Ok(Json(SearchResponse {
        mode: "hybrid",
        total: Some(items.len()),
        items,
    }))
}

/// GET /chunks/{id}: full passage record.
pub async fn get_chunk(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ChunkOut>, RequestError> {
    let _permit = state.admit()?;

    let chunk = ChunkQueries::get_by_id(state.database.pool(), id)
        .await
        .map_err(RequestError::Internal)?
        .ok_or_else(|| RequestError::NotFound(format!("chunk not found: {id}")))?;

    Ok(Json(chunk.into()))
}

/// GET /files/chunks?file_path=: ordered passages of one file.
pub async fn file_chunks(
    State(state): State<AppState>,
    Query(params): Query<FileChunksParams>,
) -> Result<Json<Vec<ChunkOut>>, RequestError> {
    let _permit = state.admit()?;

    if params.file_path.is_empty() {
        return Err(RequestError::BadRequest("file_path is required".to_string()));
    }

    let chunks = ChunkQueries::list_by_file(state.database.pool(), &params.file_path)
        .await
        .map_err(RequestError::Internal)?;
    if chunks.is_empty() {
        return Err(RequestError::NotFound(format!(
            "file not found: {}",
            params.file_path
        )));
    }

    Ok(Json(chunks.into_iter().map(ChunkOut::from).collect()))
}

/// GET /files/tree: directory trie over every indexed file.
pub async fn files_tree(
    State(state): State<AppState>,
) -> Result<Json<TreeNode>, RequestError> {
    let _permit = state.admit()?;

    let rows = ChunkQueries::list_file_chunk_ids(state.database.pool())
        .await
        .map_err(RequestError::Internal)?;

    Ok(Json(build_file_tree(&rows)))
}

fn parse_mode(raw: Option<&str>, default: RelatedMode) -> Result<RelatedMode, RequestError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(RequestError::BadRequest),
    }
}

async fn ensure_chunk_exists(state: &AppState, id: i64) -> Result<(), RequestError> {
    ChunkQueries::get_by_id(state.database.pool(), id)
        .await
        .map_err(RequestError::Internal)?
        .map(|_| ())
        .ok_or_else(|| RequestError::NotFound(format!("chunk not found: {id}")))
}

/// GET /chunks/{id}/related: passage-level relatedness.
pub async fn related(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<RelatedParams>,
) -> Result<Json<RelatedResponse>, RequestError> {
    let _permit = state.admit()?;
    let deadline = state.deadline();

    ensure_chunk_exists(&state, id).await?;
    let mode = parse_mode(params.mode.as_deref(), RelatedMode::Cluster)?;
    let k = params.k.clamp(1, 100);

    let items = state.recommender.related(id, mode, k, deadline).await?;
    Ok(Json(items))
}

/// GET /chunks/{id}/related-notes: file-level relatedness.
pub async fn related_notes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<RelatedParams>,
) -> Result<Json<RelatedNotesResponse>, RequestError> {
    let _permit = state.admit()?;
    let deadline = state.deadline();

    ensure_chunk_exists(&state, id).await?;
    let mode = parse_mode(params.mode.as_deref(), RelatedMode::Embed)?;
    let k = params.k.clamp(1, 50);

    let items = state
        .recommender
        .related_notes(id, mode, k, deadline)
        .await?;

    Ok(Json(RelatedNotesResponse {
        mode: match mode {
            RelatedMode::Cluster => "cluster".to_string(),
            RelatedMode::Embed => "embed".to_string(),
        },
        items,
    }))
}

/// GET /clusters: topic listing, largest first.
pub async fn list_clusters(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<ClusterListItem>>, RequestError> {
    let _permit = state.admit()?;

    let clusters = ClusterQueries::list(state.database.pool(), params.limit.clamp(1, 200))
        .await
        .map_err(RequestError::Internal)?;

    Ok(Json(
        clusters
            .into_iter()
            .map(|c| ClusterListItem {
                id: c.id,
                name: c.name,
                size: c.size,
                method: c.method,
                k: c.k,
            })
            .collect(),
    ))
}

/// GET /clusters/{id}: cluster meta plus member previews.
pub async fn cluster_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ClusterDetail>, RequestError> {
    let _permit = state.admit()?;

    let cluster = ClusterQueries::get(state.database.pool(), id)
        .await
        .map_err(RequestError::Internal)?
        .ok_or_else(|| RequestError::NotFound(format!("cluster not found: {id}")))?;

    let members = ClusterQueries::members(state.database.pool(), id, params.limit.clamp(1, 500))
        .await
        .map_err(RequestError::Internal)?;

    Ok(Json(ClusterDetail {
        meta: ClusterMeta {
            id: cluster.id,
            name: cluster.name,
            summary: cluster.summary,
            size: cluster.size,
        },
        members: members
            .into_iter()
            .map(|c| ClusterMember {
                chunk_id: c.id,
                file_path: c.file_path,
                heading: c.heading,
                preview: make_preview(&c.content),
            })
            .collect(),
    }))
}

/// GET /clusters/suggest: topic routing for a query.
pub async fn suggest(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<SuggestResponse>, RequestError> {
    let _permit = state.admit()?;
    let deadline = state.deadline();

    let suggestions = suggest_clusters(
        state.database.pool(),
        &state.searcher,
        &params.q,
        params.limit.clamp(1, 50),
        params.fts_k.clamp(1, 500),
        deadline,
    )
    .await
    .map_err(|e| match e {
        SearchError::Cancelled => RequestError::Cancelled,
        other => RequestError::Internal(anyhow::Error::new(other)),
    })?;

    Ok(Json(suggestions))
}
