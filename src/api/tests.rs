use super::routes;
use super::schemas::*;
use super::*;
use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

use crate::config::Config;
use crate::store::{open_test_database, ChunkQueries, FileQueries, NewChunk};

async fn test_state() -> Result<(tempfile::TempDir, AppState)> {
    let (temp_dir, database) = open_test_database().await?;
    let mut config = Config::default();
    config.max_parallel_requests = 2;
    Ok((temp_dir, AppState::new(config, database, None)))
}

async fn seed_chunk(state: &AppState, path: &str, heading: &str, content: &str) -> Result<i64> {
    let mut tx = state.database.begin_transaction().await?;
    FileQueries::upsert(&mut tx, path, 0.0, 1, &format!("h-{path}")).await?;
    let ordinal = ChunkQueries::list_by_file(state.database.pool(), path)
        .await?
        .len() as i64;
    ChunkQueries::insert_many(
        &mut tx,
        &[NewChunk {
            file_path: path.to_string(),
            heading: Some(heading.to_string()),
            ordinal,
            content: content.to_string(),
        }],
    )
    .await?;
    tx.commit().await?;

    let chunks = ChunkQueries::list_by_file(state.database.pool(), path).await?;
    Ok(chunks.last().expect("chunk was inserted").id)
}

#[tokio::test]
async fn health_is_ok() {
    let response = routes::health().await;
    assert_eq!(response.0["ok"], true);
}

#[tokio::test]
async fn search_on_empty_corpus_is_empty_hybrid() -> Result<()> {
    let (_dir, state) = test_state().await?;

    let response = routes::search(
        State(state),
        Query(SearchParams {
            q: "anything".to_string(),
            limit: 10,
            fts_k: 200,
            module_id: None,
        }),
    )
    .await?;

    assert_eq!(response.0.mode, "hybrid");
    assert_eq!(response.0.total, Some(0));
    assert!(response.0.items.is_empty());

    Ok(())
}

#[tokio::test]
async fn search_finds_seeded_chunk() -> Result<()> {
    let (_dir, state) = test_state().await?;
    seed_chunk(&state, "a.md", "Linked Lists", "content about pointers").await?;
    seed_chunk(&state, "b.md", "TCP", "packets").await?;

    let response = routes::search(
        State(state),
        Query(SearchParams {
            q: "pointers".to_string(),
            limit: 10,
            fts_k: 200,
            module_id: None,
        }),
    )
    .await?;

    assert_eq!(response.0.total, Some(1));
    assert_eq!(response.0.items[0].file_path, "a.md");
    assert_eq!(
        response.0.items[0].match_class,
        crate::search::MatchClass::Keyword
    );

    Ok(())
}

#[tokio::test]
async fn get_chunk_found_and_missing() -> Result<()> {
    let (_dir, state) = test_state().await?;
    let id = seed_chunk(&state, "a.md", "H", "body text").await?;

    let found = routes::get_chunk(State(state.clone()), Path(id)).await?;
    assert_eq!(found.0.id, id);
    assert_eq!(found.0.content, "body text");

    let missing = routes::get_chunk(State(state), Path(id + 999)).await;
    assert!(matches!(missing, Err(RequestError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn file_chunks_validates_input() -> Result<()> {
    let (_dir, state) = test_state().await?;
    seed_chunk(&state, "a.md", "One", "first").await?;
    seed_chunk(&state, "a.md", "Two", "second").await?;

    let chunks = routes::file_chunks(
        State(state.clone()),
        Query(FileChunksParams {
            file_path: "a.md".to_string(),
        }),
    )
    .await?;
    assert_eq!(chunks.0.len(), 2);
    assert_eq!(chunks.0[0].ordinal, 0);
    assert_eq!(chunks.0[1].ordinal, 1);

    let empty = routes::file_chunks(
        State(state.clone()),
        Query(FileChunksParams {
            file_path: String::new(),
        }),
    )
    .await;
    assert!(matches!(empty, Err(RequestError::BadRequest(_))));

    let missing = routes::file_chunks(
        State(state),
        Query(FileChunksParams {
            file_path: "nope.md".to_string(),
        }),
    )
    .await;
    assert!(matches!(missing, Err(RequestError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn files_tree_nests_directories() -> Result<()> {
    let (_dir, state) = test_state().await?;
    seed_chunk(&state, "dir/a.md", "A", "alpha").await?;
    seed_chunk(&state, "top.md", "T", "top").await?;

    let tree = routes::files_tree(State(state)).await?;
    assert_eq!(tree.0.children.len(), 2);
    assert_eq!(tree.0.children[0].name, "dir");
    assert!(tree.0.children[0].is_dir);
    assert_eq!(tree.0.children[1].name, "top.md");
    assert_eq!(tree.0.chunk_ids.len(), 2);

    Ok(())
}

#[tokio::test]
async fn related_validates_chunk_and_mode() -> Result<()> {
    let (_dir, state) = test_state().await?;
    let id = seed_chunk(&state, "a.md", "H", "body").await?;

    let missing = routes::related(
        State(state.clone()),
        Path(id + 1),
        Query(RelatedParams {
            mode: None,
            k: 10,
        }),
    )
    .await;
    assert!(matches!(missing, Err(RequestError::NotFound(_))));

    let bad_mode = routes::related(
        State(state.clone()),
        Path(id),
        Query(RelatedParams {
            mode: Some("telepathy".to_string()),
            k: 10,
        }),
    )
    .await;
    assert!(matches!(bad_mode, Err(RequestError::BadRequest(_))));

    // Unclustered, unembedded chunk: both defaults yield empty lists.
    let ok = routes::related(
        State(state),
        Path(id),
        Query(RelatedParams {
            mode: None,
            k: 10,
        }),
    )
    .await?;
    assert!(ok.0.is_empty());

    Ok(())
}

#[tokio::test]
async fn clusters_empty_and_missing() -> Result<()> {
    let (_dir, state) = test_state().await?;

    let list = routes::list_clusters(State(state.clone()), Query(LimitParams { limit: 10 }))
        .await?;
    assert!(list.0.is_empty());

    let missing = routes::cluster_detail(
        State(state),
        Path(1),
        Query(LimitParams { limit: 10 }),
    )
    .await;
    assert!(matches!(missing, Err(RequestError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn admission_gate_rejects_excess() -> Result<()> {
    let (_dir, state) = test_state().await?;

    // Capacity is 2x max_parallel_requests = 4.
    let _held: Vec<_> = (0..4)
        .map(|_| state.admit().expect("capacity available"))
        .collect();
    assert!(matches!(state.admit(), Err(RequestError::Overloaded)));

    drop(_held);
    assert!(state.admit().is_ok());

    Ok(())
}

#[test]
fn request_error_status_codes() {
    assert_eq!(
        RequestError::NotFound("x".to_string()).status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        RequestError::BadRequest("x".to_string()).status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(RequestError::Cancelled.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(
        RequestError::Overloaded.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn suggest_on_empty_store_is_empty() -> Result<()> {
    let (_dir, state) = test_state().await?;

    let response = routes::suggest(
        State(state),
        Query(SuggestParams {
            q: "topic".to_string(),
            limit: 5,
            fts_k: 50,
        }),
    )
    .await?;
    assert!(response.0.is_empty());

    Ok(())
}
