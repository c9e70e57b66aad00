pub mod routes;
pub mod schemas;
pub mod tree;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::embed::EmbeddingBackend;
use crate::matrix::MatrixCache;
use crate::search::{HybridSearcher, SearchError};
use crate::store::Database;
use crate::suggest::Recommender;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request deadline exceeded")]
    Cancelled,

    #[error("server overloaded")]
    Overloaded,

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl RequestError {
    #[inline]
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
            RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            RequestError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("request failed: {self}");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<SearchError> for RequestError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Cancelled => RequestError::Cancelled,
            other => RequestError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Shared application state for the read-only HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Database,
    pub matrix: Arc<MatrixCache>,
    pub searcher: Arc<HybridSearcher>,
    pub recommender: Arc<Recommender>,
    /// Admission gate: capacity 2x the worker cap; excess requests are
    /// rejected, not queued.
    pub admission: Arc<Semaphore>,
}

impl AppState {
    #[inline]
    pub fn new(
        config: Config,
        database: Database,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
    ) -> Self {
        let matrix = Arc::new(MatrixCache::empty());
        let searcher = Arc::new(HybridSearcher::new(
            database.pool().clone(),
            Arc::clone(&matrix),
            embedder,
            config.embed.width,
        ));
        let recommender = Arc::new(Recommender::new(
            database.pool().clone(),
            Arc::clone(&matrix),
        ));
        let admission = Arc::new(Semaphore::new(config.max_parallel_requests * 2));

        Self {
            config: Arc::new(config),
            database,
            matrix,
            searcher,
            recommender,
            admission,
        }
    }

    /// Reject immediately when the bounded queue is full.
    #[inline]
    pub fn admit(&self) -> Result<tokio::sync::OwnedSemaphorePermit, RequestError> {
        Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| RequestError::Overloaded)
    }

    /// Deadline for one incoming request.
    #[inline]
    pub fn deadline(&self) -> crate::search::Deadline {
        crate::search::Deadline::after(self.config.request_budget())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/search", get(routes::search))
        .route("/chunks/{id}", get(routes::get_chunk))
        .route("/chunks/{id}/related", get(routes::related))
        .route("/chunks/{id}/related-notes", get(routes::related_notes))
        .route("/files/chunks", get(routes::file_chunks))
        .route("/files/tree", get(routes::files_tree))
        .route("/clusters", get(routes::list_clusters))
        .route("/clusters/suggest", get(routes::suggest))
        .route("/clusters/{id}", get(routes::cluster_detail))
        .with_state(state)
}

/// Serve the HTTP surface until the process is stopped. Reloads the
/// embedding matrix on SIGHUP so a finished offline build can be picked up
/// without a restart.
pub async fn serve(state: AppState) -> crate::Result<()> {
    let bind_addr = state.config.bind_addr.clone();

    state
        .matrix
        .reload(state.database.pool(), &state.config.embed.model)
        .await?;

    #[cfg(unix)]
    {
        let reload_state = state.clone();
        tokio::spawn(async move {
            let mut hangup = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::hangup(),
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("SIGHUP handler unavailable: {e}");
                    return;
                }
            };
            while hangup.recv().await.is_some() {
                info!("SIGHUP: reloading embedding matrix");
                if let Err(e) = reload_state
                    .matrix
                    .reload(
                        reload_state.database.pool(),
                        &reload_state.config.embed.model,
                    )
                    .await
                {
                    warn!("matrix reload failed: {e}");
                }
            }
        });
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(crate::KbError::Io)?;
    info!("listening on {bind_addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::KbError::Io(std::io::Error::other(e)))?;
    Ok(())
}
