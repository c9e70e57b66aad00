use thiserror::Error;

pub type Result<T> = std::result::Result<T, KbError>;

/// Top-level error for the knowledge-base engine.
///
/// Each engine module defines its own error enum; this aggregates them so the
/// CLI and the HTTP layer can map every failure to an exit code or a status.
#[derive(Error, Debug)]
pub enum KbError {
    #[error("ingest error: {0}")]
    Ingest(#[from] ingest::IngestError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("search error: {0}")]
    Search(#[from] search::SearchError),

    #[error("cluster error: {0}")]
    Cluster(#[from] cluster::ClusterError),

    #[error("request error: {0}")]
    Request(#[from] api::RequestError),

    #[error("embedding error: {0}")]
    Embed(#[from] embed::EmbedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// Process exit code for the build CLIs: 3 for I/O failures, 4 for
    /// store/consistency failures, 1 otherwise. Usage errors exit 2 via clap.
    #[inline]
    pub fn exit_code(&self) -> i32 {
        match self {
            KbError::Io(_) | KbError::Ingest(ingest::IngestError::Io(_)) => 3,
            KbError::Store(_)
            | KbError::Ingest(ingest::IngestError::Store(_))
            | KbError::Cluster(cluster::ClusterError::Store(_)) => 4,
            _ => 1,
        }
    }
}

pub mod api;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod embed;
pub mod ingest;
pub mod matrix;
pub mod search;
pub mod store;
pub mod suggest;
