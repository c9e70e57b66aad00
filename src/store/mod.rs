use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{debug, info};

pub mod models;
pub mod queries;


pub use models::*;
pub use queries::*;

pub type DbPool = Pool<Sqlite>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Another build holds the write lock.
    #[error("another build is in progress")]
    Locked,

    #[error("store is corrupt: {0}")]
    Corrupt(String),

    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[source] anyhow::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Handle to the single-file SQLite store.
///
/// Reads go through a WAL pool; mutation happens only inside a build, which
/// holds the in-process build lock for its whole transaction. Readers observe
/// either the pre- or post-build state, never a partial one.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
    build_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Held for the duration of one build; dropping it releases the write lock.
pub struct BuildGuard {
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl Database {
    #[inline]
    pub async fn open<P: AsRef<Path>>(db_path: P, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Query(anyhow::Error::new(e).context(format!(
                        "Failed to create store directory: {}",
                        parent.display()
                    ))))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let database = Self {
            pool,
            build_lock: Arc::new(tokio::sync::Mutex::new(())),
        };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running store migrations");

        sqlx::raw_sql(include_str!("migrations/001_initial_schema.sql"))
            .execute(&self.pool)
            .await
            .map_err(StoreError::Migration)?;

        debug!("Store migrations completed");
        Ok(())
    }

    /// Acquire the write lock for a build. Fails immediately with
    /// [`StoreError::Locked`] when a build is already running; builds never
    /// queue behind each other.
    #[inline]
    pub fn begin_build(&self) -> Result<BuildGuard, StoreError> {
        let permit = self
            .build_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| StoreError::Locked)?;
        Ok(BuildGuard { _permit: permit })
    }

    #[inline]
    pub async fn begin_transaction(&self) -> Result<sqlx::Transaction<'_, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Fingerprint of the corpus contents: stable across rebuilds of an
    /// unchanged corpus (and across pure renames, since the hashes are
    /// sorted by value), used to seed deterministic cluster builds.
    #[inline]
    pub async fn corpus_fingerprint(&self) -> Result<[u8; 32], StoreError> {
        let hashes = FileQueries::all_hashes(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for hash in hashes {
            hasher.update(hash.as_bytes());
        }
        Ok(hasher.finalize().into())
    }

    #[inline]
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let files = FileQueries::count(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        let chunks = ChunkQueries::count(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        let (embeddings, embedding_models) = EmbeddingQueries::stats(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        let clusters = ClusterQueries::count(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        let modules = ModuleQueries::count(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        Ok(StoreStats {
            files,
            chunks,
            embeddings,
            embedding_models,
            clusters,
            modules,
        })
    }
}

/// Open a store next to a temp directory for tests.
#[cfg(test)]
pub(crate) async fn open_test_database() -> anyhow::Result<(tempfile::TempDir, Database)> {
    use anyhow::Context;

    let temp_dir = tempfile::TempDir::new()?;
    let database = Database::open(temp_dir.path().join("kb.sqlite"), 4)
        .await
        .context("Failed to open test store")?;
    Ok((temp_dir, database))
}
