pub mod parser;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::store::{ChunkQueries, Database, FileQueries, NewChunk, StoreError};

use parser::parse_sections;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid UTF-8 in {0}")]
    Decode(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files_seen: u64,
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub chunks_inserted: u64,
}

/// Walks the corpus and rebuilds the passage index for changed files.
pub struct Ingestor {
    root: PathBuf,
    extensions: Vec<String>,
    strict_decode: bool,
}

impl Ingestor {
    #[inline]
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.notes_dir.clone(),
            extensions: config.file_extensions.clone(),
            strict_decode: config.strict_decode,
        }
    }

    #[inline]
    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    /// Index the corpus. Holds the store's build lock for the duration; each
    /// file commits in its own transaction so a failure leaves no
    /// half-indexed file behind.
    pub async fn run(&self, database: &Database) -> Result<IngestReport, IngestError> {
        let _guard = database.begin_build()?;

        if !self.root.is_dir() {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("notes directory not found: {}", self.root.display()),
            )));
        }

        let files = self.collect_files()?;
        info!("Ingesting {} files under {}", files.len(), self.root.display());

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(files.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Indexing {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut report = IngestReport::default();

        for path in files {
            report.files_seen += 1;
            let rel_path = self.relative_path(&path)?;
            bar.set_message(rel_path.clone());

            match self.index_one_file(database, &path, &rel_path).await {
                Ok(None) => report.files_skipped += 1,
                Ok(Some(inserted)) => {
                    report.files_indexed += 1;
                    report.chunks_inserted += inserted;
                }
                // A store failure is fatal for the run; everything else is
                // fatal only for this file.
                Err(IngestError::Store(e)) => {
                    bar.finish_and_clear();
                    return Err(IngestError::Store(e));
                }
                Err(e) => {
                    warn!("Failed to index {}: {}", rel_path, e);
                    report.files_failed += 1;
                }
            }
            bar.inc(1);
        }

        bar.finish_and_clear();
        info!(
            "Ingest finished: {} indexed, {} skipped, {} failed, {} chunks",
            report.files_indexed, report.files_skipped, report.files_failed,
            report.chunks_inserted
        );

        Ok(report)
    }

    /// Matching files in walk order. Symlinks are not followed, so links
    /// pointing outside the root cannot drag foreign trees in; hidden files
    /// and directories are skipped.
    fn collect_files(&self) -> Result<Vec<PathBuf>, IngestError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                IngestError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("walk error")
                }))
            })?;

            if entry.path_is_symlink() || !entry.file_type().is_file() {
                continue;
            }
            if self.is_hidden(entry.path()) {
                continue;
            }

            let matches = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| self.extensions.iter().any(|want| want.eq_ignore_ascii_case(e)))
                .unwrap_or(false);
            if matches {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    fn is_hidden(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .map(|rel| {
                rel.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    fn relative_path(&self, path: &Path) -> Result<String, IngestError> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| IngestError::Parse(format!("path escapes root: {}", path.display())))?;
        let parts: Vec<&str> = rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        Ok(parts.join("/"))
    }

    /// Reindex one file. Returns `None` when the content hash is unchanged,
    /// otherwise the number of inserted chunks.
    async fn index_one_file(
        &self,
        database: &Database,
        path: &Path,
        rel_path: &str,
    ) -> Result<Option<u64>, IngestError> {
        let metadata = std::fs::metadata(path)?;
        let bytes = std::fs::read(path)?;

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) if self.strict_decode => {
                return Err(IngestError::Decode(path.to_path_buf()));
            }
            Err(_) => {
                warn!("Skipping {}: not valid UTF-8", rel_path);
                return Ok(None);
            }
        };

        let digest = format!("{:x}", Sha256::digest(text.as_bytes()));
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let size_bytes = metadata.len() as i64;

        let existing = FileQueries::get(database.pool(), rel_path)
            .await
            .map_err(StoreError::Query)?;
        let unchanged = existing
            .as_ref()
            .map(|f| f.content_hash == digest)
            .unwrap_or(false);

        let mut tx = database.begin_transaction().await?;
        FileQueries::upsert(&mut tx, rel_path, mtime, size_bytes, &digest)
            .await
            .map_err(StoreError::Query)?;

        if unchanged {
            tx.commit().await.map_err(StoreError::Db)?;
            debug!("Unchanged, skipping {}", rel_path);
            return Ok(None);
        }

        // Replacing the chunks cascades to embeddings, cluster memberships
        // and the FTS index.
        ChunkQueries::delete_by_file(&mut tx, rel_path)
            .await
            .map_err(StoreError::Query)?;

        let chunks: Vec<NewChunk> = parse_sections(&text)
            .into_iter()
            .filter(|s| !s.body.is_empty())
            .enumerate()
            .map(|(ordinal, section)| NewChunk {
                file_path: rel_path.to_string(),
                heading: section.heading,
                ordinal: ordinal as i64,
                content: section.body,
            })
            .collect();

        let inserted = ChunkQueries::insert_many(&mut tx, &chunks)
            .await
            .map_err(StoreError::Query)?;
        tx.commit().await.map_err(StoreError::Db)?;

        debug!("Indexed {} ({} chunks)", rel_path, inserted);
        Ok(Some(inserted))
    }
}
