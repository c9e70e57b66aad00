pub mod hybrid;
pub mod lexical;
pub mod semantic;
pub mod text;


use std::time::{Duration, Instant};

use thiserror::Error;

pub use hybrid::{HybridHit, HybridSearcher, MatchClass};
pub use lexical::LexicalHit;
pub use semantic::SemanticHit;

/// Long scans check the deadline once per this many candidates.
pub const DEADLINE_CHECK_INTERVAL: usize = 1024;

#[derive(Error, Debug)]
pub enum SearchError {
    /// The inverted index failed; fatal for the request.
    #[error("full-text index error: {0}")]
    Index(#[source] anyhow::Error),

    /// The embedder could not be reached. Non-fatal: hybrid search degrades
    /// to lexical-only.
    #[error("embedding backend unavailable")]
    EmbedderUnavailable,

    #[error("query deadline exceeded")]
    Cancelled,
}

impl From<crate::store::StoreError> for SearchError {
    fn from(e: crate::store::StoreError) -> Self {
        SearchError::Index(anyhow::Error::new(e))
    }
}

/// Absolute point in time a request must finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    #[inline]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// A deadline far enough away that offline builds never hit it.
    #[inline]
    pub fn unbounded() -> Self {
        Self::after(Duration::from_secs(24 * 60 * 60))
    }

    #[inline]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    #[inline]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Fails with [`SearchError::Cancelled`] once the deadline has passed.
    #[inline]
    pub fn check(&self) -> Result<(), SearchError> {
        if self.expired() {
            Err(SearchError::Cancelled)
        } else {
            Ok(())
        }
    }
}
