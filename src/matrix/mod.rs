//! In-memory embedding matrix: one contiguous f32 buffer plus a parallel,
//! sorted chunk-id index. Loaded once per store snapshot and swapped
//! atomically, so readers keep a consistent view while a build publishes a
//! new one.


use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::SqlitePool;
use tracing::info;

use crate::embed::unpack_vector;
use crate::search::{Deadline, SearchError, DEADLINE_CHECK_INTERVAL};
use crate::store::{EmbeddingQueries, StoreError};

#[derive(Debug, Default)]
pub struct EmbeddingMatrix {
    model: String,
    dims: usize,
    /// Chunk ids ascending; row i of `data` belongs to `ids[i]`.
    ids: Vec<i64>,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Load every embedding for `model`, ordered by chunk id. A blob whose
    /// length disagrees with its dims column is store corruption.
    pub async fn load(pool: &SqlitePool, model: &str) -> Result<Self, StoreError> {
        let rows = EmbeddingQueries::load_all(pool, model)
            .await
            .map_err(StoreError::Query)?;

        let Some(first) = rows.first() else {
            return Ok(Self {
                model: model.to_string(),
                ..Self::default()
            });
        };

        let dims = first.dims as usize;
        let mut ids = Vec::with_capacity(rows.len());
        let mut data = Vec::with_capacity(rows.len() * dims);

        for row in &rows {
            if row.dims as usize != dims {
                return Err(StoreError::Corrupt(format!(
                    "embedding dims mismatch for chunk {}: {} vs {}",
                    row.chunk_id, row.dims, dims
                )));
            }
            let vec = unpack_vector(&row.vec, dims).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "embedding blob for chunk {} is {} bytes, expected {}",
                    row.chunk_id,
                    row.vec.len(),
                    dims * 4
                ))
            })?;
            ids.push(row.chunk_id);
            data.extend_from_slice(&vec);
        }

        Ok(Self {
            model: model.to_string(),
            dims,
            ids,
            data,
        })
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.dims
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    #[inline]
    pub fn row(&self, idx: usize) -> &[f32] {
        &self.data[idx * self.dims..(idx + 1) * self.dims]
    }

    /// The vector for a chunk, if it has one.
    #[inline]
    pub fn vector_of(&self, chunk_id: i64) -> Option<&[f32]> {
        let idx = self.ids.binary_search(&chunk_id).ok()?;
        Some(self.row(idx))
    }

    /// Brute-force cosine kNN over the whole matrix, excluding `exclude`.
    ///
    /// Returns `(chunk_id, cosine)` descending by score, ties by lower id,
    /// truncated to `k`. Checks the deadline at every 1024-candidate
    /// boundary and returns no partial result on expiry.
    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<i64>,
        deadline: Deadline,
    ) -> Result<Vec<(i64, f32)>, SearchError> {
        let mut scored: Vec<(i64, f32)> = Vec::with_capacity(self.len());

        for (idx, &chunk_id) in self.ids.iter().enumerate() {
            if idx % DEADLINE_CHECK_INTERVAL == 0 {
                deadline.check()?;
            }
            if exclude == Some(chunk_id) {
                continue;
            }
            let score = crate::embed::dot(query, self.row(idx));
            scored.push((chunk_id, score));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Process-wide cache of the current matrix, swapped wholesale on reload.
///
/// Readers grab an `Arc` and keep using their snapshot; a build or a reload
/// signal publishes a new one and old readers drain naturally.
#[derive(Debug, Default)]
pub struct MatrixCache {
    inner: RwLock<Arc<EmbeddingMatrix>>,
}

impl MatrixCache {
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn snapshot(&self) -> Arc<EmbeddingMatrix> {
        Arc::clone(&self.inner.read())
    }

    pub async fn reload(&self, pool: &SqlitePool, model: &str) -> Result<(), StoreError> {
        let matrix = EmbeddingMatrix::load(pool, model).await?;
        info!(
            "embedding matrix loaded: {} vectors x {} dims (model {})",
            matrix.len(),
            matrix.dims(),
            model
        );
        *self.inner.write() = Arc::new(matrix);
        Ok(())
    }
}
