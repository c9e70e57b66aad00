pub mod kmeans;
pub mod labeler;


use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::embed::{dot, l2_normalize, pack_vector};
use crate::matrix::EmbeddingMatrix;
use crate::store::{
    ChunkQueries, ClusterQueries, Database, ModuleQueries, NewCluster, StoreError,
};

pub use kmeans::{kmeans, KmeansResult};
pub use labeler::{label_cluster, ClusterNamer, OpenAiNamer};

pub const KMEANS_METHOD: &str = "kmeans";

/// How many members closest to the centroid feed the labeler.
const LABEL_SAMPLE: usize = 12;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("no embeddings available to cluster")]
    NotEnoughData,

    /// The iteration cap was hit before the shift threshold; the build keeps
    /// the best-so-far partition and reports it through this condition.
    #[error("k-means did not converge within {iterations} iterations")]
    Converge { iterations: usize },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterBuildReport {
    pub k: usize,
    pub clusters: usize,
    pub assigned: usize,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBuildReport {
    pub modules: usize,
    pub files: usize,
}

/// Target cluster count for a corpus of `n` embedded passages.
#[inline]
pub fn target_k(n: usize) -> usize {
    let estimate = ((n as f64) / 2.0).sqrt().round() as usize;
    estimate.clamp(8, 128).min(n.max(1))
}

fn seed_from_fingerprint(fingerprint: &[u8; 32]) -> u64 {
    u64::from_le_bytes(
        fingerprint[..8]
            .try_into()
            .expect("fingerprint is 32 bytes"),
    )
}

/// Partition every embedded passage into topics and persist the result.
///
/// Deterministic for an unchanged corpus: the RNG seed derives from the
/// corpus fingerprint. Prior clusters from the same method are replaced
/// atomically.
pub async fn build_clusters(
    database: &Database,
    model: &str,
    k_override: Option<usize>,
    namer: Option<&dyn ClusterNamer>,
) -> Result<ClusterBuildReport, ClusterError> {
    let _guard = database.begin_build()?;

    let matrix = EmbeddingMatrix::load(database.pool(), model).await?;
    if matrix.is_empty() {
        return Err(ClusterError::NotEnoughData);
    }

    let n = matrix.len();
    let k = k_override.unwrap_or_else(|| target_k(n)).min(n).max(1);
    let seed = seed_from_fingerprint(&database.corpus_fingerprint().await?);
    info!("clustering {n} vectors into k={k} (seed {seed})");

    let rows: Vec<Vec<f32>> = (0..n).map(|i| matrix.row(i).to_vec()).collect();
    let result = kmeans(&rows, k, seed);
    if !result.converged {
        warn!(
            "{}",
            ClusterError::Converge {
                iterations: result.iterations
            }
        );
    }

    // Group member ids per cluster, largest first for stable insert order.
    let mut members: HashMap<usize, Vec<i64>> = HashMap::new();
    for (row_idx, &cluster_idx) in result.assignments.iter().enumerate() {
        members
            .entry(cluster_idx)
            .or_default()
            .push(matrix.ids()[row_idx]);
    }
    let mut ordered: Vec<(usize, Vec<i64>)> = members.into_iter().collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

    // Labels are derived before the write transaction opens so the store
    // mutates in one short atomic step.
    let mut labels: Vec<(String, Option<String>)> = Vec::with_capacity(ordered.len());
    for (cluster_idx, chunk_ids) in &ordered {
        let centroid = &result.centroids[*cluster_idx];
        labels.push(
            name_for_cluster(database, *cluster_idx, chunk_ids, centroid, &matrix, namer)
                .await?,
        );
    }

    let mut tx = database.begin_transaction().await?;
    ClusterQueries::clear_method(&mut tx, KMEANS_METHOD)
        .await
        .map_err(StoreError::Query)?;

    let mut inserted = 0usize;
    let mut assigned = 0usize;

    for ((cluster_idx, chunk_ids), (name, summary)) in ordered.iter().zip(labels.into_iter()) {
        let centroid = &result.centroids[*cluster_idx];

        let cluster_id = ClusterQueries::insert(
            &mut tx,
            &NewCluster {
                method: KMEANS_METHOD.to_string(),
                k: result.k as i64,
                name,
                summary,
                size: chunk_ids.len() as i64,
                centroid: Some(pack_vector(centroid)),
            },
        )
        .await
        .map_err(StoreError::Query)?;

        ClusterQueries::insert_members(&mut tx, cluster_id, chunk_ids)
            .await
            .map_err(StoreError::Query)?;

        inserted += 1;
        assigned += chunk_ids.len();
    }

    tx.commit().await.map_err(StoreError::Db)?;
    info!("cluster build finished: {inserted} clusters over {assigned} chunks");

    Ok(ClusterBuildReport {
        k: result.k,
        clusters: inserted,
        assigned,
        iterations: result.iterations,
        converged: result.converged,
    })
}

/// Label one cluster from the members closest to its centroid.
async fn name_for_cluster(
    database: &Database,
    cluster_idx: usize,
    chunk_ids: &[i64],
    centroid: &[f32],
    matrix: &EmbeddingMatrix,
    namer: Option<&dyn ClusterNamer>,
) -> Result<(String, Option<String>), ClusterError> {
    let mut by_proximity: Vec<(i64, f32)> = chunk_ids
        .iter()
        .filter_map(|&id| matrix.vector_of(id).map(|v| (id, dot(v, centroid))))
        .collect();
    by_proximity.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let top_ids: Vec<i64> = by_proximity
        .iter()
        .take(LABEL_SAMPLE)
        .map(|(id, _)| *id)
        .collect();

    let chunks = ChunkQueries::get_many(database.pool(), &top_ids)
        .await
        .map_err(StoreError::Query)?;
    let headings: Vec<String> = chunks
        .iter()
        .filter_map(|c| c.heading.clone())
        .collect();
    let bodies: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

    if let Some(namer) = namer {
        if !headings.is_empty() {
            match namer.name_cluster(&headings) {
                Ok(named) => return Ok(named),
                Err(e) => warn!("LLM naming failed, falling back to tokens: {e}"),
            }
        }
    }

    Ok(label_cluster(cluster_idx, &headings, &bodies))
}

/// Coarse file classification: one vector per file (normalized mean of its
/// chunk embeddings), clustered into modules.
pub async fn build_modules(
    database: &Database,
    model: &str,
) -> Result<ModuleBuildReport, ClusterError> {
    let _guard = database.begin_build()?;

    let matrix = EmbeddingMatrix::load(database.pool(), model).await?;
    if matrix.is_empty() {
        return Err(ClusterError::NotEnoughData);
    }

    let pairs = ChunkQueries::list_file_chunk_ids(database.pool())
        .await
        .map_err(StoreError::Query)?;

    // file -> normalized mean of its embedded chunks.
    let mut grouped: Vec<(String, Vec<f32>)> = Vec::new();
    let mut current: Option<(String, Vec<f64>, usize)> = None;

    let dims = matrix.dims();
    let mut flush = |entry: Option<(String, Vec<f64>, usize)>, out: &mut Vec<(String, Vec<f32>)>| {
        if let Some((path, sum, count)) = entry {
            if count > 0 {
                let mut mean: Vec<f32> =
                    sum.into_iter().map(|v| (v / count as f64) as f32).collect();
                l2_normalize(&mut mean);
                out.push((path, mean));
            }
        }
    };

    for (path, chunk_id) in pairs {
        if current.as_ref().map(|(p, _, _)| p != &path).unwrap_or(true) {
            flush(current.take(), &mut grouped);
            current = Some((path.clone(), vec![0.0f64; dims], 0));
        }
        if let Some(vec) = matrix.vector_of(chunk_id) {
            let entry = current.as_mut().expect("current file entry exists");
            for (j, &v) in vec.iter().enumerate() {
                entry.1[j] += v as f64;
            }
            entry.2 += 1;
        }
    }
    flush(current.take(), &mut grouped);

    if grouped.is_empty() {
        return Err(ClusterError::NotEnoughData);
    }

    let file_count = grouped.len();
    let k = (((file_count as f64) / 2.0).sqrt().round() as usize)
        .clamp(2, 32)
        .min(file_count);
    let seed = seed_from_fingerprint(&database.corpus_fingerprint().await?).wrapping_add(1);

    let rows: Vec<Vec<f32>> = grouped.iter().map(|(_, v)| v.clone()).collect();
    let result = kmeans(&rows, k, seed);

    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for (row_idx, &module_idx) in result.assignments.iter().enumerate() {
        members.entry(module_idx).or_default().push(row_idx);
    }
    let mut ordered: Vec<(usize, Vec<usize>)> = members.into_iter().collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

    let mut tx = database.begin_transaction().await?;
    ModuleQueries::clear(&mut tx).await.map_err(StoreError::Query)?;

    let mut modules = 0usize;
    for (module_idx, file_indices) in &ordered {
        let stems: Vec<String> = file_indices
            .iter()
            .map(|&i| file_stem(&grouped[i].0))
            .collect();
        let picked = labeler::top_tokens(&stems, 5);
        let name = if picked.is_empty() {
            format!("module-{module_idx}")
        } else {
            picked.iter().take(3).cloned().collect::<Vec<_>>().join(" / ")
        };
        let description = if picked.is_empty() {
            None
        } else {
            Some(format!("Files about: {}", picked.join(", ")))
        };

        let module_id = ModuleQueries::insert(&mut tx, &name, description.as_deref())
            .await
            .map_err(StoreError::Query)?;

        let centroid = &result.centroids[*module_idx];
        for &i in file_indices {
            let (path, vec) = &grouped[i];
            let score = dot(vec, centroid).clamp(-1.0, 1.0) as f64;
            ModuleQueries::assign_file(&mut tx, path, module_id, score)
                .await
                .map_err(StoreError::Query)?;
        }
        modules += 1;
    }

    tx.commit().await.map_err(StoreError::Db)?;
    info!("module build finished: {modules} modules over {file_count} files");

    Ok(ModuleBuildReport {
        modules,
        files: file_count,
    })
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .replace('_', " ")
}
