use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::models::*;

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

pub struct FileQueries;

impl FileQueries {
    #[inline]
    pub async fn upsert(
        tx: &mut Transaction<'_, Sqlite>,
        path: &str,
        mtime: f64,
        size_bytes: i64,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (path, mtime, size_bytes, content_hash)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                mtime = excluded.mtime,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash,
                updated_at = datetime('now')
            "#,
        )
        .bind(path)
        .bind(mtime)
        .bind(size_bytes)
        .bind(content_hash)
        .execute(&mut **tx)
        .await
        .context("Failed to upsert file record")?;
        Ok(())
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, path: &str) -> Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT path, mtime, size_bytes, content_hash FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(pool)
        .await
        .context("Failed to get file record")
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(pool)
            .await
            .context("Failed to count files")
    }

    /// Content hashes of every file, sorted by hash value so the corpus
    /// fingerprint depends only on contents, not on file names.
    #[inline]
    pub async fn all_hashes(pool: &SqlitePool) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT content_hash FROM files ORDER BY content_hash")
            .fetch_all(pool)
            .await
            .context("Failed to list file hashes")
    }

    #[inline]
    pub async fn list_paths(pool: &SqlitePool) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT path FROM files ORDER BY path")
            .fetch_all(pool)
            .await
            .context("Failed to list file paths")
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    #[inline]
    pub async fn delete_by_file(tx: &mut Transaction<'_, Sqlite>, file_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut **tx)
            .await
            .context("Failed to delete chunks for file")?;
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn insert_many(
        tx: &mut Transaction<'_, Sqlite>,
        chunks: &[NewChunk],
    ) -> Result<u64> {
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (file_path, heading, ordinal, content, content_len)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.file_path)
            .bind(&chunk.heading)
            .bind(chunk.ordinal)
            .bind(&chunk.content)
            .bind(chunk.content.len() as i64)
            .execute(&mut **tx)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert chunk {}#{}",
                    chunk.file_path, chunk.ordinal
                )
            })?;
        }
        Ok(chunks.len() as u64)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Chunk>> {
        sqlx::query_as::<_, Chunk>(
            "SELECT id, file_path, heading, ordinal, content, content_len FROM chunks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chunk by id")
    }

    #[inline]
    pub async fn get_many(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, file_path, heading, ordinal, content, content_len \
             FROM chunks WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, Chunk>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await.context("Failed to get chunks")
    }

    #[inline]
    pub async fn list_by_file(pool: &SqlitePool, file_path: &str) -> Result<Vec<Chunk>> {
        sqlx::query_as::<_, Chunk>(
            r#"
            SELECT id, file_path, heading, ordinal, content, content_len
            FROM chunks
            WHERE file_path = ?
            ORDER BY ordinal
            "#,
        )
        .bind(file_path)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks for file")
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")
    }

    /// Every (file_path, chunk_id) pair, the input to the file-tree view.
    #[inline]
    pub async fn list_file_chunk_ids(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT file_path, id FROM chunks ORDER BY file_path, ordinal")
            .fetch_all(pool)
            .await
            .context("Failed to list chunk ids per file")?;
        Ok(rows
            .iter()
            .map(|r: &SqliteRow| (r.get::<String, _>(0), r.get::<i64, _>(1)))
            .collect())
    }
}

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    #[inline]
    pub async fn upsert(
        tx: &mut Transaction<'_, Sqlite>,
        chunk_id: i64,
        model: &str,
        dims: i64,
        vec: &[u8],
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, vec)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                vec = excluded.vec
            "#,
        )
        .bind(chunk_id)
        .bind(model)
        .bind(dims)
        .bind(vec)
        .execute(&mut **tx)
        .await
        .context("Failed to upsert embedding")?;
        Ok(())
    }

    /// Drop vectors produced by a different model. Run at the start of an
    /// embed build so a model switch recomputes everything.
    #[inline]
    pub async fn purge_other_models(
        tx: &mut Transaction<'_, Sqlite>,
        model: &str,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embeddings WHERE model != ?")
            .bind(model)
            .execute(&mut **tx)
            .await
            .context("Failed to purge stale-model embeddings")?;
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, chunk_id: i64) -> Result<Option<EmbeddingRow>> {
        sqlx::query_as::<_, EmbeddingRow>(
            "SELECT chunk_id, model, dims, vec FROM embeddings WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get embedding")
    }

    /// Chunks that still need a vector under the given model, in id order so
    /// repeated builds embed in a stable sequence.
    #[inline]
    pub async fn unembedded_chunks(
        pool: &SqlitePool,
        model: &str,
    ) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.content
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
            WHERE e.chunk_id IS NULL
            ORDER BY c.id
            "#,
        )
        .bind(model)
        .fetch_all(pool)
        .await
        .context("Failed to list unembedded chunks")?;
        Ok(rows
            .iter()
            .map(|r: &SqliteRow| (r.get::<i64, _>(0), r.get::<String, _>(1)))
            .collect())
    }

    /// Every embedding for one model, ordered by chunk id. Input to the
    /// in-memory matrix and the cluster build.
    #[inline]
    pub async fn load_all(pool: &SqlitePool, model: &str) -> Result<Vec<EmbeddingRow>> {
        sqlx::query_as::<_, EmbeddingRow>(
            "SELECT chunk_id, model, dims, vec FROM embeddings WHERE model = ? ORDER BY chunk_id",
        )
        .bind(model)
        .fetch_all(pool)
        .await
        .context("Failed to load embedding matrix")
    }

    #[inline]
    pub async fn stats(pool: &SqlitePool) -> Result<(i64, Vec<(String, i64, i64)>)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(pool)
            .await
            .context("Failed to count embeddings")?;

        let rows = sqlx::query(
            "SELECT model, dims, COUNT(*) FROM embeddings GROUP BY model, dims ORDER BY model",
        )
        .fetch_all(pool)
        .await
        .context("Failed to aggregate embedding models")?;

        let models = rows
            .iter()
            .map(|r: &SqliteRow| {
                (
                    r.get::<String, _>(0),
                    r.get::<i64, _>(1),
                    r.get::<i64, _>(2),
                )
            })
            .collect();
        Ok((total, models))
    }
}

pub struct ClusterQueries;

impl ClusterQueries {
    /// Remove every cluster produced by the given method, cascading to its
    /// memberships. Each cluster build starts from a clean slate.
    #[inline]
    pub async fn clear_method(tx: &mut Transaction<'_, Sqlite>, method: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM clusters WHERE method = ?")
            .bind(method)
            .execute(&mut **tx)
            .await
            .context("Failed to clear prior clusters")?;
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn insert(tx: &mut Transaction<'_, Sqlite>, cluster: &NewCluster) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO clusters (method, k, name, summary, size, centroid)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cluster.method)
        .bind(cluster.k)
        .bind(&cluster.name)
        .bind(&cluster.summary)
        .bind(cluster.size)
        .bind(&cluster.centroid)
        .execute(&mut **tx)
        .await
        .context("Failed to insert cluster")?
        .last_insert_rowid();
        Ok(id)
    }

    #[inline]
    pub async fn insert_members(
        tx: &mut Transaction<'_, Sqlite>,
        cluster_id: i64,
        chunk_ids: &[i64],
    ) -> Result<()> {
        for chunk_id in chunk_ids {
            sqlx::query("INSERT INTO cluster_members (cluster_id, chunk_id) VALUES (?, ?)")
                .bind(cluster_id)
                .bind(chunk_id)
                .execute(&mut **tx)
                .await
                .context("Failed to insert cluster member")?;
        }
        Ok(())
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Cluster>> {
        sqlx::query_as::<_, Cluster>(
            "SELECT id, method, k, name, summary, size FROM clusters WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get cluster")
    }

    #[inline]
    pub async fn list(pool: &SqlitePool, limit: i64) -> Result<Vec<Cluster>> {
        sqlx::query_as::<_, Cluster>(
            r#"
            SELECT id, method, k, name, summary, size
            FROM clusters
            ORDER BY size DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to list clusters")
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM clusters")
            .fetch_one(pool)
            .await
            .context("Failed to count clusters")
    }

    /// The cluster a passage belongs to, if clustering has run.
    #[inline]
    pub async fn cluster_of(pool: &SqlitePool, chunk_id: i64) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT cluster_id FROM cluster_members WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_optional(pool)
            .await
            .context("Failed to look up cluster membership")
    }

    #[inline]
    pub async fn clusters_of(pool: &SqlitePool, chunk_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT chunk_id, cluster_id FROM cluster_members WHERE chunk_id IN ({})",
            placeholders(chunk_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(pool)
            .await
            .context("Failed to look up cluster memberships")?;
        Ok(rows
            .iter()
            .map(|r: &SqliteRow| (r.get::<i64, _>(0), r.get::<i64, _>(1)))
            .collect())
    }

    #[inline]
    pub async fn member_ids(pool: &SqlitePool, cluster_id: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar(
            "SELECT chunk_id FROM cluster_members WHERE cluster_id = ? ORDER BY chunk_id",
        )
        .bind(cluster_id)
        .fetch_all(pool)
        .await
        .context("Failed to list cluster members")
    }

    #[inline]
    pub async fn members(pool: &SqlitePool, cluster_id: i64, limit: i64) -> Result<Vec<Chunk>> {
        sqlx::query_as::<_, Chunk>(
            r#"
            SELECT c.id, c.file_path, c.heading, c.ordinal, c.content, c.content_len
            FROM cluster_members m
            JOIN chunks c ON c.id = m.chunk_id
            WHERE m.cluster_id = ?
            ORDER BY c.id
            LIMIT ?
            "#,
        )
        .bind(cluster_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to fetch cluster member chunks")
    }
}

pub struct ModuleQueries;

impl ModuleQueries {
    #[inline]
    pub async fn clear(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
        sqlx::query("DELETE FROM file_modules")
            .execute(&mut **tx)
            .await
            .context("Failed to clear file-module assignments")?;
        sqlx::query("DELETE FROM modules")
            .execute(&mut **tx)
            .await
            .context("Failed to clear modules")?;
        Ok(())
    }

    #[inline]
    pub async fn insert(
        tx: &mut Transaction<'_, Sqlite>,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64> {
        let id = sqlx::query("INSERT INTO modules (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(&mut **tx)
            .await
            .context("Failed to insert module")?
            .last_insert_rowid();
        Ok(id)
    }

    #[inline]
    pub async fn assign_file(
        tx: &mut Transaction<'_, Sqlite>,
        file_path: &str,
        module_id: i64,
        score: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_modules (file_path, module_id, score)
            VALUES (?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                module_id = excluded.module_id,
                score = excluded.score
            "#,
        )
        .bind(file_path)
        .bind(module_id)
        .bind(score)
        .execute(&mut **tx)
        .await
        .context("Failed to assign file to module")?;
        Ok(())
    }

    #[inline]
    pub async fn list(pool: &SqlitePool) -> Result<Vec<Module>> {
        sqlx::query_as::<_, Module>("SELECT id, name, description FROM modules ORDER BY id")
            .fetch_all(pool)
            .await
            .context("Failed to list modules")
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM modules")
            .fetch_one(pool)
            .await
            .context("Failed to count modules")
    }
}
