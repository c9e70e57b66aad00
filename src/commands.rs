use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Config;
use crate::embed::{backend_from_config, pack_vector, EmbeddingBackend};
use crate::ingest::Ingestor;
use crate::store::{Database, EmbeddingQueries, StoreError};
use crate::{KbError, Result};

async fn open_store(config: &Config) -> Result<Database> {
    let max_connections = (config.max_parallel_requests * 2).clamp(4, 64) as u32;
    Ok(Database::open(&config.db_path, max_connections).await?)
}

/// Scan the corpus and rebuild the passage index for changed files.
#[inline]
pub async fn build_index(config: Config) -> Result<()> {
    let database = open_store(&config).await?;
    let report = Ingestor::new(&config).run(&database).await?;

    println!("Build index finished.");
    println!("  Files scanned:  {}", report.files_seen);
    println!("  Files indexed:  {}", report.files_indexed);
    println!("  Files skipped:  {}", report.files_skipped);
    println!("  Files failed:   {}", report.files_failed);
    println!("  Chunks written: {}", report.chunks_inserted);
    println!("  Store: {}", config.db_path.display());
    Ok(())
}

/// Embed every chunk that lacks a vector under the configured model.
#[inline]
pub async fn build_embeddings(config: Config, batch_override: Option<usize>) -> Result<()> {
    let backend = backend_from_config(&config.embed)?
        .context("No embedder configured; set KB_EMBED_BACKEND to 'ollama' or 'openai'")?;
    let batch_size = batch_override.unwrap_or(config.embed.batch_size).max(1);

    let database = open_store(&config).await?;
    let written = embed_pending(&database, backend.as_ref(), batch_size).await?;

    println!("Build embeddings finished.");
    println!("  Model:   {}", backend.model_id());
    println!("  Vectors: {written}");
    Ok(())
}

/// The embed build body, reusable from tests: purges stale-model vectors,
/// then embeds pending chunks in id order inside one transaction.
pub async fn embed_pending(
    database: &Database,
    backend: &dyn EmbeddingBackend,
    batch_size: usize,
) -> Result<u64> {
    let _guard = database.begin_build()?;

    let model = backend.model_id().to_string();
    let pending = EmbeddingQueries::unembedded_chunks(database.pool(), &model)
        .await
        .map_err(StoreError::Query)?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(pending.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding chunks")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };

    let mut tx = database.begin_transaction().await.map_err(KbError::Store)?;
    let purged = EmbeddingQueries::purge_other_models(&mut tx, &model)
        .await
        .map_err(StoreError::Query)?;
    if purged > 0 {
        info!("purged {purged} embeddings from other models");
    }

    let mut written = 0u64;
    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|(_, content)| content.clone()).collect();
        let vectors = backend
            .embed_batch(&texts, crate::search::Deadline::unbounded().remaining())
            .map_err(KbError::Embed)?;

        for ((chunk_id, _), vector) in batch.iter().zip(vectors.iter()) {
            EmbeddingQueries::upsert(
                &mut tx,
                *chunk_id,
                &model,
                vector.len() as i64,
                &pack_vector(vector),
            )
            .await
            .map_err(StoreError::Query)?;
            written += 1;
        }
        bar.inc(batch.len() as u64);
    }

    tx.commit().await.map_err(StoreError::Db)?;
    bar.finish_and_clear();
    info!("embed build finished: {written} vectors under model {model}");
    Ok(written)
}

/// Partition embedded chunks into topic clusters.
#[inline]
pub async fn build_clusters(config: Config, k: Option<usize>) -> Result<()> {
    let database = open_store(&config).await?;

    let namer = cluster_namer(&config);
    let report = crate::cluster::build_clusters(
        &database,
        &config.embed.model,
        k,
        namer.as_deref(),
    )
    .await?;

    println!("Build clusters finished.");
    println!("  K:         {}", report.k);
    println!("  Clusters:  {}", report.clusters);
    println!("  Assigned:  {}", report.assigned);
    println!(
        "  Converged: {} ({} iterations)",
        report.converged, report.iterations
    );
    Ok(())
}

/// Assign files to coarse modules from their mean chunk embeddings.
#[inline]
pub async fn build_modules(config: Config) -> Result<()> {
    let database = open_store(&config).await?;
    let report = crate::cluster::build_modules(&database, &config.embed.model).await?;

    println!("Build modules finished.");
    println!("  Modules: {}", report.modules);
    println!("  Files:   {}", report.files);
    Ok(())
}

fn cluster_namer(config: &Config) -> Option<Box<dyn crate::cluster::ClusterNamer>> {
    let api_key = config.embed.api_key.clone()?;
    let namer = crate::cluster::OpenAiNamer::new(
        &config.embed.openai_url,
        api_key,
        "gpt-4o-mini".to_string(),
    )
    .ok()?;
    Some(Box::new(namer))
}

/// Start the read-only HTTP frontend.
#[inline]
pub async fn serve(config: Config) -> Result<()> {
    let embedder = backend_from_config(&config.embed)?;
    let database = open_store(&config).await?;
    let state = crate::api::AppState::new(config, database, embedder);
    crate::api::serve(state).await
}

/// Print store statistics.
#[inline]
pub async fn show_status(config: Config) -> Result<()> {
    let database = open_store(&config).await?;
    let stats = database.stats().await?;

    println!("Store: {}", config.db_path.display());
    println!("  Files:      {}", stats.files);
    println!("  Chunks:     {}", stats.chunks);
    println!("  Embeddings: {}", stats.embeddings);
    for (model, dims, count) in &stats.embedding_models {
        println!("    {model} ({dims} dims): {count}");
    }
    println!("  Clusters:   {}", stats.clusters);
    println!("  Modules:    {}", stats.modules);
    Ok(())
}
