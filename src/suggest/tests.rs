use super::*;
use crate::embed::{l2_normalize, pack_vector};
use crate::store::{
    open_test_database, Database, EmbeddingQueries, FileQueries, NewChunk, NewCluster,
};
use anyhow::Result;

const MODEL: &str = "test-model";

/// Seed files with one chunk per (heading, vector) pair; returns chunk ids
/// per file in insertion order.
async fn seed(
    database: &Database,
    files: &[(&str, Vec<(&str, Vec<f32>)>)],
) -> Result<Vec<Vec<i64>>> {
    let mut ids = Vec::new();

    for (path, chunks) in files {
        let mut tx = database.begin_transaction().await?;
        FileQueries::upsert(&mut tx, path, 0.0, 1, &format!("h-{path}")).await?;
        let rows: Vec<NewChunk> = chunks
            .iter()
            .enumerate()
            .map(|(i, (heading, _))| NewChunk {
                file_path: path.to_string(),
                heading: Some(heading.to_string()),
                ordinal: i as i64,
                content: format!("{heading} body text"),
            })
            .collect();
        crate::store::ChunkQueries::insert_many(&mut tx, &rows).await?;
        tx.commit().await?;

        let stored = crate::store::ChunkQueries::list_by_file(database.pool(), path).await?;
        let mut tx = database.begin_transaction().await?;
        for (chunk, (_, vec)) in stored.iter().zip(chunks.iter()) {
            let mut v = vec.clone();
            l2_normalize(&mut v);
            EmbeddingQueries::upsert(&mut tx, chunk.id, MODEL, v.len() as i64, &pack_vector(&v))
                .await?;
        }
        tx.commit().await?;
        ids.push(stored.iter().map(|c| c.id).collect());
    }

    Ok(ids)
}

async fn recommender(database: &Database) -> Result<Recommender> {
    let cache = Arc::new(MatrixCache::empty());
    cache.reload(database.pool(), MODEL).await?;
    Ok(Recommender::new(database.pool().clone(), cache))
}

async fn put_in_cluster(database: &Database, name: &str, chunk_ids: &[i64]) -> Result<i64> {
    let mut tx = database.begin_transaction().await?;
    let id = crate::store::ClusterQueries::insert(
        &mut tx,
        &NewCluster {
            method: "kmeans".to_string(),
            k: 2,
            name: name.to_string(),
            summary: None,
            size: chunk_ids.len() as i64,
            centroid: None,
        },
    )
    .await?;
    crate::store::ClusterQueries::insert_members(&mut tx, id, chunk_ids).await?;
    tx.commit().await?;
    Ok(id)
}

fn vectors_around(base: [f32; 3], n: usize) -> Vec<(&'static str, Vec<f32>)> {
    let headings = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
    (0..n)
        .map(|i| {
            let mut v = base.to_vec();
            v[1] += 0.01 * i as f32;
            (headings[i], v)
        })
        .collect()
}

#[tokio::test]
async fn related_never_contains_self() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let ids = seed(&database, &[("a.md", vectors_around([1.0, 0.0, 0.0], 4))]).await?;
    put_in_cluster(&database, "topic", &ids[0]).await?;
    let rec = recommender(&database).await?;

    for mode in [RelatedMode::Cluster, RelatedMode::Embed] {
        let related = rec
            .related(ids[0][0], mode, 100, Deadline::unbounded())
            .await?;
        assert!(!related.iter().any(|r| r.chunk_id == ids[0][0]));
        assert_eq!(related.len(), 3);
    }

    Ok(())
}

#[tokio::test]
async fn cluster_mode_returns_members_by_cosine() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let ids = seed(
        &database,
        &[
            ("a.md", vectors_around([1.0, 0.0, 0.0], 5)),
            ("b.md", vec![("unrelated", vec![0.0, 0.0, 1.0])]),
        ],
    )
    .await?;
    put_in_cluster(&database, "fives", &ids[0]).await?;
    put_in_cluster(&database, "single", &ids[1]).await?;
    let rec = recommender(&database).await?;

    let related = rec
        .related(ids[0][0], RelatedMode::Cluster, 10, Deadline::unbounded())
        .await?;

    assert_eq!(related.len(), 4, "the other four members");
    assert!(related.iter().all(|r| r.reason == Reason::SameTopic));
    assert!(!related.iter().any(|r| r.chunk_id == ids[1][0]));
    // Ordered by cosine to the input: the nearest sibling first.
    assert_eq!(related[0].chunk_id, ids[0][1]);
    for pair in related.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    Ok(())
}

#[tokio::test]
async fn embed_mode_is_knn_with_semantic_reason() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let ids = seed(
        &database,
        &[
            ("a.md", vec![("query", vec![1.0, 0.0, 0.0])]),
            ("b.md", vec![("close", vec![0.95, 0.3, 0.0])]),
            ("c.md", vec![("far", vec![0.0, 1.0, 0.0])]),
            ("d.md", vec![("opposite", vec![-1.0, 0.0, 0.0])]),
        ],
    )
    .await?;
    let rec = recommender(&database).await?;

    let related = rec
        .related(ids[0][0], RelatedMode::Embed, 2, Deadline::unbounded())
        .await?;

    assert_eq!(related.len(), 2);
    assert_eq!(related[0].chunk_id, ids[1][0]);
    assert!(related.iter().all(|r| r.reason == Reason::SemanticSimilarity));
    assert!(related.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    // The negative-cosine neighbor is dropped: two positives exist.
    assert!(!related.iter().any(|r| r.chunk_id == ids[3][0]));

    Ok(())
}

#[tokio::test]
async fn embed_mode_backfills_when_positives_are_scarce() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let ids = seed(
        &database,
        &[
            ("a.md", vec![("query", vec![1.0, 0.0, 0.0])]),
            ("b.md", vec![("opposite", vec![-1.0, 0.0, 0.0])]),
        ],
    )
    .await?;
    let rec = recommender(&database).await?;

    let related = rec
        .related(ids[0][0], RelatedMode::Embed, 2, Deadline::unbounded())
        .await?;

    // Fewer than k positives: the negative neighbor is kept at score 0.
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].chunk_id, ids[1][0]);
    assert_eq!(related[0].score, 0.0);

    Ok(())
}

#[tokio::test]
async fn single_passage_corpus_has_no_relations() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let ids = seed(&database, &[("a.md", vec![("only", vec![1.0, 0.0, 0.0])])]).await?;
    put_in_cluster(&database, "solo", &ids[0]).await?;
    let rec = recommender(&database).await?;

    for mode in [RelatedMode::Cluster, RelatedMode::Embed] {
        let related = rec.related(ids[0][0], mode, 5, Deadline::unbounded()).await?;
        assert!(related.is_empty());
    }

    Ok(())
}

#[tokio::test]
async fn related_notes_groups_by_file_with_max_score() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    // x: 6 close chunks, y: 3 medium, z: 1 distant.
    let mut x_chunks = vectors_around([1.0, 0.0, 0.0], 6);
    x_chunks.truncate(6);
    let ids = seed(
        &database,
        &[
            ("q.md", vec![("query", vec![1.0, 0.0, 0.0])]),
            ("x.md", x_chunks),
            ("y.md", vectors_around([0.8, 0.6, 0.0], 3)),
            ("z.md", vec![("lonely", vec![0.3, 0.0, 0.95])]),
        ],
    )
    .await?;
    let rec = recommender(&database).await?;

    let notes = rec
        .related_notes(ids[0][0], RelatedMode::Embed, 2, Deadline::unbounded())
        .await?;

    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].file_path, "x.md");
    assert_eq!(notes[0].matched_chunks, 6);
    assert_eq!(notes[1].file_path, "y.md");
    assert_eq!(notes[1].matched_chunks, 3);
    assert!(notes[0].top_chunk_ids.len() <= 5);
    assert!(notes.iter().all(|n| n.reason == Reason::SemanticSimilarity));

    Ok(())
}

#[tokio::test]
async fn expired_deadline_cancels_embed_mode() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let ids = seed(
        &database,
        &[
            ("a.md", vec![("query", vec![1.0, 0.0, 0.0])]),
            ("b.md", vec![("other", vec![0.0, 1.0, 0.0])]),
        ],
    )
    .await?;
    let rec = recommender(&database).await?;

    let deadline = Deadline::after(std::time::Duration::from_millis(0));
    std::thread::sleep(std::time::Duration::from_millis(2));
    let result = rec
        .related(ids[0][0], RelatedMode::Embed, 5, deadline)
        .await;
    assert!(matches!(result, Err(SearchError::Cancelled)));

    Ok(())
}

#[tokio::test]
async fn suggest_clusters_votes_by_membership() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let ids = seed(
        &database,
        &[
            (
                "graphs.md",
                vec![
                    ("graph traversal", vec![1.0, 0.0, 0.0]),
                    ("graph coloring", vec![0.99, 0.05, 0.0]),
                ],
            ),
            ("tcp.md", vec![("graph of tcp states", vec![0.0, 1.0, 0.0])]),
        ],
    )
    .await?;
    let graph_cluster = put_in_cluster(
        &database,
        "graphs",
        &[ids[0][0], ids[0][1]],
    )
    .await?;
    let net_cluster = put_in_cluster(&database, "networking", &ids[1]).await?;

    let searcher = crate::search::HybridSearcher::new(
        database.pool().clone(),
        Arc::new(MatrixCache::empty()),
        None,
        1,
    );
    let suggestions = suggest_clusters(
        database.pool(),
        &searcher,
        "graph",
        5,
        50,
        Deadline::unbounded(),
    )
    .await?;

    assert_eq!(suggestions.len(), 2);
    // The two-member cluster outranks the single-member one.
    assert_eq!(suggestions[0].cluster_id, graph_cluster);
    assert_eq!(suggestions[0].name, "graphs");
    assert!((suggestions[0].score - 1.0).abs() < 1e-9);
    assert_eq!(suggestions[1].cluster_id, net_cluster);
    assert!(suggestions[1].score <= 1.0);

    Ok(())
}

#[tokio::test]
async fn suggest_clusters_empty_without_matches() -> Result<()> {
    let (_dir, database) = open_test_database().await?;
    let searcher = crate::search::HybridSearcher::new(
        database.pool().clone(),
        Arc::new(MatrixCache::empty()),
        None,
        1,
    );

    let suggestions = suggest_clusters(
        database.pool(),
        &searcher,
        "anything",
        5,
        50,
        Deadline::unbounded(),
    )
    .await?;
    assert!(suggestions.is_empty());

    Ok(())
}
