use super::parser::{parse_sections, Section};
use super::*;
use crate::store::open_test_database;
use anyhow::Result;
use tempfile::TempDir;

fn test_ingestor(root: &Path) -> Ingestor {
    Ingestor::new(&Config::default()).with_root(root)
}

use crate::config::Config;

#[test]
fn headingless_file_is_single_section() {
    let sections = parse_sections("just some text\nwith two lines\n");
    assert_eq!(
        sections,
        vec![Section {
            heading: None,
            body: "just some text\nwith two lines".to_string(),
        }]
    );
}

#[test]
fn atx_headings_bound_sections() {
    let text = "# First\n\nalpha\n\n## Second\n\nbeta\ngamma\n";
    let sections = parse_sections(text);
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].heading.as_deref(), Some("First"));
    assert_eq!(sections[0].body, "alpha");
    assert_eq!(sections[1].heading.as_deref(), Some("Second"));
    assert_eq!(sections[1].body, "beta\ngamma");
}

#[test]
fn heading_inside_code_fence_is_content() {
    let text = "# Shell\n\n```sh\n# not a heading\necho hi\n```\n";
    let sections = parse_sections(text);
    assert_eq!(sections.len(), 1);
    assert!(sections[0].body.contains("# not a heading"));
}

#[test]
fn setext_heading_is_not_a_boundary() {
    let text = "# Top\n\nIntro\n\nUnderlined\n---\n\ntail\n";
    let sections = parse_sections(text);
    assert_eq!(sections.len(), 1);
    assert!(sections[0].body.contains("Underlined"));
    assert!(sections[0].body.contains("tail"));
}

#[test]
fn preamble_before_first_heading_is_dropped() {
    let text = "loose preamble\n\n# Real\n\nbody\n";
    let sections = parse_sections(text);
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].heading.as_deref(), Some("Real"));
    assert_eq!(sections[0].body, "body");
}

#[test]
fn empty_bodies_are_reported_empty() {
    let text = "# Empty\n\n# Full\n\ncontent\n";
    let sections = parse_sections(text);
    assert_eq!(sections.len(), 2);
    assert!(sections[0].body.is_empty());
    assert_eq!(sections[1].body, "content");
}

#[test]
fn empty_file_yields_nothing() {
    assert!(parse_sections("").is_empty());
    assert!(parse_sections("   \n\n").is_empty());
}

#[test]
fn heading_text_is_trimmed() {
    let sections = parse_sections("#   Spaced Out   \n\nbody\n");
    assert_eq!(sections[0].heading.as_deref(), Some("Spaced Out"));
}

#[tokio::test]
async fn ingest_assigns_dense_ordinals() -> Result<()> {
    let (_store_dir, database) = open_test_database().await?;
    let corpus = TempDir::new()?;
    std::fs::write(
        corpus.path().join("notes.md"),
        "# A\n\none\n\n# B\n\n# C\n\nthree\n",
    )?;

    let report = test_ingestor(corpus.path()).run(&database).await?;
    assert_eq!(report.files_indexed, 1);
    // The empty section under B is dropped; ordinals stay dense.
    assert_eq!(report.chunks_inserted, 2);

    let chunks = ChunkQueries::list_by_file(database.pool(), "notes.md").await?;
    let ordinals: Vec<i64> = chunks.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1]);
    assert_eq!(chunks[0].heading.as_deref(), Some("A"));
    assert_eq!(chunks[1].heading.as_deref(), Some("C"));

    Ok(())
}

#[tokio::test]
async fn unchanged_file_is_skipped_and_ids_stable() -> Result<()> {
    let (_store_dir, database) = open_test_database().await?;
    let corpus = TempDir::new()?;
    std::fs::write(corpus.path().join("a.md"), "# T\n\nbody\n")?;

    let ingestor = test_ingestor(corpus.path());
    ingestor.run(&database).await?;
    let first = ChunkQueries::list_by_file(database.pool(), "a.md").await?;

    let report = ingestor.run(&database).await?;
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.files_indexed, 0);

    let second = ChunkQueries::list_by_file(database.pool(), "a.md").await?;
    assert_eq!(first, second);

    Ok(())
}

#[tokio::test]
async fn changed_file_replaces_chunks_and_embeddings() -> Result<()> {
    let (_store_dir, database) = open_test_database().await?;
    let corpus = TempDir::new()?;
    std::fs::write(corpus.path().join("a.md"), "# T\n\nold body\n")?;

    let ingestor = test_ingestor(corpus.path());
    ingestor.run(&database).await?;
    let old = ChunkQueries::list_by_file(database.pool(), "a.md").await?;

    let mut tx = database.begin_transaction().await?;
    crate::store::EmbeddingQueries::upsert(&mut tx, old[0].id, "m", 1, &[0, 0, 128, 63]).await?;
    tx.commit().await?;

    std::fs::write(corpus.path().join("a.md"), "# T\n\nnew body\n")?;
    let report = ingestor.run(&database).await?;
    assert_eq!(report.files_indexed, 1);

    let new = ChunkQueries::list_by_file(database.pool(), "a.md").await?;
    assert_ne!(old[0].id, new[0].id, "chunk ids are never reused");
    assert!(
        crate::store::EmbeddingQueries::get(database.pool(), old[0].id)
            .await?
            .is_none(),
        "stale embedding dropped with its chunk"
    );

    Ok(())
}

#[tokio::test]
async fn non_markdown_and_hidden_files_ignored() -> Result<()> {
    let (_store_dir, database) = open_test_database().await?;
    let corpus = TempDir::new()?;
    std::fs::write(corpus.path().join("keep.md"), "# K\n\nbody\n")?;
    std::fs::write(corpus.path().join("skip.txt"), "plain text")?;
    std::fs::create_dir(corpus.path().join(".hidden"))?;
    std::fs::write(corpus.path().join(".hidden/inner.md"), "# H\n\nbody\n")?;
    std::fs::write(corpus.path().join(".dotfile.md"), "# D\n\nbody\n")?;

    let report = test_ingestor(corpus.path()).run(&database).await?;
    assert_eq!(report.files_seen, 1);
    assert_eq!(FileQueries::count(database.pool()).await?, 1);

    Ok(())
}

#[tokio::test]
async fn invalid_utf8_skipped_unless_strict() -> Result<()> {
    let (_store_dir, database) = open_test_database().await?;
    let corpus = TempDir::new()?;
    std::fs::write(corpus.path().join("bad.md"), [0xff, 0xfe, 0x00])?;
    std::fs::write(corpus.path().join("good.md"), "# G\n\nbody\n")?;

    let report = test_ingestor(corpus.path()).run(&database).await?;
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_skipped, 1);

    let mut config = Config::default();
    config.strict_decode = true;
    let strict = Ingestor::new(&config).with_root(corpus.path());
    let report = strict.run(&database).await?;
    assert_eq!(report.files_failed, 1);

    Ok(())
}

#[tokio::test]
async fn nested_paths_use_forward_slashes() -> Result<()> {
    let (_store_dir, database) = open_test_database().await?;
    let corpus = TempDir::new()?;
    std::fs::create_dir_all(corpus.path().join("dir/sub"))?;
    std::fs::write(corpus.path().join("dir/sub/deep.md"), "# D\n\nbody\n")?;

    test_ingestor(corpus.path()).run(&database).await?;
    let paths = FileQueries::list_paths(database.pool()).await?;
    assert_eq!(paths, vec!["dir/sub/deep.md".to_string()]);

    Ok(())
}
