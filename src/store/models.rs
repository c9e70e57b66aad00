use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    pub path: String,
    pub mtime: f64,
    pub size_bytes: i64,
    pub content_hash: String,
}

/// A passage of one file, bounded by markdown headings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub id: i64,
    pub file_path: String,
    pub heading: Option<String>,
    pub ordinal: i64,
    pub content: String,
    pub content_len: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChunk {
    pub file_path: String,
    pub heading: Option<String>,
    pub ordinal: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EmbeddingRow {
    pub chunk_id: i64,
    pub model: String,
    pub dims: i64,
    pub vec: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Cluster {
    pub id: i64,
    pub method: String,
    pub k: i64,
    pub name: String,
    pub summary: Option<String>,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCluster {
    pub method: String,
    pub k: i64,
    pub name: String,
    pub summary: Option<String>,
    pub size: i64,
    pub centroid: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Module {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FileModule {
    pub file_path: String,
    pub module_id: i64,
    pub score: f64,
}

/// Aggregate counts reported by the status command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub files: i64,
    pub chunks: i64,
    pub embeddings: i64,
    pub embedding_models: Vec<(String, i64, i64)>,
    pub clusters: i64,
    pub modules: i64,
}

impl Chunk {
    /// Preview used by the wire surface: first 200 chars of the body with
    /// whitespace collapsed.
    #[inline]
    pub fn preview(&self) -> String {
        make_preview(&self.content)
    }
}

pub const PREVIEW_CHARS: usize = 200;

#[inline]
pub fn make_preview(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_collapses_whitespace() {
        assert_eq!(make_preview("a\n\n  b\tc"), "a b c");
    }

    #[test]
    fn preview_truncates_at_char_boundary() {
        let long = "汉".repeat(300);
        let preview = make_preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn chunk_preview_uses_content() {
        let chunk = Chunk {
            id: 1,
            file_path: "a.md".to_string(),
            heading: None,
            ordinal: 0,
            content: "some   spaced\ntext".to_string(),
            content_len: 18,
        };
        assert_eq!(chunk.preview(), "some spaced text");
    }
}
