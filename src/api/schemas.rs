use serde::{Deserialize, Serialize};

use crate::search::HybridHit;
use crate::store::Chunk;
use crate::suggest::{ClusterSuggestion, RelatedItem, RelatedNote};

fn default_limit() -> usize {
    10
}

fn default_limit_i64() -> i64 {
    10
}

fn default_fts_k() -> i64 {
    crate::search::lexical::DEFAULT_FTS_K
}

fn default_related_k() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_fts_k")]
    pub fts_k: i64,
    /// Optional module filter.
    pub module_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub mode: &'static str,
    pub total: Option<usize>,
    pub items: Vec<HybridHit>,
}

#[derive(Debug, Serialize)]
pub struct ChunkOut {
    pub id: i64,
    pub file_path: String,
    pub heading: Option<String>,
    pub ordinal: i64,
    pub content: String,
}

impl From<Chunk> for ChunkOut {
    fn from(chunk: Chunk) -> Self {
        Self {
            id: chunk.id,
            file_path: chunk.file_path,
            heading: chunk.heading,
            ordinal: chunk.ordinal,
            content: chunk.content,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FileChunksParams {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct RelatedParams {
    /// "cluster" or "embed".
    pub mode: Option<String>,
    #[serde(default = "default_related_k")]
    pub k: usize,
}

#[derive(Debug, Serialize)]
pub struct RelatedNotesResponse {
    pub mode: String,
    pub items: Vec<RelatedNote>,
}

pub type RelatedResponse = Vec<RelatedItem>;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    #[serde(default = "default_limit_i64")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_fts_k")]
    pub fts_k: i64,
}

#[derive(Debug, Serialize)]
pub struct ClusterListItem {
    pub id: i64,
    pub name: String,
    pub size: i64,
    pub method: String,
    pub k: i64,
}

#[derive(Debug, Serialize)]
pub struct ClusterMeta {
    pub id: i64,
    pub name: String,
    pub summary: Option<String>,
    pub size: i64,
}

#[derive(Debug, Serialize)]
pub struct ClusterMember {
    pub chunk_id: i64,
    pub file_path: String,
    pub heading: Option<String>,
    pub preview: String,
}

#[derive(Debug, Serialize)]
pub struct ClusterDetail {
    pub meta: ClusterMeta,
    pub members: Vec<ClusterMember>,
}

pub type SuggestResponse = Vec<ClusterSuggestion>;
