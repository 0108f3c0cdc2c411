use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use trawl_index::rules::{DEFAULT_BOUNDARY_PATTERN, DEFAULT_CODE_SUFFIXES, DEFAULT_TEXT_SUFFIXES};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    OpenAi,
    /// Deterministic offline embedder, available with the `mock` feature.
    Mock,
}

fn default_batch_size() -> usize {
    32
}

fn default_embedding_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Texts per embedding request, clamped to 1..=512.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            base_url: None,
            model: None,
            api_key: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_workspaces_dir() -> PathBuf {
    PathBuf::from("workspaces")
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Each immediate subdirectory is one workspace.
    #[serde(default = "default_workspaces_dir")]
    pub workspaces_dir: PathBuf,
    /// Files above this size are recorded as failures, clamped to 1 KiB..=20 MiB.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: default_workspaces_dir(),
            max_file_bytes: default_max_file_bytes(),
            chunking: ChunkingConfig::default(),
        }
    }
}

fn default_text_suffixes() -> Vec<String> {
    DEFAULT_TEXT_SUFFIXES.iter().map(|s| (*s).to_owned()).collect()
}

fn default_code_suffixes() -> Vec<String> {
    DEFAULT_CODE_SUFFIXES.iter().map(|s| (*s).to_owned()).collect()
}

fn default_boundary_patterns() -> Vec<String> {
    vec![DEFAULT_BOUNDARY_PATTERN.to_owned()]
}

fn default_text_max_lines() -> usize {
    80
}

fn default_code_max_segment_lines() -> usize {
    180
}

fn default_window_lines() -> usize {
    120
}

fn default_window_overlap() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_text_suffixes")]
    pub text_suffixes: Vec<String>,
    #[serde(default = "default_code_suffixes")]
    pub code_suffixes: Vec<String>,
    /// A line matching any of these starts a new code segment.
    #[serde(default = "default_boundary_patterns")]
    pub boundary_patterns: Vec<String>,
    #[serde(default = "default_text_max_lines")]
    pub text_max_lines: usize,
    #[serde(default = "default_code_max_segment_lines")]
    pub code_max_segment_lines: usize,
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            text_suffixes: default_text_suffixes(),
            code_suffixes: default_code_suffixes(),
            boundary_patterns: default_boundary_patterns(),
            text_max_lines: default_text_max_lines(),
            code_max_segment_lines: default_code_max_segment_lines(),
            window_lines: default_window_lines(),
            window_overlap: default_window_overlap(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub vector_enabled: bool,
    /// Result count when a query does not specify one, clamped to 1..=50.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_enabled: true,
            default_top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Process-local store; contents vanish on exit.
    Memory,
    #[default]
    Qdrant,
}

fn default_sqlite_path() -> String {
    "data/trawl.db".into()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_collection() -> String {
    trawl_index::store::DEFAULT_COLLECTION.into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default)]
    pub vector_backend: VectorBackend,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            vector_backend: VectorBackend::default(),
            qdrant_url: default_qdrant_url(),
            collection: default_collection(),
        }
    }
}
