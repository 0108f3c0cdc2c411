mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use trawl_index::{BuildSettings, ChunkLimits, ChunkRules, SearchSettings};

pub const DEFAULT_CONFIG_PATH: &str = "trawl.toml";

const BATCH_SIZE_RANGE: (usize, usize) = (1, 512);
const MAX_FILE_BYTES_RANGE: (u64, u64) = (1024, 20 * 1024 * 1024);
const TOP_K_RANGE: (usize, usize) = (1, 50);

/// Priority: explicit path (`--config`) > `TRAWL_CONFIG` > `trawl.toml`.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("TRAWL_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn clamp_logged<T: Copy + PartialOrd + std::fmt::Display>(
    key: &str,
    value: T,
    (min, max): (T, T),
) -> T {
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if clamped != value {
        tracing::warn!("{key}={value} out of range {min}..={max}, using {clamped}");
    }
    clamped
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Clamp numeric settings into their supported ranges and reject
    /// combinations that cannot work.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero-sized window, an overlap not smaller than
    /// the window, an invalid boundary pattern, or an in-memory vector backend
    /// paired with a file-backed job database.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        self.embedding.batch_size = clamp_logged(
            "embedding.batch_size",
            self.embedding.batch_size,
            BATCH_SIZE_RANGE,
        );
        self.index.max_file_bytes = clamp_logged(
            "index.max_file_bytes",
            self.index.max_file_bytes,
            MAX_FILE_BYTES_RANGE,
        );
        self.search.default_top_k = clamp_logged(
            "search.default_top_k",
            self.search.default_top_k,
            TOP_K_RANGE,
        );

        let chunking = &self.index.chunking;
        if chunking.window_lines == 0 || chunking.text_max_lines == 0 {
            bail!("index.chunking line budgets must be positive");
        }
        if chunking.window_overlap >= chunking.window_lines {
            bail!(
                "index.chunking.window_overlap ({}) must be smaller than window_lines ({})",
                chunking.window_overlap,
                chunking.window_lines
            );
        }
        self.chunk_rules()?;

        if self.storage.vector_backend == VectorBackend::Memory
            && self.storage.sqlite_path != ":memory:"
        {
            bail!(
                "storage.vector_backend = \"memory\" loses vectors on exit while the commit \
                 pointer in {} persists; use sqlite_path = \":memory:\" or the qdrant backend",
                self.storage.sqlite_path
            );
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if a boundary pattern does not compile.
    pub fn chunk_rules(&self) -> anyhow::Result<ChunkRules> {
        let c = &self.index.chunking;
        let limits = ChunkLimits {
            text_max_lines: c.text_max_lines,
            code_max_segment: c.code_max_segment_lines,
            window: c.window_lines,
            overlap: c.window_overlap,
        };
        ChunkRules::new(
            &c.text_suffixes,
            &c.code_suffixes,
            &c.boundary_patterns,
            limits,
        )
        .context("invalid index.chunking.boundary_patterns")
    }

    #[must_use]
    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings {
            batch_size: self.embedding.batch_size,
            max_file_bytes: self.index.max_file_bytes,
        }
    }

    #[must_use]
    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            vector_enabled: self.search.vector_enabled,
            default_top_k: self.search.default_top_k,
        }
    }
}
