use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_PROVIDER") {
            if let Ok(provider) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = provider;
            } else {
                tracing::warn!("ignoring invalid TRAWL_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.batch_size = n;
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.embedding.timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("TRAWL_WORKSPACES_DIR") {
            self.index.workspaces_dir = v.into();
        }
        if let Ok(v) = std::env::var("TRAWL_INDEX_MAX_FILE_BYTES")
            && let Ok(n) = v.parse::<u64>()
        {
            self.index.max_file_bytes = n;
        }
        if let Ok(v) = std::env::var("TRAWL_SEARCH_VECTOR_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.search.vector_enabled = enabled;
        }
        if let Ok(v) = std::env::var("TRAWL_SEARCH_DEFAULT_TOP_K")
            && let Ok(n) = v.parse::<usize>()
        {
            self.search.default_top_k = n;
        }
        if let Ok(v) = std::env::var("TRAWL_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("TRAWL_VECTOR_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.storage.vector_backend = backend;
            } else {
                tracing::warn!("ignoring invalid TRAWL_VECTOR_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("TRAWL_QDRANT_URL") {
            self.storage.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("TRAWL_COLLECTION") {
            self.storage.collection = v;
        }
    }
}
