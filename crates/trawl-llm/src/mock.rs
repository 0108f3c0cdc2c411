//! Deterministic embedder for tests and offline runs.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedder::Embedder;
use crate::error::LlmError;

/// Hashes bytes into a fixed number of buckets, so identical text always
/// yields the identical vector and texts sharing words land close together.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dims: usize,
    /// Any input containing one of these substrings makes the whole batch fail.
    fail_on: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
    /// Milliseconds to sleep before answering.
    pub delay_ms: u64,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dims: 16,
            fail_on: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay_ms: 0,
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_on(marker: impl Into<String>) -> Self {
        let embedder = Self::default();
        embedder.fail_when_contains(marker);
        embedder
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn fail_when_contains(&self, marker: impl Into<String>) {
        if let Ok(mut markers) = self.fail_on.lock() {
            markers.push(marker.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut markers) = self.fail_on.lock() {
            markers.clear();
        }
    }

    /// Number of `embed_batch` calls seen so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims.max(1)];
        let len = v.len();
        for word in text.split_whitespace() {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            v[hash % len] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let markers = self
            .fail_on
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();
        if let Some(marker) = markers
            .iter()
            .find(|m| texts.iter().any(|t| t.contains(m.as_str())))
        {
            return Err(LlmError::Other(format!("mock embedding failure on {marker}")));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
