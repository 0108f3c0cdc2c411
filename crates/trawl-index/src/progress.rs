//! Build progress events, emitted over a channel to whoever persists them.

use tokio::sync::mpsc;
use trawl_memory::JobCounters;

/// Snapshot of a build's counters after some unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub workspace: String,
    pub total_files: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub failed_chunks: u64,
    pub elapsed_ms: u64,
    pub message: String,
}

impl ProgressEvent {
    /// `processed * 100 / total`, clamped to 0..=100; 100 when there is nothing to do.
    #[must_use]
    pub fn percent(&self) -> u8 {
        percent(self.processed_chunks, self.total_chunks)
    }

    #[must_use]
    pub fn counters(&self) -> JobCounters {
        JobCounters {
            total_files: self.total_files,
            total_chunks: self.total_chunks,
            processed_chunks: self.processed_chunks,
            failed_chunks: self.failed_chunks,
            percent: self.percent(),
            elapsed_ms: self.elapsed_ms,
        }
    }
}

#[must_use]
pub fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = processed.saturating_mul(100) / total;
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Sending half handed to a build.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Emit an event. A closed receiver is not an error: the build keeps going.
    pub async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("progress receiver dropped");
        }
    }

    /// Sender whose events go nowhere.
    #[must_use]
    pub fn discard() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Create a bounded progress channel.
#[must_use]
pub fn channel(capacity: usize) -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx }, rx)
}
