use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use trawl_index::{
    BuildSettings, ChunkRules, ChunkStore, DirectoryWorkspaces, GitCli, IndexBuilder,
};
use trawl_jobs::{BUSY_MESSAGE, JobCoordinator, JobError, Requester};
use trawl_llm::mock::MockEmbedder;
use trawl_llm::{Embedder, LlmError};
use trawl_memory::{InMemoryVectorStore, IndexJob, IndexMode, JobStatus, SqliteStore};

const POLL: Duration = Duration::from_millis(10);

async fn coordinator<E: Embedder + 'static>(base: &Path, embedder: Arc<E>) -> JobCoordinator<E> {
    let builder = IndexBuilder::new(
        embedder,
        ChunkStore::new(Arc::new(InMemoryVectorStore::new()), "jobs"),
        SqliteStore::new(":memory:").await.unwrap(),
        Arc::new(GitCli),
        Arc::new(DirectoryWorkspaces::new(base)),
        Arc::new(ChunkRules::default()),
        BuildSettings::default(),
    );
    JobCoordinator::new(Arc::new(builder))
}

fn write(base: &Path, workspace: &str, path: &str, content: &str) {
    let abs = base.join(workspace).join(path);
    std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
    std::fs::write(abs, content).unwrap();
}

async fn wait<E: Embedder + 'static>(c: &JobCoordinator<E>, job: &IndexJob) -> IndexJob {
    tokio::time::timeout(
        Duration::from_secs(10),
        c.wait_for_job(&Requester::admin("root"), &job.job_id, POLL),
    )
    .await
    .expect("job did not finish in time")
    .unwrap()
}

#[tokio::test]
async fn full_build_finishes_done() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "docs", "a.md", "alpha\n\nbeta");
    write(dir.path(), "docs", "src/lib.rs", "fn main() {}\n");
    let c = coordinator(dir.path(), Arc::new(MockEmbedder::new())).await;
    let alice = Requester::user("alice");

    let job = c.create_job(&alice, "docs", " FULL ").await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.mode, IndexMode::Full);
    assert_eq!(job.user_id, "alice");

    let done = wait(&c, &job).await;
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.error_message, None);
    assert_eq!(done.counters.total_files, 2);
    assert_eq!(done.counters.total_chunks, 3);
    assert_eq!(done.counters.processed_chunks, 3);
    assert_eq!(done.counters.percent, 100);
    assert!(!c.locks().is_busy("docs"));
}

#[tokio::test]
async fn invalid_mode_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let c = coordinator(dir.path(), Arc::new(MockEmbedder::new())).await;
    let admin = Requester::admin("root");

    for mode in ["rebuild", "", "retry_failed"] {
        let err = c.create_job(&admin, "docs", mode).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidMode(_)), "{mode}");
    }
    let page = c.list_jobs(&admin, None, None, 1, 50).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn second_job_on_busy_workspace_fails_immediately() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a", "b", "c"] {
        write(dir.path(), "docs", &format!("{name}.md"), "alpha");
    }
    write(dir.path(), "notes", "n.md", "note");
    let embedder = Arc::new(MockEmbedder::new().with_delay(200));
    let c = coordinator(dir.path(), embedder).await;
    let alice = Requester::user("alice");

    let first = c.create_job(&alice, "docs", "full").await.unwrap();
    let second = c.create_job(&alice, "docs", "incremental").await.unwrap();
    assert_eq!(second.status, JobStatus::Failed);
    assert_eq!(second.error_message.as_deref(), Some(BUSY_MESSAGE));

    // The rejected job leaves the running one alone: its counters keep moving.
    let progressed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let row = c.get_job(&alice, &first.job_id).await.unwrap();
            if row.counters.processed_chunks > 0 {
                return row;
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("first job made no progress");
    assert_eq!(progressed.status, JobStatus::Running);
    assert_eq!(progressed.counters.total_chunks, 3);
    assert!(progressed.counters.processed_chunks < 3);
    assert!(c.locks().is_busy("docs"));

    let elsewhere = c.create_job(&alice, "notes", "full").await.unwrap();
    assert_eq!(elsewhere.status, JobStatus::Running);

    assert_eq!(wait(&c, &first).await.status, JobStatus::Done);
    assert_eq!(wait(&c, &elsewhere).await.status, JobStatus::Done);

    let third = c.create_job(&alice, "docs", "incremental").await.unwrap();
    assert_eq!(third.status, JobStatus::Running);
    assert_eq!(wait(&c, &third).await.status, JobStatus::Done);
}

#[tokio::test]
async fn failures_are_recorded_and_retried() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        let body = if name == "c" { "POISON" } else { "healthy text" };
        write(dir.path(), "docs", &format!("{name}.md"), body);
    }
    let embedder = Arc::new(MockEmbedder::failing_on("POISON"));
    let c = coordinator(dir.path(), Arc::clone(&embedder)).await;
    let alice = Requester::user("alice");

    let job = c.create_job(&alice, "docs", "full").await.unwrap();
    let failed = wait(&c, &job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("index finished with failures: failed_chunks=1")
    );
    assert_eq!(failed.counters.processed_chunks, 4);
    assert_eq!(failed.counters.percent, 100);

    let failures = c.list_job_failures(&alice, &job.job_id, 1, 50).await.unwrap();
    assert_eq!(failures.total, 1);
    assert_eq!(failures.items[0].path, "c.md");

    embedder.clear_failures();
    let retry = c.retry_job_failures(&alice, &job.job_id).await.unwrap();
    assert_eq!(retry.mode, IndexMode::RetryFailed);
    assert_eq!(retry.source_job_id.as_deref(), Some(job.job_id.as_str()));
    let retried = wait(&c, &retry).await;
    assert_eq!(retried.status, JobStatus::Done);
    assert_eq!(retried.counters.total_files, 1);

    let left = c.list_job_failures(&alice, &job.job_id, 1, 50).await.unwrap();
    assert_eq!(left.total, 0);
    let err = c.retry_job_failures(&alice, &job.job_id).await.unwrap_err();
    assert!(matches!(err, JobError::NoFailures(_)));
    let err = c.retry_job_failures(&alice, &retry.job_id).await.unwrap_err();
    assert!(matches!(err, JobError::NotFailed { .. }));
}

#[tokio::test]
async fn retry_paths_are_validated_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "docs", "bad.md", "POISON");
    write(dir.path(), "docs", "good.md", "fine");
    let embedder = Arc::new(MockEmbedder::failing_on("POISON"));
    let c = coordinator(dir.path(), Arc::clone(&embedder)).await;
    let alice = Requester::user("alice");

    let job = c.create_job(&alice, "docs", "full").await.unwrap();
    wait(&c, &job).await;
    let before = c.list_jobs(&alice, None, None, 1, 50).await.unwrap().total;

    let err = c
        .retry_job_failure_paths(&alice, &job.job_id, &["bad.md".into(), "nope.md".into()])
        .await
        .unwrap_err();
    match err {
        JobError::InvalidRetryPaths { invalid, .. } => assert_eq!(invalid, vec!["nope.md"]),
        other => panic!("unexpected error: {other}"),
    }
    let err = c
        .retry_job_failure_paths(&alice, &job.job_id, &["  ".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::RetryPathsRequired));
    assert_eq!(
        c.list_jobs(&alice, None, None, 1, 50).await.unwrap().total,
        before
    );

    let many: Vec<String> = (0..30).map(|i| format!("missing-{i:02}.md")).collect();
    match c.retry_job_failure_paths(&alice, &job.job_id, &many).await {
        Err(JobError::InvalidRetryPaths { invalid, .. }) => assert_eq!(invalid.len(), 20),
        other => panic!("unexpected result: {other:?}"),
    }

    embedder.clear_failures();
    let retry = c
        .retry_job_failure_paths(&alice, &job.job_id, &[" bad.md ".into(), "bad.md".into()])
        .await
        .unwrap();
    let retried = wait(&c, &retry).await;
    assert_eq!(retried.status, JobStatus::Done);
    assert_eq!(retried.counters.total_files, 1);
}

#[tokio::test]
async fn access_is_limited_to_owner_and_admin() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "docs", "a.md", "alpha");
    let c = coordinator(dir.path(), Arc::new(MockEmbedder::new())).await;
    let alice = Requester::user("alice");
    let bob = Requester::user("bob");
    let admin = Requester::admin("root");

    let job = c.create_job(&alice, "docs", "full").await.unwrap();
    wait(&c, &job).await;

    assert!(c.get_job(&alice, &job.job_id).await.is_ok());
    assert!(c.get_job(&admin, &job.job_id).await.is_ok());
    assert!(matches!(
        c.get_job(&bob, &job.job_id).await,
        Err(JobError::Forbidden(_))
    ));
    assert!(matches!(
        c.list_job_failures(&bob, &job.job_id, 1, 10).await,
        Err(JobError::Forbidden(_))
    ));
    assert!(matches!(
        c.get_job(&alice, "no-such-job").await,
        Err(JobError::NotFound(_))
    ));

    assert_eq!(c.list_jobs(&bob, None, None, 1, 50).await.unwrap().total, 0);
    assert_eq!(c.list_jobs(&admin, None, None, 1, 50).await.unwrap().total, 1);
    let page = c
        .list_jobs(&alice, Some("docs"), Some(JobStatus::Done), 0, 10_000)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 200);
}

#[tokio::test]
async fn build_error_fails_job_and_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let c = coordinator(dir.path(), Arc::new(MockEmbedder::new())).await;
    let job = c
        .create_job(&Requester::user("alice"), "ghost", "full")
        .await
        .unwrap();
    let failed = wait(&c, &job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("ghost"));
    assert!(!c.locks().is_busy("ghost"));
}

struct ExplodingEmbedder;

impl Embedder for ExplodingEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        panic!("embedder exploded")
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "exploding"
    }
}

#[tokio::test]
async fn panicking_build_is_finalized_failed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "docs", "a.md", "alpha");
    let c = coordinator(dir.path(), Arc::new(ExplodingEmbedder)).await;

    let job = c
        .create_job(&Requester::user("alice"), "docs", "full")
        .await
        .unwrap();
    let failed = wait(&c, &job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let message = failed.error_message.unwrap();
    assert!(message.contains("panicked"), "{message}");
    assert!(message.contains("embedder exploded"), "{message}");
    assert!(!c.locks().is_busy("docs"));
}

#[tokio::test]
async fn retry_all_starts_one_retry_per_failed_job() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "docs", "a.md", "POISON");
    write(dir.path(), "notes", "n.md", "POISON");
    let embedder = Arc::new(MockEmbedder::failing_on("POISON"));
    let c = coordinator(dir.path(), Arc::clone(&embedder)).await;
    let alice = Requester::user("alice");

    let first = c.create_job(&alice, "docs", "full").await.unwrap();
    let second = c.create_job(&alice, "notes", "full").await.unwrap();
    wait(&c, &first).await;
    wait(&c, &second).await;

    embedder.clear_failures();
    let scoped = c.retry_all_failed_jobs(&alice, Some("notes")).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].workspace, "notes");
    assert_eq!(wait(&c, &scoped[0]).await.status, JobStatus::Done);

    let rest = c.retry_all_failed_jobs(&alice, None).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].source_job_id.as_deref(), Some(first.job_id.as_str()));
    assert_eq!(wait(&c, &rest[0]).await.status, JobStatus::Done);

    assert!(
        c.retry_all_failed_jobs(&Requester::user("bob"), None)
            .await
            .unwrap()
            .is_empty()
    );
}
