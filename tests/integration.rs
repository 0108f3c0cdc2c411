use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use trawl_core::config::VectorBackend;
use trawl_core::{App, Config, build_app};
use trawl_jobs::Requester;
use trawl_llm::mock::MockEmbedder;
use trawl_memory::JobStatus;

const POLL: Duration = Duration::from_millis(10);

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["-c", "user.name=trawl", "-c", "user.email=trawl@example.com"])
        .args(args)
        .output()
        .unwrap();
    assert!(
        status.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&status.stderr)
    );
}

fn head(root: &Path) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["rev-parse", "HEAD"])
        .output()
        .unwrap();
    String::from_utf8(out.stdout).unwrap().trim().to_owned()
}

async fn offline_app(workspaces: &Path, embedder: MockEmbedder) -> App<MockEmbedder> {
    let mut config = Config::default();
    config.index.workspaces_dir = workspaces.to_path_buf();
    config.storage.sqlite_path = ":memory:".into();
    config.storage.vector_backend = VectorBackend::Memory;
    build_app(config, Arc::new(embedder)).await.unwrap()
}

async fn index(app: &App<MockEmbedder>, who: &Requester, ws: &str, mode: &str) -> trawl_memory::IndexJob {
    let job = app.coordinator.create_job(who, ws, mode).await.unwrap();
    app.coordinator
        .wait_for_job(who, &job.job_id, POLL)
        .await
        .unwrap()
}

async fn paths_for(app: &App<MockEmbedder>, ws: &str, query: &str) -> Vec<String> {
    app.search
        .semantic_search(ws, query, Some(20))
        .await
        .unwrap()
        .into_iter()
        .map(|hit| hit.path)
        .collect()
}

#[tokio::test]
async fn git_workspace_full_then_incremental() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(repo.join("src")).unwrap();
    git(&repo, &["init", "-q"]);
    std::fs::write(repo.join("README.md"), "gamma ray burst notes").unwrap();
    std::fs::write(repo.join("old.md"), "obsolete quartz manual").unwrap();
    std::fs::write(
        repo.join("src/lib.rs"),
        "fn parse_header() {\n    decode();\n}\n",
    )
    .unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "initial"]);
    let first = head(&repo);

    let app = offline_app(dir.path(), MockEmbedder::new()).await;
    let alice = Requester::user("alice");

    let job = index(&app, &alice, "proj", "full").await;
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error_message);
    assert_eq!(job.counters.total_files, 3);
    assert_eq!(job.counters.percent, 100);
    assert_eq!(
        app.builder.db().last_indexed_commit("proj").await.unwrap(),
        Some(first.clone())
    );
    assert!(paths_for(&app, "proj", "quartz manual").await.contains(&"old.md".to_owned()));

    std::fs::remove_file(repo.join("old.md")).unwrap();
    std::fs::write(repo.join("new.md"), "fresh silicon wafer guide").unwrap();
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-q", "-m", "rotate docs"]);
    let second = head(&repo);
    assert_ne!(first, second);

    let job = index(&app, &alice, "proj", "incremental").await;
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error_message);
    assert_eq!(
        app.builder.db().last_indexed_commit("proj").await.unwrap(),
        Some(second.clone())
    );

    let paths = paths_for(&app, "proj", "silicon wafer").await;
    assert!(paths.contains(&"new.md".to_owned()));
    assert!(!paths.contains(&"old.md".to_owned()));
    assert!(paths.contains(&"README.md".to_owned()));

    let hits = app
        .search
        .semantic_search("proj", "gamma ray burst notes", Some(1))
        .await
        .unwrap();
    assert_eq!(hits[0].path, "README.md");
    assert_eq!(hits[0].commit_sha, first);

    // Nothing changed since the last run: the job finishes without embedding.
    let job = index(&app, &alice, "proj", "incremental").await;
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.counters.total_chunks, 0);
    assert_eq!(job.counters.percent, 100);
}

#[tokio::test]
async fn plain_directory_failure_then_retry() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("notes");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join("ok.md"), "lighthouse keeper diary").unwrap();
    std::fs::write(ws.join("bad.md"), "POISON entry in the log").unwrap();

    let embedder = MockEmbedder::failing_on("POISON");
    let app = offline_app(dir.path(), embedder.clone()).await;
    let bob = Requester::user("bob");

    let job = index(&app, &bob, "notes", "full").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.counters.failed_chunks, 1);
    assert!(
        job.error_message
            .as_deref()
            .unwrap()
            .contains("failed_chunks=1")
    );

    let failures = app
        .coordinator
        .list_job_failures(&bob, &job.job_id, 1, 50)
        .await
        .unwrap();
    assert_eq!(failures.total, 1);
    assert_eq!(failures.items[0].path, "bad.md");

    embedder.clear_failures();
    let retry = app
        .coordinator
        .retry_job_failures(&bob, &job.job_id)
        .await
        .unwrap();
    let retry = app
        .coordinator
        .wait_for_job(&bob, &retry.job_id, POLL)
        .await
        .unwrap();
    assert_eq!(retry.status, JobStatus::Done);
    assert_eq!(retry.source_job_id.as_deref(), Some(job.job_id.as_str()));

    let remaining = app
        .coordinator
        .list_job_failures(&bob, &job.job_id, 1, 50)
        .await
        .unwrap();
    assert_eq!(remaining.total, 0);

    let hits = app
        .search
        .hybrid_search("notes", "POISON entry", Some(1))
        .await
        .unwrap();
    assert_eq!(hits[0].path, "bad.md");
    assert!(hits[0].commit_sha.starts_with("snapshot-"));

    let listed = app
        .coordinator
        .list_jobs(&bob, Some("notes"), None, 1, 10)
        .await
        .unwrap();
    assert_eq!(listed.total, 2);
    assert!(
        app.coordinator
            .list_jobs(&Requester::user("mallory"), None, None, 1, 10)
            .await
            .unwrap()
            .items
            .is_empty()
    );
}
