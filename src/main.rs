mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use trawl_core::config::{EmbeddingProvider, resolve_config_path};
use trawl_core::{App, Config, build_app, openai_embedder};
use trawl_index::SearchHit;
use trawl_jobs::Requester;
use trawl_llm::Embedder;
use trawl_memory::{IndexJob, JobStatus};

use crate::cli::{Cli, Command, JobsAction};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match config.embedding.provider {
        EmbeddingProvider::OpenAi => {
            let embedder = Arc::new(openai_embedder(&config.embedding));
            run(cli, build_app(config, embedder).await?).await
        }
        EmbeddingProvider::Mock => run_mock(cli, config).await,
    }
}

fn init_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(feature = "mock")]
async fn run_mock(cli: Cli, config: Config) -> anyhow::Result<()> {
    let embedder = Arc::new(trawl_llm::mock::MockEmbedder::new());
    run(cli, build_app(config, embedder).await?).await
}

#[cfg(not(feature = "mock"))]
async fn run_mock(_cli: Cli, _config: Config) -> anyhow::Result<()> {
    bail!("embedding.provider = \"mock\" requires a build with the `mock` feature")
}

async fn run<E: Embedder + 'static>(cli: Cli, app: App<E>) -> anyhow::Result<()> {
    let requester = if cli.admin {
        Requester::admin(cli.user)
    } else {
        Requester::user(cli.user)
    };

    match cli.command {
        Command::Index(args) => {
            let job = app
                .coordinator
                .create_job(&requester, &args.workspace, args.mode.as_str())
                .await?;
            let job = follow(&app, &requester, job).await?;
            print_json(&job)?;
            check_status(&job)
        }
        Command::Jobs { action } => match action {
            JobsAction::List {
                workspace,
                status,
                page,
                size,
            } => {
                let status = status
                    .as_deref()
                    .map(str::parse::<JobStatus>)
                    .transpose()
                    .context("--status must be running, done or failed")?;
                let page = app
                    .coordinator
                    .list_jobs(&requester, workspace.as_deref(), status, page, size)
                    .await?;
                print_json(&page)
            }
            JobsAction::Show { job_id } => {
                print_json(&app.coordinator.get_job(&requester, &job_id).await?)
            }
            JobsAction::Failures { job_id, page, size } => {
                let page = app
                    .coordinator
                    .list_job_failures(&requester, &job_id, page, size)
                    .await?;
                print_json(&page)
            }
        },
        Command::Retry(args) => {
            let job = if args.paths.is_empty() {
                app.coordinator
                    .retry_job_failures(&requester, &args.job_id)
                    .await?
            } else {
                app.coordinator
                    .retry_job_failure_paths(&requester, &args.job_id, &args.paths)
                    .await?
            };
            let job = follow(&app, &requester, job).await?;
            print_json(&job)?;
            check_status(&job)
        }
        Command::RetryAll(args) => {
            let started = app
                .coordinator
                .retry_all_failed_jobs(&requester, args.workspace.as_deref())
                .await?;
            let mut finished = Vec::with_capacity(started.len());
            for job in started {
                finished.push(follow(&app, &requester, job).await?);
            }
            print_json(&finished)
        }
        Command::Search(args) => {
            let hits = if args.hybrid {
                app.search
                    .hybrid_search(&args.workspace, &args.query, args.top_k)
                    .await?
            } else {
                app.search
                    .semantic_search(&args.workspace, &args.query, args.top_k)
                    .await?
            };
            if args.json {
                print_json(&hits)
            } else {
                print_hits(&hits);
                Ok(())
            }
        }
    }
}

/// Poll a started job until it finishes, reporting progress on stderr.
///
/// The worker lives inside this process, so waiting is the only way to let it
/// finish.
async fn follow<E: Embedder + 'static>(
    app: &App<E>,
    requester: &Requester,
    mut job: IndexJob,
) -> anyhow::Result<IndexJob> {
    let mut last_percent = None;
    while !job.status.is_terminal() {
        if last_percent != Some(job.counters.percent) {
            eprintln!(
                "[{:>3}%] {}: {}/{} chunks",
                job.counters.percent,
                job.workspace,
                job.counters.processed_chunks,
                job.counters.total_chunks
            );
            last_percent = Some(job.counters.percent);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        job = app.coordinator.get_job(requester, &job.job_id).await?;
    }
    Ok(job)
}

fn check_status(job: &IndexJob) -> anyhow::Result<()> {
    if job.status == JobStatus::Failed {
        bail!(
            "job {} failed: {}",
            job.job_id,
            job.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("no results");
        return;
    }
    for hit in hits {
        println!(
            "{:.4}  {}:{}-{}",
            hit.score, hit.path, hit.start_line, hit.end_line
        );
        for line in hit.snippet.lines().take(3) {
            println!("        {line}");
        }
    }
}
