use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "trawl",
    version,
    about = "Incremental semantic indexing and hybrid search over workspace trees"
)]
pub struct Cli {
    /// Config file (default: $TRAWL_CONFIG or ./trawl.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// User id recorded as job owner
    #[arg(long, global = true, default_value = "local")]
    pub user: String,

    /// Act as administrator: see and retry every user's jobs
    #[arg(long, global = true)]
    pub admin: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build or update the index of a workspace and wait for the job
    Index(IndexArgs),
    /// Inspect index jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
    /// Retry the failed paths of a job
    Retry(RetryArgs),
    /// Retry every failed job
    RetryAll(RetryAllArgs),
    /// Search an indexed workspace
    Search(SearchArgs),
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ModeArg {
    Full,
    #[default]
    Incremental,
}

impl ModeArg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Workspace name (a directory under `index.workspaces_dir`)
    pub workspace: String,
    #[arg(long, value_enum, default_value_t = ModeArg::Incremental)]
    pub mode: ModeArg,
}

#[derive(Debug, Subcommand)]
pub enum JobsAction {
    /// List jobs, most recently updated first
    List {
        #[arg(long)]
        workspace: Option<String>,
        /// running, done or failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        size: u32,
    },
    /// Show one job
    Show { job_id: String },
    /// List the failure ledger of a job
    Failures {
        job_id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        size: u32,
    },
}

#[derive(Debug, Args)]
pub struct RetryArgs {
    /// Failed job whose ledger is retried
    pub job_id: String,
    /// Retry only these paths (repeatable); default is every failed path
    #[arg(long = "path")]
    pub paths: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RetryAllArgs {
    #[arg(long)]
    pub workspace: Option<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    pub workspace: String,
    pub query: String,
    #[arg(long)]
    pub top_k: Option<usize>,
    /// Blend keyword overlap into the vector score
    #[arg(long)]
    pub hybrid: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
