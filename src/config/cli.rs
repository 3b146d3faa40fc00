use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::types::JobStatus;

/// Command-line arguments for the jobdock binary.
#[derive(Debug, Parser)]
#[command(
    name = "jobdock",
    version,
    about = "Filesystem-backed build job tracker"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "JOBDOCK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve(Box<ServeArgs>),
    /// Print a job's status and record as JSON.
    Status(StatusArgs),
    /// List the job ids held in one status.
    List(ListArgs),
    /// Move a job from one status to the next.
    Transition(TransitionArgs),
    /// Block until a job reaches one of the given statuses.
    Wait(WaitArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the job records root.
    #[arg(long = "jobs-folder", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub jobs_folder: Option<PathBuf>,

    /// Override the decoded attachments root.
    #[arg(long = "sources-folder", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub sources_folder: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the static assets root served under /public.
    #[arg(long = "assets-folder", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub assets_folder: Option<PathBuf>,

    /// Override the maximum submission body size in bytes.
    #[arg(long = "max-request-bytes", value_name = "BYTES")]
    pub max_request_bytes: Option<u64>,

    /// Override the interval between status polls while waiting.
    #[arg(long = "watch-poll-interval-ms", value_name = "MILLIS")]
    pub watch_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Job identifier.
    #[arg(value_name = "ID")]
    pub id: String,
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Status whose jobs are listed.
    #[arg(long, value_name = "STATUS")]
    pub status: JobStatus,
}

#[derive(Debug, Args, Clone)]
pub struct TransitionArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Job identifier.
    #[arg(value_name = "ID")]
    pub id: String,

    /// Status the job is expected to be in.
    #[arg(long, value_name = "STATUS")]
    pub from: JobStatus,

    /// Status to move the job to.
    #[arg(long, value_name = "STATUS")]
    pub to: JobStatus,

    /// Record where the produced artifact was written.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub artifact: Option<PathBuf>,

    /// Record why the job failed.
    #[arg(long, value_name = "TEXT")]
    pub reason: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct WaitArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Job identifier.
    #[arg(value_name = "ID")]
    pub id: String,

    /// Give up after this many milliseconds; defaults to the configured maximum wait.
    #[arg(long = "timeout-ms", value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,

    /// Comma-separated statuses to wait for; defaults to completed,failed.
    #[arg(long = "for", value_name = "STATUS", value_delimiter = ',')]
    pub targets: Vec<JobStatus>,
}
