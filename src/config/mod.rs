//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, ListArgs, ServeArgs, ServeOverrides, StatusArgs, StorageOverrides,
    TransitionArgs, WaitArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "jobdock";
const ENV_PREFIX: &str = "JOBDOCK";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_MAX_WAIT_MS: u64 = 30_000;
const DEFAULT_CORRUPTION_GRACE_MS: u64 = 500;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 25 * 1024 * 1024;
const DEFAULT_PENDING_REFRESH_SECS: u64 = 5;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub watcher: WatcherSettings,
    pub submissions: SubmissionSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Roots the service works in. There are deliberately no defaults for the two job roots.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub jobs_folder: PathBuf,
    pub sources_folder: PathBuf,
    pub assets_folder: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    /// Upper bound for any single wait, including `?wait=` on the HTTP surface.
    pub max_wait: Duration,
    pub corruption_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    pub max_request_bytes: NonZeroU64,
    pub pending_refresh: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_command_overrides(cli.command.as_ref());

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    watcher: RawWatcherSettings,
    submissions: RawSubmissionSettings,
}

impl RawSettings {
    fn apply_command_overrides(&mut self, command: Option<&Command>) {
        match command {
            Some(Command::Serve(args)) => self.apply_serve_overrides(&args.overrides),
            Some(Command::Status(args)) => self.apply_storage_overrides(&args.storage),
            Some(Command::List(args)) => self.apply_storage_overrides(&args.storage),
            Some(Command::Transition(args)) => self.apply_storage_overrides(&args.storage),
            Some(Command::Wait(args)) => self.apply_storage_overrides(&args.storage),
            None => self.apply_serve_overrides(&ServeOverrides::default()),
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_storage_overrides(&overrides.storage);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(folder) = overrides.assets_folder.as_ref() {
            self.storage.assets_folder = Some(folder.clone());
        }
        if let Some(limit) = overrides.max_request_bytes {
            self.submissions.max_request_bytes = Some(limit);
        }
        if let Some(interval) = overrides.watch_poll_interval_ms {
            self.watcher.poll_interval_ms = Some(interval);
        }
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(folder) = overrides.jobs_folder.as_ref() {
            self.storage.jobs_folder = Some(folder.clone());
        }
        if let Some(folder) = overrides.sources_folder.as_ref() {
            self.storage.sources_folder = Some(folder.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            watcher,
            submissions,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            watcher: build_watcher_settings(watcher)?,
            submissions: build_submission_settings(submissions)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.host", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let jobs_folder = required_path(storage.jobs_folder, "storage.jobs_folder")?;
    let sources_folder = required_path(storage.sources_folder, "storage.sources_folder")?;
    if jobs_folder == sources_folder {
        return Err(LoadError::invalid(
            "storage.sources_folder",
            "must differ from storage.jobs_folder",
        ));
    }

    let assets_folder = storage
        .assets_folder
        .filter(|path| !path.as_os_str().is_empty());

    Ok(StorageSettings {
        jobs_folder,
        sources_folder,
        assets_folder,
    })
}

fn required_path(value: Option<PathBuf>, key: &'static str) -> Result<PathBuf, LoadError> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        Some(_) => Err(LoadError::invalid(key, "path must not be empty")),
        None => Err(LoadError::invalid(key, "is required")),
    }
}

fn build_watcher_settings(watcher: RawWatcherSettings) -> Result<WatcherSettings, LoadError> {
    let poll_ms = watcher.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if poll_ms == 0 {
        return Err(LoadError::invalid(
            "watcher.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    let max_wait_ms = watcher.max_wait_ms.unwrap_or(DEFAULT_MAX_WAIT_MS);
    if max_wait_ms == 0 {
        return Err(LoadError::invalid(
            "watcher.max_wait_ms",
            "must be greater than zero",
        ));
    }

    let grace_ms = watcher
        .corruption_grace_ms
        .unwrap_or(DEFAULT_CORRUPTION_GRACE_MS);

    Ok(WatcherSettings {
        poll_interval: Duration::from_millis(poll_ms),
        max_wait: Duration::from_millis(max_wait_ms),
        corruption_grace: Duration::from_millis(grace_ms),
    })
}

fn build_submission_settings(
    submissions: RawSubmissionSettings,
) -> Result<SubmissionSettings, LoadError> {
    let max_request_bytes_value = submissions
        .max_request_bytes
        .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("submissions.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "submissions.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let refresh_secs = submissions
        .pending_refresh_seconds
        .unwrap_or(DEFAULT_PENDING_REFRESH_SECS);
    if refresh_secs == 0 {
        return Err(LoadError::invalid(
            "submissions.pending_refresh_seconds",
            "must be greater than zero",
        ));
    }

    Ok(SubmissionSettings {
        max_request_bytes,
        pending_refresh: Duration::from_secs(refresh_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    jobs_folder: Option<PathBuf>,
    sources_folder: Option<PathBuf>,
    assets_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWatcherSettings {
    poll_interval_ms: Option<u64>,
    max_wait_ms: Option<u64>,
    corruption_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSubmissionSettings {
    max_request_bytes: Option<u64>,
    pending_refresh_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
