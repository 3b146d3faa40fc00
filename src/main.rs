use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use jobdock::{
    application::{
        error::AppError,
        lifecycle::{JobService, LifecycleOptions},
        watcher::{WatchOptions, WatchOutcome},
    },
    config::{self, ListArgs, StatusArgs, TransitionArgs, WaitArgs},
    domain::{entities::RecordUpdate, types::StatusSet},
    infra::{
        assets::AssetStore,
        error::InfraError,
        http::{self, AppState},
        jobs_fs::FsJobStore,
        sources::SourceStorage,
        telemetry,
    },
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::validation(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;
    let jobs = Arc::new(build_job_service(&settings)?);

    match command {
        config::Command::Serve(_) => run_serve(settings, jobs).await,
        config::Command::Status(args) => run_status(&jobs, args).await,
        config::Command::List(args) => run_list(&jobs, args).await,
        config::Command::Transition(args) => run_transition(&jobs, args).await,
        config::Command::Wait(args) => run_wait(&jobs, &settings, args).await,
    }
}

fn build_job_service(settings: &config::Settings) -> Result<JobService, AppError> {
    let storage = &settings.storage;

    let store = FsJobStore::open(storage.jobs_folder.clone())
        .map_err(|err| InfraError::storage("job store", &storage.jobs_folder, err))?;
    let sources = SourceStorage::new(storage.sources_folder.clone())
        .map_err(|err| InfraError::storage("sources folder", &storage.sources_folder, err))?;

    Ok(JobService::new(
        Arc::new(store),
        Arc::new(sources),
        LifecycleOptions {
            poll_interval: settings.watcher.poll_interval,
            corruption_grace: settings.watcher.corruption_grace,
        },
    ))
}

async fn run_serve(settings: config::Settings, jobs: Arc<JobService>) -> Result<(), AppError> {
    let state = AppState {
        jobs,
        assets: Arc::new(AssetStore::new(settings.storage.assets_folder.clone())),
        pending_refresh: settings.submissions.pending_refresh,
        max_wait: settings.watcher.max_wait,
    };
    let body_limit = usize::try_from(settings.submissions.max_request_bytes.get())
        .map_err(|_| AppError::validation("submissions.max_request_bytes exceeds usize"))?;
    let router = http::build_router(state, body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        jobs_folder = %settings.storage.jobs_folder.display(),
        sources_folder = %settings.storage.sources_folder.display(),
        "jobdock listening"
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let grace = settings.server.graceful_shutdown;
    let drain_deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result.map_err(|err| AppError::from(InfraError::from(err)))?,
        _ = drain_deadline => warn!(
            grace_seconds = grace.as_secs(),
            "open connections outlived the graceful shutdown window"
        ),
    }

    info!("jobdock stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

async fn run_status(jobs: &JobService, args: StatusArgs) -> Result<(), AppError> {
    let snapshot = jobs.status(&args.id).await?;
    print_json(&snapshot.to_view())
}

async fn run_list(jobs: &JobService, args: ListArgs) -> Result<(), AppError> {
    for id in jobs.list(args.status).await? {
        println!("{id}");
    }
    Ok(())
}

async fn run_transition(jobs: &JobService, args: TransitionArgs) -> Result<(), AppError> {
    let update = RecordUpdate {
        artifact_path: args.artifact,
        failure_reason: args.reason,
    };
    let snapshot = jobs.transition(&args.id, args.from, args.to, update).await?;
    print_json(&snapshot.to_view())
}

async fn run_wait(
    jobs: &JobService,
    settings: &config::Settings,
    args: WaitArgs,
) -> Result<(), AppError> {
    let targets = if args.targets.is_empty() {
        StatusSet::terminal()
    } else {
        args.targets.iter().copied().collect()
    };
    let options = WatchOptions {
        timeout: args
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(settings.watcher.max_wait),
        poll_interval: settings.watcher.poll_interval,
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let outcome = jobs.await_status(&args.id, targets, options, &cancel).await;
    interrupt.abort();

    match outcome? {
        WatchOutcome::Reached(snapshot) => print_json(&snapshot.to_view()),
        WatchOutcome::TimedOut { last_status } => Err(AppError::TimedOut {
            id: args.id,
            last_status,
        }),
        WatchOutcome::Cancelled => Err(AppError::Interrupted),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
