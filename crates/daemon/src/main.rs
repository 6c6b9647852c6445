use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dbvault_core::{ArchiveKind, RetentionPolicy};
use dbvault_daemon::config::{self, Config, FileScheduleSource};
use dbvault_daemon::{
    build_manager, build_router, AppState, Layout, ScheduleSource, Scheduler, StaticSchedule,
};
use dbvault_exec::TokioProcessRunner;
use dbvault_storage::{BackupManager, SYSTEM_ACTOR};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (mut cfg, config_path, mode) = parse_args()?;

    let root = env::var("DBVAULT_ROOT")
        .ok()
        .or_else(|| cfg.storage.root.clone())
        .unwrap_or_else(|| "./data".to_owned());

    let listen = env::var("DBVAULT_LISTEN")
        .ok()
        .or_else(|| cfg.server.listen.clone())
        .unwrap_or_else(|| "127.0.0.1:8089".to_owned());

    let database_url = env::var("DATABASE_URL")
        .ok()
        .or_else(|| cfg.storage.database_url.clone());

    if let Ok(password) = env::var("DBVAULT_DB_PASSWORD") {
        cfg.database.password = Some(password);
    }

    let layout = Layout::new(PathBuf::from(&root));
    let manager = Arc::new(
        build_manager(
            &cfg,
            &layout,
            database_url.as_deref(),
            Arc::new(TokioProcessRunner),
        )
        .await?,
    );

    match mode.as_deref() {
        Some("run-once") => run_once(&manager).await,
        Some("cleanup") => cleanup(&manager, &cfg).await,
        Some(other) => bail!("unknown mode {other:?}; expected run-once or cleanup"),
        None => run_service(manager, &listen, &cfg, config_path).await,
    }
}

/// Parse CLI args, returning the loaded config, its path, and optional mode.
fn parse_args() -> Result<(Config, Option<PathBuf>, Option<String>)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut mode: Option<String> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            other => {
                mode = Some(other.to_owned());
            }
        }
        i += 1;
    }

    let cfg = match &config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(path)?
        }
        None => Config::default(),
    };

    Ok((cfg, config_path, mode))
}

async fn run_once(manager: &BackupManager) -> Result<()> {
    let archive = manager.create(ArchiveKind::Manual, SYSTEM_ACTOR).await?;
    info!(filename = %archive.filename, bytes = archive.size_bytes, "backup created");
    Ok(())
}

async fn cleanup(manager: &BackupManager, cfg: &Config) -> Result<()> {
    let decision = manager
        .cleanup(
            cfg.schedule.retention_days,
            cfg.schedule.retention_min_count,
            SYSTEM_ACTOR,
        )
        .await?;
    info!(deleted = decision.deleted.len(), kept = decision.kept, "cleanup finished");
    Ok(())
}

async fn run_service(
    manager: Arc<BackupManager>,
    listen: &str,
    cfg: &Config,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let source: Arc<dyn ScheduleSource> = match config_path {
        Some(path) => Arc::new(FileScheduleSource::new(path)),
        None => Arc::new(StaticSchedule::new(cfg.schedule.clone())),
    };
    let scheduler = Arc::new(Scheduler::new(manager.clone(), source));
    // a bad schedule must not keep the API from serving
    if let Err(e) = scheduler.start().await {
        error!(error = %e, "scheduler failed to start");
    }

    let mut state = AppState::new(manager, scheduler.clone());
    state.retention = RetentionPolicy::new(
        cfg.schedule.retention_days,
        cfg.schedule.retention_min_count,
    );
    state.csrf_token = env::var("DBVAULT_CSRF_TOKEN")
        .ok()
        .or_else(|| cfg.security.csrf_token.clone());
    state.api_token = env::var("DBVAULT_API_TOKEN")
        .ok()
        .or_else(|| cfg.security.api_token.clone());

    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;
    let app = build_router(state);

    info!(%addr, "starting backup API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
