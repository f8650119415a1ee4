#![forbid(unsafe_code)]

//! `remote-run`: upload-and-run server binary.
//!
//! Bootstraps configuration, starts the PSK-TLS upload endpoint, and on
//! shutdown kills every program it started.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use remote_run::api::handler::AppState;
use remote_run::api::server;
use remote_run::config::{ServerConfig, TOKEN_ENV_VAR};
use remote_run::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "remote-run", about = "Upload-and-run debug server", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Pre-shared key; falls back to the REMOTE_RUN_TOKEN env var.
    #[arg(long)]
    token: Option<String>,

    /// Override the server listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Override the delve headless listen address.
    #[arg(long)]
    delve_listen: Option<String>,

    /// Override the `-agentlib` option for java uploads.
    #[arg(long)]
    java_agentlib: Option<String>,

    /// Override the working directory of launched programs.
    #[arg(long)]
    working: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("remote-run server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => ServerConfig::load_from_path(path)?,
        None => ServerConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;
    config.load_credentials(args.token.clone()).map_err(|err| {
        error!(env = TOKEN_ENV_VAR, "no pre-shared key configured");
        err
    })?;

    let config = Arc::new(config);
    info!(
        working_directory = %config.working_directory().display(),
        artifact_dir = %config.artifact_dir().display(),
        replace_timeout_seconds = config.replace_timeout_seconds,
        "configuration loaded"
    );

    let state = Arc::new(AppState::from_config(Arc::clone(&config)));

    // ── Start transport ─────────────────────────────────
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server_state = Arc::clone(&state);
    let mut server_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(server_state, server_ct).await {
            error!(%err, "upload server failed");
        }
    });

    // ── Wait for shutdown signal ────────────────────────
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            let _ = server_handle.await;
        }
        _ = &mut server_handle => {
            ct.cancel();
        }
    }

    // ── Kill every running program ──────────────────────
    state.registry.shutdown().await;
    info!("remote-run shut down");

    Ok(())
}

fn apply_overrides(config: &mut ServerConfig, args: &Cli) {
    if let Some(ref listen) = args.listen {
        config.listen_address.clone_from(listen);
    }
    if let Some(ref delve_listen) = args.delve_listen {
        config.delve.listen_address.clone_from(delve_listen);
    }
    if let Some(ref agentlib) = args.java_agentlib {
        config.java.agentlib.clone_from(agentlib);
    }
    if let Some(ref working) = args.working {
        config.working_directory = Some(working.clone());
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
