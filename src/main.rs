//! Filegate server binary.
//!
//! Serves one data folder over HTTP behind Basic authentication. Every request
//! goes through a single dispatcher that bans abusive clients, confines paths
//! to the data folder and answers with a directory listing, a download, an
//! upload or a delete.

mod app;
mod atomic;
mod auth;
mod background;
mod config;
mod credentials;
mod dispatch;
mod error;
mod files;
mod http;
mod locale;
mod logging;
mod render;
mod storage;
mod upload;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use crate::app::{AppContext, build_router};
use crate::auth::AuthGate;
use crate::background::spawn_ban_sweeper;
use crate::config::{Args, Config, SHUTDOWN_GRACE_SECS, asset_dir};
use crate::credentials::{CredentialStore, hash_password};
use crate::locale::Locale;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(password) = args.password.as_deref() {
        return match hash_password(password) {
            Ok(hash) => {
                println!("{hash}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("cannot hash password: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let asset_dir = asset_dir(&args.config);
    let log_path = config.log_file.as_ref().map(|name| asset_dir.join(name));
    let _log_guard = logging::init_logging(log_path.as_deref());

    match serve(args, config, asset_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server stopped");
            ExitCode::FAILURE
        }
    }
}

async fn serve(
    args: Args,
    config: Config,
    asset_dir: std::path::PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let locale = Locale::load(&args.locales_dir, &config.lang)?;
    let host = config.bind.parse::<IpAddr>()?;
    let addr = SocketAddr::new(host, config.port);

    let gate = Arc::new(AuthGate::new(
        CredentialStore::new(config.users.clone()),
        config.admin_user.clone(),
        config.max_failed,
        config.ban_duration,
    ));
    let sweeper = spawn_ban_sweeper(gate.clone(), config.sweep_interval);

    let app = Arc::new(AppContext::new(config, locale, gate, asset_dir));
    app.storage.ensure_root().await?;
    info!(
        data = %app.storage.root_path().display(),
        users = app.config.users.len(),
        "data folder ready"
    );
    let router = build_router(app);

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));
    info!("Starting HTTP server at {}", addr);
    // 收到终止信号并等待宽限期结束后返回
    let result = axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await;
    sweeper.abort();
    Ok(result?)
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
