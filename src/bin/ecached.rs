//! ecached: endpoint cache daemon.
//!
//! Serves the cached RPC facade and, when a REST upstream is configured,
//! the cached REST facade on a second listener.

use std::net::SocketAddr;

use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use endpoint_cache::server::config::Config;
use endpoint_cache::server::{build_state, rest_router, rpc_router};

/// Caching gateway in front of a blockchain node's RPC and REST APIs.
#[derive(Parser)]
#[command(name = "ecached")]
#[command(version = endpoint_cache::PKG_VERSION)]
#[command(about = "Endpoint cache daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "ECACHED_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_process_env()?;

    let rpc_addr = config.rpc_address()?;
    let rest_addr = config.rest_address()?;

    let state = build_state(&config).await?;
    let counter = state.gateway.counter().clone();
    let serve_rest = config.server.rest_enabled && state.gateway.rest_upstream().is_some();

    info!(version = endpoint_cache::version_string(), %rpc_addr, "ecached starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut listeners = tokio::task::JoinSet::new();

    listeners.spawn(serve("rpc", rpc_addr, rpc_router(state.clone()), shutdown_rx.clone()));
    if serve_rest {
        listeners.spawn(serve("rest", rest_addr, rest_router(state), shutdown_rx));
    } else {
        info!("REST listener disabled (no REST upstream configured or rest_enabled = false)");
    }

    tokio::select! {
        _ = shutdown_signal() => info!("shutdown requested"),
        Some(result) = listeners.join_next() => {
            // A listener exited on its own; take the other one down too.
            if let Ok(Err(e)) = result {
                error!(error = %e, "listener failed");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    while listeners.join_next().await.is_some() {}

    if let Err(e) = counter.flush().await {
        warn!(error = %e, "failed to flush counters on shutdown");
    }
    info!("ecached stopped");
    Ok(())
}

async fn serve(
    name: &'static str,
    addr: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(listener = name, %addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
