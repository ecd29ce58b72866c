use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use mcp_bridge_server::{AppState, Args, RestartSignal, router, watchdog};
use mcp_bridge_session::{Dispatcher, SessionMode, SessionRegistry};
use mcp_bridge_transport::DefaultTransportFactory;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REBIND_BACKOFF_MAX: Duration = Duration::from_secs(10);

enum Stop {
    Terminate,
    Restart,
}

fn init_tracing(log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "mcp_bridge=info,tower_http=info".into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = tokio::signal::ctrl_c() => {},
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn next_stop(signal: Arc<RestartSignal>, generation: u64) -> Stop {
    tokio::select! {
        () = wait_for_shutdown_signal() => Stop::Terminate,
        () = signal.failed(generation) => Stop::Restart,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mode = args.session_mode();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        %mode,
        "Starting mcp-bridge"
    );

    let auth_token = args.auth_token();
    if auth_token.is_none() {
        warn!("No auth token configured; /bridge accepts unauthenticated calls");
    }

    let registry = Arc::new(SessionRegistry::new(
        Arc::new(DefaultTransportFactory),
        args.session_config(),
        args.session_ttl(),
    ));
    let sweeper = (mode == SessionMode::Cached)
        .then(|| Arc::clone(&registry).spawn_sweeper(args.sweep_interval()));

    let state = AppState {
        dispatcher: Arc::new(Dispatcher::new(Arc::clone(&registry), mode)),
        auth_token,
    };

    let restart = RestartSignal::new();
    let watchdog = args.health_check_interval().map(|interval| {
        info!(?interval, "Health watchdog enabled");
        watchdog::spawn_watchdog(
            watchdog::health_url(args.addr),
            interval,
            Arc::clone(&restart),
        )
    });

    // Only the first bind is fatal; later ones retry until the port frees up.
    let mut listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    loop {
        let generation = restart.listening();
        info!(addr = %args.addr, generation, "Listening");

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        let signal = Arc::clone(&restart);
        let shutdown = async move {
            let _ = stop_tx.send(next_stop(signal, generation).await);
        };

        axum::serve(listener, router(state.clone()))
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error")?;

        match stop_rx.await {
            Ok(Stop::Restart) => warn!(generation, "Restarting listener after failed health check"),
            Ok(Stop::Terminate) | Err(_) => break,
        }

        listener = tokio::select! {
            listener = watchdog::rebind(args.addr, REBIND_BACKOFF_MAX) => listener,
            () = wait_for_shutdown_signal() => break,
        };
    }

    info!("Shutting down");
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    let closed = registry.close_all().await;
    info!(closed, "Closed cached sessions");

    Ok(())
}
