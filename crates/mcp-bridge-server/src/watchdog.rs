//! Self health check.
//!
//! Periodically calls the bridge's own `/health` endpoint and asks the
//! serve loop to restart the listener when it does not answer.
//!
//! Every bound listener gets a generation number. A failed check is
//! reported against the generation that was serving when the check
//! started, so failures observed while a restart is already under way
//! never trigger a second one.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio::{net::TcpListener, sync::watch, task::JoinHandle, time::MissedTickBehavior};

/// Listener generations shared by the serve loop and the watchdog.
#[derive(Debug)]
pub struct RestartSignal {
    serving: watch::Sender<u64>,
    failed: watch::Sender<u64>,
}

impl RestartSignal {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            serving: watch::Sender::new(0),
            failed: watch::Sender::new(0),
        })
    }

    /// Record that a fresh listener is accepting connections and return
    /// its generation.
    pub fn listening(&self) -> u64 {
        self.serving.send_modify(|generation| *generation += 1);
        *self.serving.borrow()
    }

    /// Generation currently serving; 0 before the first bind.
    #[must_use]
    pub fn current(&self) -> u64 {
        *self.serving.borrow()
    }

    /// Report that listener `generation` failed a health check.
    pub fn report_failure(&self, generation: u64) {
        self.failed.send_replace(generation);
    }

    /// Resolves once a failure of listener `generation` is reported.
    ///
    /// Failures of earlier generations are ignored.
    pub async fn failed(&self, generation: u64) {
        let mut failed = self.failed.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = failed.wait_for(|reported| *reported == generation).await;
    }
}

/// URL of the health endpoint for a listener bound to `addr`.
///
/// Wildcard binds are probed over loopback.
#[must_use]
pub fn health_url(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    format!("http://{}/health", SocketAddr::new(ip, addr.port()))
}

async fn check(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("health endpoint returned {}", response.status()))
    }
}

/// Bind `addr` for a restarted listener, retrying with exponential
/// backoff capped at `max_backoff` until the bind succeeds.
pub async fn rebind(addr: SocketAddr, max_backoff: Duration) -> TcpListener {
    let mut backoff = Duration::from_millis(50).min(max_backoff);
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return listener,
            Err(e) => {
                tracing::warn!(%addr, ?backoff, "Failed to rebind listener, retrying: {e}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}

/// Probe `url` every `interval` and report failures to `signal`.
///
/// Each generation is reported at most once. Each probe may take at
/// most `interval`.
pub fn spawn_watchdog(
    url: String,
    interval: Duration,
    signal: Arc<RestartSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(interval).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Watchdog disabled, cannot build HTTP client: {e}");
                return;
            }
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut reported = 0;
        loop {
            ticker.tick().await;
            let generation = signal.current();
            if generation == 0 || generation == reported {
                continue;
            }
            match check(&client, &url).await {
                Ok(()) => tracing::trace!(generation, "Health check passed"),
                Err(reason) => {
                    tracing::warn!(
                        %url,
                        generation,
                        "Health check failed, restarting listener: {reason}"
                    );
                    signal.report_failure(generation);
                    reported = generation;
                }
            }
        }
    })
}
