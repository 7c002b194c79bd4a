use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use owge_sync_client::{ClientConfig, GameSession, ReconnectPolicy};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

mod telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "owge-sync",
    author,
    version,
    about = "Keeps an OWGE player's game state synchronized and logs every change"
)]
struct Cli {
    /// Realtime socket endpoint. `http(s)` is rewritten to `ws(s)`.
    #[arg(long, env = "OWGE_SOCKET_URL", default_value = "ws://localhost:3000/socket")]
    socket_url: String,

    /// Base URL of the game REST API.
    #[arg(long, env = "OWGE_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Player credential used for the socket handshake and REST calls.
    #[arg(long, env = "OWGE_TOKEN", hide_env_values = true)]
    token: String,

    /// Directory holding the offline cache. Defaults to the platform cache dir.
    #[arg(long, env = "OWGE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Prefix separating cached values of different players or universes.
    #[arg(long, env = "OWGE_CACHE_NAMESPACE", default_value = "default")]
    cache_namespace: String,

    /// Delay before the first reconnect attempt.
    #[arg(long, env = "OWGE_RECONNECT_INITIAL_MS", default_value_t = 1_000)]
    reconnect_initial_ms: u64,

    /// Upper bound for the reconnect delay.
    #[arg(long, env = "OWGE_RECONNECT_MAX_MS", default_value_t = 32_000)]
    reconnect_max_ms: u64,

    /// Reconnect at once after every drop, without backing off.
    #[arg(long, env = "OWGE_IMMEDIATE_RECONNECT", default_value_t = false)]
    immediate_reconnect: bool,

    /// Frontend route used to pick the applicable tutorial entries.
    #[arg(long, env = "OWGE_ROUTE")]
    route: Option<String>,
}

impl TryFrom<Cli> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let token = cli.token.trim().to_string();
        if token.is_empty() {
            bail!("a non-empty token is required (--token or OWGE_TOKEN)");
        }
        url::Url::parse(&cli.api_url)
            .with_context(|| format!("invalid api url: {}", cli.api_url))?;
        url::Url::parse(&cli.socket_url)
            .with_context(|| format!("invalid socket url: {}", cli.socket_url))?;

        let reconnect = if cli.immediate_reconnect {
            ReconnectPolicy::immediate()
        } else {
            if cli.reconnect_max_ms < cli.reconnect_initial_ms {
                bail!(
                    "reconnect max delay ({}ms) is lower than the initial delay ({}ms)",
                    cli.reconnect_max_ms,
                    cli.reconnect_initial_ms
                );
            }
            ReconnectPolicy {
                initial_delay: Duration::from_millis(cli.reconnect_initial_ms),
                max_delay: Duration::from_millis(cli.reconnect_max_ms),
            }
        };

        Ok(ClientConfig {
            socket_url: cli.socket_url,
            api_base_url: cli.api_url,
            token: Some(token),
            cache_dir: cli.cache_dir,
            cache_namespace: cli.cache_namespace,
            reconnect,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init()?;

    let cli = Cli::parse();
    let route = cli.route.clone();
    let config: ClientConfig = cli.try_into()?;
    let session = Arc::new(
        GameSession::from_config(&config).context("failed to register domain handlers")?,
    );
    if let Some(route) = route {
        session.tutorials().set_active_route(route);
    }

    spawn_watchers(&session);

    info!(socket = %config.socket_url, api = %config.api_base_url, "starting sync");
    tokio::select! {
        started = session.start(&config.socket_url, config.token.clone()) => {
            let report = started.context("initial synchronization failed")?;
            if report.is_complete() {
                info!(generation = report.generation, "initial sync complete");
            } else {
                warn!(generation = report.generation, failed = ?report.failed, "initial sync incomplete");
            }
            shutdown_signal().await;
        }
        _ = shutdown_signal() => {}
    }

    info!("shutting down");
    session.shutdown();
    Ok(())
}

fn spawn_watchers(session: &Arc<GameSession>) {
    let missions = session.missions();
    watch_projection("missions_count", missions.missions_count().subscribe(), |count| {
        info!(target: "owge.sync", count, "running missions")
    });
    watch_projection("my_unit_missions", missions.my_unit_missions().subscribe(), |list| {
        info!(target: "owge.sync", len = list.len(), "own missions")
    });
    watch_projection(
        "enemy_unit_missions",
        missions.enemy_unit_missions().subscribe(),
        |list| info!(target: "owge.sync", len = list.len(), "enemy missions"),
    );

    let reports = session.reports();
    watch_projection("user_unread", reports.user_unread().subscribe(), |count| {
        info!(target: "owge.sync", count, "unread own reports")
    });
    watch_projection("enemy_unread", reports.enemy_unread().subscribe(), |count| {
        info!(target: "owge.sync", count, "unread enemy reports")
    });

    let upgrades = session.upgrades();
    watch_projection("obtained_upgrades", upgrades.obtained().subscribe(), |list| {
        info!(target: "owge.sync", len = list.len(), "obtained upgrades")
    });
    watch_projection("running_upgrade", upgrades.running().subscribe(), |running| {
        match running {
            Some(running) => info!(
                target: "owge.sync",
                upgrade = ?running.upgrade.as_ref().map(|upgrade| upgrade.id),
                level = ?running.level,
                pending_millis = running.pending_millis,
                "upgrade running"
            ),
            None => info!(target: "owge.sync", "no upgrade running"),
        }
    });

    watch_projection(
        "applicable_tutorial_entries",
        session.tutorials().applicable_entries().subscribe(),
        |entries| info!(target: "owge.sync", len = entries.len(), "tutorial entries for route"),
    );

    let mut completions = session.service().sync_completions();
    tokio::spawn(async move {
        loop {
            match completions.recv().await {
                Ok(report) if report.is_complete() => {
                    info!(generation = report.generation, "resynchronized")
                }
                Ok(report) => {
                    warn!(generation = report.generation, failed = ?report.failed, "partial resync")
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "sync completion watcher lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut panic = session.service().cache_panic();
    tokio::spawn(async move {
        while panic.changed().await.is_ok() {
            if *panic.borrow_and_update() {
                error!(target: "owge.cache", "cache writes are failing, offline state may be stale");
            }
        }
    });
}

fn watch_projection<T, F>(name: &'static str, mut rx: watch::Receiver<Option<T>>, log: F)
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) + Send + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let value = rx.borrow_and_update().clone();
            if let Some(value) = value {
                log(&value);
            }
        }
        tracing::debug!(projection = name, "projection closed");
    });
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["owge-sync"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("cli parses")
    }

    #[test]
    fn builds_config_with_backoff_defaults() {
        let cli = parse(&["--token", " abc ", "--cache-namespace", "eu1"]);
        let config = ClientConfig::try_from(cli).unwrap();
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.cache_namespace, "eu1");
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn immediate_reconnect_ignores_delays() {
        let cli = parse(&[
            "--token",
            "abc",
            "--immediate-reconnect",
            "--reconnect-max-ms",
            "1",
        ]);
        let config = ClientConfig::try_from(cli).unwrap();
        assert_eq!(config.reconnect, ReconnectPolicy::immediate());
    }

    #[test]
    fn rejects_blank_token_and_inverted_delays() {
        assert!(ClientConfig::try_from(parse(&["--token", "  "])).is_err());
        let cli = parse(&[
            "--token",
            "abc",
            "--reconnect-initial-ms",
            "5000",
            "--reconnect-max-ms",
            "100",
        ]);
        let err = ClientConfig::try_from(cli).unwrap_err();
        assert!(err.to_string().contains("lower than the initial delay"));
    }
}
