use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kvguard::{Algorithm, Coordinator, KvGuardConfig, LockToken};

#[derive(Parser, Debug)]
#[command(name = "kvguard", version, about = "Rate limits, locks and prefix purges over Redis")]
struct Cli {
    /// YAML configuration file; KVGUARD__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the store is reachable
    Ping,

    /// Count one event against a key
    RateLimit {
        /// Rate limit key, e.g. user:42:msg
        key: String,
        #[arg(short, long, default_value_t = Algorithm::Fixed)]
        algorithm: Algorithm,
        #[arg(short, long)]
        limit: u64,
        #[arg(short, long, default_value_t = 60_000)]
        window_ms: u64,
    },

    /// Count one event for an identity against a configured rule
    Rule {
        /// Rule name from the configuration file
        name: String,
        /// Caller identity, e.g. a user id
        identity: String,
    },

    /// Try to take a lock
    Lock {
        name: String,
        /// Token to hold the lock with; generated if omitted
        #[arg(short, long)]
        token: Option<String>,
        #[arg(long, default_value_t = 30_000)]
        ttl_ms: u64,
        /// Keep the lock until interrupted, then release it
        #[arg(long)]
        hold: bool,
    },

    /// Release a lock held with the given token
    Unlock {
        name: String,
        #[arg(short, long)]
        token: String,
    },

    /// List keys starting with a prefix
    Scan {
        prefix: String,
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Delete every key starting with a prefix
    Purge {
        prefix: String,
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
}

#[derive(Serialize)]
struct LockOutcome<'a> {
    name: &'a str,
    token: &'a str,
    acquired: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = KvGuardConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Configuration loaded");

    let coordinator = Coordinator::connect(&config)
        .await
        .context("failed to connect to store")?;

    match cli.command {
        Command::Ping => {
            coordinator.ping(coordinator.deadline()).await?;
            print_json(&serde_json::json!({ "pong": true }))?;
        }
        Command::RateLimit {
            key,
            algorithm,
            limit,
            window_ms,
        } => {
            let decision = coordinator
                .rate_limit(
                    algorithm,
                    &key,
                    limit,
                    Duration::from_millis(window_ms),
                    coordinator.deadline(),
                )
                .await?;
            print_json(&decision)?;
        }
        Command::Rule { name, identity } => {
            let decision = coordinator
                .rate_limit_rule(&name, &identity, coordinator.deadline())
                .await?;
            print_json(&decision)?;
        }
        Command::Lock {
            name,
            token,
            ttl_ms,
            hold,
        } => {
            let token = match token {
                Some(token) => LockToken::new(token)?,
                None => LockToken::generate(),
            };
            let acquired = coordinator
                .lock(&name, token.as_str(), Duration::from_millis(ttl_ms), coordinator.deadline())
                .await?;
            print_json(&LockOutcome {
                name: &name,
                token: token.as_str(),
                acquired,
            })?;

            if acquired && hold {
                info!(lock = %name, "Holding lock until interrupted");
                shutdown_signal().await;
                if !coordinator
                    .unlock(&name, token.as_str(), coordinator.deadline())
                    .await?
                {
                    warn!(lock = %name, "Lock expired while held");
                }
            }
        }
        Command::Unlock { name, token } => {
            let released = coordinator.unlock(&name, &token, coordinator.deadline()).await?;
            print_json(&serde_json::json!({ "name": name, "released": released }))?;
        }
        Command::Scan { prefix, batch_size } => {
            let batch_size = batch_size.unwrap_or(coordinator.batch_size());
            let mut keys = coordinator
                .scan_prefix(&prefix, batch_size, coordinator.deadline())
                .await?;
            keys.sort();
            print_json(&keys)?;
        }
        Command::Purge { prefix, batch_size } => {
            let batch_size = batch_size.unwrap_or(coordinator.batch_size());
            let deleted = coordinator
                .purge_by_prefix(&prefix, batch_size, coordinator.deadline())
                .await?;
            print_json(&serde_json::json!({ "prefix": prefix, "deleted": deleted }))?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, releasing"),
        _ = terminate => info!("Received SIGTERM, releasing"),
    }
}
