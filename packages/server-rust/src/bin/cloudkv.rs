//! The `cloudkv` executable: wires together the config file, the logger
//! and frontend named by it, the config watcher, and the service
//! supervisor. No subcommands; behavior is driven entirely by env vars
//! (with CLI overrides) and the config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cloudkv_core::ConfigSnapshot;
use cloudkv_server::logger::{self, PostgresParams};
use cloudkv_server::{frontend, watcher, Supervisor};
use tokio::sync::watch;

/// Graceful shutdown deadline given to the active frontend on `Stop()`.
const FRONTEND_CLOSE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug, Clone)]
#[command(name = "cloudkv", about = "durable in-memory key/value service")]
struct Cli {
    /// TCP port the active frontend binds.
    #[arg(long, env = "FRONTEND_PORT", default_value_t = 8008)]
    frontend_port: u16,

    /// Directory holding the config file and, for the file backend, the log.
    #[arg(long, env = "CONFIG_PATH", default_value = "/app/kvs")]
    config_path: PathBuf,

    #[arg(long, env = "SQUEAL_HOST", default_value = "squeal")]
    squeal_host: String,

    #[arg(long, env = "SQUEAL_USER", default_value = "test")]
    squeal_user: String,

    #[arg(long, env = "SQUEAL_PASS", default_value = "verySecureSuperSafe")]
    squeal_pass: String,

    #[arg(long, env = "SQUEAL_DB", default_value = "cloudKV")]
    squeal_db: String,
}

impl Cli {
    fn postgres_params(&self) -> PostgresParams {
        PostgresParams {
            host: self.squeal_host.clone(),
            user: self.squeal_user.clone(),
            password: self.squeal_pass.clone(),
            db_name: self.squeal_db.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.config_path).with_context(|| {
        format!("creating config directory {}", cli.config_path.display())
    })?;
    let config_file = cli.config_path.join("config.json");
    let snapshot = get_or_make_config(&config_file)?;

    let logger = logger::build(&snapshot.logger, &cli.config_path, cli.postgres_params())
        .await
        .context("constructing initial logger")?;
    let frontend_ref = frontend::build(&snapshot.frontend, Arc::clone(&logger), cli.frontend_port)
        .context("constructing initial frontend")?;

    let supervisor = Arc::new(Supervisor::new(logger, frontend_ref, FRONTEND_CLOSE_DEADLINE));

    let (watcher_cancel_tx, watcher_cancel_rx) = watch::channel(false);
    let (mut config_changes, mut watch_errs) = watcher::watch(config_file, watcher_cancel_rx);

    let reload_supervisor = Arc::clone(&supervisor);
    let reload_cli = cli.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = config_changes.recv() => {
                    let Some(snapshot) = maybe else { return };
                    reload(&reload_supervisor, &reload_cli, snapshot).await;
                }
                maybe = watch_errs.recv() => {
                    match maybe {
                        Some(e) => tracing::error!(error = %e, "config watcher failed, reconfiguration disabled"),
                        None => {}
                    }
                    return;
                }
            }
        }
    });

    let shutdown_supervisor = Arc::clone(&supervisor);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        let _ = watcher_cancel_tx.send(true);
        shutdown_supervisor.stop().await;
    });

    let result = supervisor.start().await;
    supervisor.stop().await;

    result.context("supervisor exited with an error")?;
    Ok(())
}

async fn reload(supervisor: &Arc<Supervisor>, cli: &Cli, snapshot: ConfigSnapshot) {
    let new_logger = match logger::build(&snapshot.logger, &cli.config_path, cli.postgres_params()).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "reconfiguration failed: logger");
            return;
        }
    };
    let new_frontend = match frontend::build(&snapshot.frontend, Arc::clone(&new_logger), cli.frontend_port) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(error = %e, "reconfiguration failed: frontend");
            return;
        }
    };
    tracing::info!(logger = %snapshot.logger, frontend = %snapshot.frontend, "config change detected, reloading");
    supervisor.hot_swap(new_logger, new_frontend);
}

/// Reads the config file, creating it with the default snapshot if
/// absent. Directory/file bootstrapping is ambient startup plumbing, not
/// part of the core (spec.md §1 lists it as explicitly out of scope).
fn get_or_make_config(path: &Path) -> anyhow::Result<ConfigSnapshot> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(ConfigSnapshot::parse(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let default = ConfigSnapshot::default();
            std::fs::write(path, serde_json::to_string(&default)?)?;
            Ok(default)
        }
        Err(e) => Err(e.into()),
    }
}
