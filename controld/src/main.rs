use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use wgmesh_agent_hub::AgentHub;
use wgmesh_reconciler::{Reconciler, ReconcilerConfig};
use wgmesh_store::Store;

mod config;
mod identity;
mod transport;

use config::ConfigFile;

#[derive(Debug, Parser)]
#[clap(name = "wgmesh-controld", author, version, about)]
struct Opts {
    #[clap(subcommand)]
    command: Command,

    /// Path to the daemon's toml config file.
    #[clap(short, long, default_value = "/etc/wgmesh/controld.toml")]
    config: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a fresh config file and sqlite database path, ready to edit.
    Init {
        #[clap(long, default_value = "127.0.0.1:54321")]
        listen_address: SocketAddr,

        #[clap(long, default_value = "/var/lib/wgmesh/mesh.db")]
        database_path: PathBuf,
    },

    /// Run the control-plane daemon: accepts agent connections, reconciles
    /// on every Change Bus event, and serves until killed.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info,wgmesh_controld=debug");
    }
    pretty_env_logger::init();

    let opts = Opts::parse();

    match opts.command {
        Command::Init { listen_address, database_path } => {
            let config = ConfigFile {
                listen_address,
                database_path,
                debounce_window_ms: wgmesh_types::DEFAULT_DEBOUNCE_WINDOW_MS,
                heartbeat_interval_secs: wgmesh_types::HEARTBEAT_INTERVAL_SECS,
                session_ttl_secs: wgmesh_types::SESSION_QUEUE_TTL_SECS,
            };
            if let Some(parent) = opts.config.parent() {
                std::fs::create_dir_all(parent).context("creating config directory")?;
            }
            config.write_to_path(&opts.config).context("writing config file")?;
            log::info!("wrote config to {}", opts.config.display());
            Ok(())
        },
        Command::Serve => serve(opts.config).await,
    }
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    let config = ConfigFile::from_file(&config_path).with_context(|| format!("reading config {}", config_path.display()))?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("creating database directory")?;
    }
    let store = Store::open(&config.database_path).context("opening store")?;
    let hub = AgentHub::with_ttl(Duration::from_secs(config.session_ttl_secs));

    let subscription = store.change_bus().subscribe();
    let reconciler_config =
        ReconcilerConfig { debounce_window: Duration::from_millis(config.debounce_window_ms), max_retry_backoff: Duration::from_secs(30) };
    let reconciler = Reconciler::with_config(store.clone(), hub.clone(), reconciler_config, std::sync::Arc::new(wgmesh_reconciler::LoggingAlertSink));
    let reconciler_handle = reconciler.run(subscription);

    spawn_session_sweeper(hub.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_address).await.context("binding agent listener")?;
    log::info!("wgmesh-controld listening on {}", config.listen_address);

    let result = transport::serve(listener, store, hub, Duration::from_secs(config.heartbeat_interval_secs)).await;

    reconciler_handle.stop();
    result
}

/// Periodically evicts sessions whose closed queues have outlived their
/// retention window (spec §4.6).
fn spawn_session_sweeper(hub: AgentHub) {
    tokio::task::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            let swept = hub.sweep_expired();
            if !swept.is_empty() {
                log::debug!("swept {} expired agent session(s)", swept.len());
            }
        }
    });
}
