//! edge-relay
//!
//! ```text
//!     Client ──▶ /{user}/{scheme}:/{host}/{path}
//!                  │
//!                  ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ http::server   CORS → request id → trace → timeout         │
//!   │                  │                                         │
//!   │ routing          split user / parse target / canonicalize  │
//!   │ security         user gate, allow-list gate, header policy │
//!   │ http::upstream   fetch (manual redirects) ──────────────────┼──▶ Upstream
//!   │ http::redirect   passthrough / follow / deny / raw          │
//!   │ access_log       queued writes, geo, cap + retention        │
//!   │ store            memory or SQLite                           │
//!   └──────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use edge_relay::config::loader::{apply_env_overrides, load_config};
use edge_relay::config::watcher::ConfigWatcher;
use edge_relay::config::{ProxyConfig, StoreBackend, StoreConfig};
use edge_relay::http::HttpServer;
use edge_relay::lifecycle::{signals, Shutdown};
use edge_relay::observability::{logging, metrics};
use edge_relay::store::{self, MemoryStore, SqliteStore, Store, StoreError, UnavailableStore};

#[derive(Parser)]
#[command(name = "edge-relay", version, about = "Path-addressed reverse proxy with an origin allow-list")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(Path::new(&config.path))?),
    };
    store::seed_defaults(store.as_ref(), &config.seed_users, store::unix_now())?;
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = ProxyConfig::default();
            apply_env_overrides(&mut config);
            config
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-relay starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = ?config.store.backend,
        request_timeout_secs = config.timeouts.request_secs,
        admin_enabled = config.admin.password.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep serving without a store: every gated request then answers 500
    // instead of the process refusing to start.
    let store = open_store(&config.store).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = %config.store.path, "Store unavailable");
        Arc::new(UnavailableStore::new(e.to_string()))
    });

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let (config_updates, _watcher) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (rx, Some(watcher.run()?))
        }
        _ => (mpsc::unbounded_channel().1, None),
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, store)?;

    let signal_task = tokio::spawn(async move {
        signals::shutdown_on_signal(&shutdown).await;
    });

    server.run(listener, config_updates, server_shutdown).await?;
    signal_task.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
