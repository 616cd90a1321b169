//! Custody Chain Gateway
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐    ┌──────────┐
//! │   HTTP   │───▶│ Coordinator │───▶│  Ledger  │───▶│ History  │
//! │  (JWT)   │    │ (lock+check)│    │ (confirm)│    │ (append) │
//! └──────────┘    └─────────────┘    └──────────┘    └──────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use custody_chain::config::{AppConfig, LedgerMode};
use custody_chain::custody::{
    HistoryStore, InMemoryHistoryStore, InMemoryLedger, LedgerGateway, PgHistoryStore,
    ReconciliationQueue, RpcLedgerGateway, TransferCoordinator,
};
use custody_chain::gateway::{self, state::AppState};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn build_history(config: &AppConfig) -> anyhow::Result<Arc<dyn HistoryStore>> {
    match &config.postgres_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            let store = PgHistoryStore::new(pool);
            store
                .init_schema()
                .await
                .context("Failed to initialize history schema")?;
            info!("History store: PostgreSQL");
            Ok(Arc::new(store))
        }
        None => {
            warn!("postgres_url not set; history is kept in memory and lost on restart");
            Ok(Arc::new(InMemoryHistoryStore::new()))
        }
    }
}

fn build_ledger(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerGateway>> {
    match config.ledger.mode {
        LedgerMode::Memory => {
            warn!("Ledger mode is memory; no external ledger is involved");
            Ok(Arc::new(InMemoryLedger::new()))
        }
        LedgerMode::Rpc => {
            let url = config
                .ledger
                .rpc_url
                .as_deref()
                .context("ledger.rpc_url is required in rpc mode")?;
            Ok(Arc::new(RpcLedgerGateway::new(
                url,
                config.ledger.request_timeout(),
            )?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = custody_chain::logging::init_logging(&config);

    info!("Starting custody chain gateway in {} mode", env);

    let history = build_history(&config).await?;
    let ledger = build_ledger(&config)?;
    let reconciliation = Arc::new(ReconciliationQueue::new());

    let coordinator = TransferCoordinator::new(history, ledger, reconciliation)
        .with_retry_policy(config.retry.policy())
        .with_confirmation(config.ledger.confirmation_policy());

    let port = get_port_override().unwrap_or(config.gateway.port);
    let state = Arc::new(AppState::new(Arc::new(coordinator), &config.jwt_secret));

    gateway::run_server(&config.gateway.host, port, state).await
}
