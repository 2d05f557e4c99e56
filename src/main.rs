//! Interbank Settlement Service
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌─────────────┐    ┌──────────────┐
//! │ HTTP API │───▶│ Coordinator │───▶│ Delay Queue │───▶│   Listener   │
//! │  (axum)  │    │  (reserve)  │    │    (TTL)    │    │  (execute)   │
//! └──────────┘    └─────────────┘    └─────────────┘    └──────────────┘
//!                        ▲                                     │
//!                        └──────── Recovery Worker ◀───────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use interbank_settlement::api::{self, AppState};
use interbank_settlement::config::{AppConfig, SeedAccount};
use interbank_settlement::config_watcher;
use interbank_settlement::db::Database;
use interbank_settlement::interbank::{
    HttpGateway, InboundSettlement, MemoryBroker, MemoryTransferStore, PaymentListener,
    PgTransferStore, RecoveryWorker, TransferCoordinator, TransferStore,
};
use interbank_settlement::ledger::{LedgerError, LedgerStore, MemoryLedger, PgLedgerStore};
use interbank_settlement::logging;

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

/// Existing accounts count as seeded
fn seeded(seed: &SeedAccount, result: Result<(), LedgerError>) -> anyhow::Result<()> {
    match result {
        Ok(()) => {
            info!(account = %seed.number, balance = %seed.balance, "Seed account opened");
            Ok(())
        }
        Err(LedgerError::AccountExists(_)) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to open account {}", seed.number)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        app_config.http.port = port;
    }
    let _log_guard = logging::init_logging(&app_config);

    info!(env = %env, "Starting interbank settlement service");

    // ========================================================================
    // Storage
    // ========================================================================

    let (ledger, store, db): (
        Arc<dyn LedgerStore>,
        Arc<dyn TransferStore>,
        Option<Arc<Database>>,
    ) = match &app_config.postgres_url {
        Some(url) => {
            let db = Arc::new(Database::connect(url).await?);
            db.init_schema().await?;

            let ledger = PgLedgerStore::new(db.pool().clone());
            for seed in &app_config.accounts {
                seeded(seed, ledger.open_account(&seed.to_account()).await)?;
            }
            let store = PgTransferStore::new(db.pool().clone());
            (Arc::new(ledger), Arc::new(store), Some(db))
        }
        None => {
            warn!("No postgres_url configured, state is kept in memory only");
            let ledger = MemoryLedger::new();
            for seed in &app_config.accounts {
                seeded(seed, ledger.open_account(seed.to_account()))?;
            }
            (Arc::new(ledger), Arc::new(MemoryTransferStore::new()), None)
        }
    };

    // ========================================================================
    // Settlement pipeline
    // ========================================================================

    let interbank = &app_config.interbank;
    let gateway = Arc::new(
        HttpGateway::new(&interbank.counterparty).context("Failed to build counterparty client")?,
    );
    let (broker, consumer) = MemoryBroker::start(interbank.queue.clone());

    let coordinator = Arc::new(TransferCoordinator::new(
        ledger.clone(),
        store.clone(),
        gateway.clone(),
        broker,
        interbank.coordinator_config(),
    ));

    let listener = PaymentListener::new(coordinator.clone(), consumer);
    tokio::spawn(listener.run());

    let worker = RecoveryWorker::new(coordinator.clone(), interbank.worker_config());
    tokio::spawn(async move {
        worker.run().await;
    });

    tokio::spawn(config_watcher::config_watcher(
        AppConfig::path_for(&env),
        gateway,
        Duration::from_millis(interbank.credential_reload_ms),
    ));

    info!(
        ledger = ledger.name(),
        transfer_store = store.name(),
        cool_down_ms = interbank.cool_down_ms,
        counterparty = %interbank.counterparty.base_url,
        "Settlement pipeline started"
    );

    // ========================================================================
    // HTTP
    // ========================================================================

    let inbound = Arc::new(InboundSettlement::new(
        ledger.clone(),
        interbank.local_bank_prefix.clone(),
    ));
    let state = Arc::new(AppState::new(coordinator, inbound, ledger.name(), db));

    api::run_server(&app_config.http.host, app_config.http.port, state).await
}
