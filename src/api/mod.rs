//! HTTP API
//!
//! ```text
//! /api/v1/health                                       GET
//! /api/v1/interbank/transfers                          POST   initiate
//! /api/v1/interbank/transfers/{id}                     GET    status
//! /api/v1/interbank/reconciliation                     GET    operator queue
//! /api/v1/interbank/reconciliation/{id}/resolve        POST   manual decision
//! /api/v1/interbank/dead-letters                       GET    failure topic
//! /api/interbank/prepare|commit|cancel                 POST   inbound protocol
//! ```

pub mod handlers;
pub mod response;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

use crate::db::Database;
use crate::interbank::{InboundSettlement, TransferCoordinator};

pub use response::{ApiError, ApiResponse, ApiResult, error_codes};

/// Shared handler state
pub struct AppState {
    pub coordinator: Arc<TransferCoordinator>,
    pub inbound: Arc<InboundSettlement>,
    pub ledger_name: &'static str,
    /// Present when running against PostgreSQL
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<TransferCoordinator>,
        inbound: Arc<InboundSettlement>,
        ledger_name: &'static str,
        db: Option<Arc<Database>>,
    ) -> Self {
        Self {
            coordinator,
            inbound,
            ledger_name,
            db,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let interbank_routes = Router::new()
        .route("/transfers", post(handlers::initiate_transfer))
        .route("/transfers/{transfer_id}", get(handlers::get_transfer))
        .route("/reconciliation", get(handlers::list_reconciliation))
        .route(
            "/reconciliation/{transfer_id}/resolve",
            post(handlers::resolve_transfer),
        )
        .route("/dead-letters", get(handlers::list_dead_letters));

    let inbound_routes = Router::new()
        .route("/prepare", post(handlers::inbound_prepare))
        .route("/commit", post(handlers::inbound_commit))
        .route("/cancel", post(handlers::inbound_cancel));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1/interbank", interbank_routes)
        .nest("/api/interbank", inbound_routes)
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
