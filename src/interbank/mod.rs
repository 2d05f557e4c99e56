//! Interbank Transfer Settlement
//!
//! Delayed, two-phase settlement of transfers whose destination account is
//! held by the counterparty bank.
//!
//! # Architecture
//!
//! ```text
//! initiate ──► reserve (ledger) ──► persist RESERVED ──► delay queue (TTL)
//!                                                          │ cool-down expired
//!                                                          ▼
//!                                   PaymentListener ──► execute
//!                                                          │
//!                         prepare ──accepted──► commit ──► ledger debit
//!                            │
//!                            └─declined/timeout──► cancel ──► ledger release
//! ```
//!
//! # State Machine
//!
//! ```text
//! INITIATED → RESERVED → PENDING_REMOTE → COMMITTED
//!                 ↓             ↓
//!        FAILED_VALIDATION   CANCELLED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: `PENDING_REMOTE` is durable before `prepare` is sent
//! 2. **No Commit Without Vote**: `COMMITTED` requires a recorded `prepare` ack
//! 3. **Unknown Is Not Failure**: a failed `commit` after an accepted `prepare`
//!    keeps the reservation and goes to an operator, never to `CANCELLED`
//! 4. **Idempotency**: every ledger and gateway operation is keyed by transfer id

pub mod coordinator;
pub mod db;
pub mod error;
pub mod gateway;
pub mod inbound;
pub mod listener;
pub mod queue;
pub mod reconciliation;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;
pub mod worker;


// Re-exports for convenience
pub use coordinator::{CoordinatorConfig, PreSettlementCheck, SourceAccountCheck, TransferCoordinator};
pub use db::PgTransferStore;
pub use error::{InterbankError, ValidationError};
pub use gateway::{CounterpartyGateway, GatewayError, HttpGateway};
pub use inbound::InboundSettlement;
pub use listener::PaymentListener;
pub use queue::{DelayBroker, MemoryBroker, QueueTopology};
pub use reconciliation::ReconciliationEntry;
pub use state::TransferStatus;
pub use store::{MemoryTransferStore, TransferStore};
pub use types::{InitiateAck, PrepareVote, Resolution, SettlementPayload, TransferRecord, TransferRequest};
pub use validation::BankPrefixes;
pub use worker::{RecoveryWorker, WorkerConfig};
