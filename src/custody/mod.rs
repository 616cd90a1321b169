//! Product Custody Chain
//!
//! Tracks a product through a fixed custody chain, keeping two stores in
//! step:
//! - **Ledger** (external, append-only, slow): authoritative current status
//! - **History Store** (local): who moved the product, and when
//!
//! # State Machine
//!
//! ```text
//! role:    manufacturer ──► supplier ──► retailer
//! ledger:  Manufactured ──► Shipped  ──► Delivered
//! ```
//!
//! Strictly linear: no skipping, no reversal, `retailer` is terminal.
//!
//! # Safety Invariants
//!
//! 1. **Write-Then-Record**: history is appended only after the ledger write
//!    is confirmed, never before
//! 2. **Custodian Binding**: only the actor recorded by the last event may
//!    move the product on
//! 3. **Anomaly Check**: the live ledger status must permit the target status
//!    before anything is submitted
//! 4. **Per-Serial Serialization**: the read-check-write-append sequence for
//!    one serial never interleaves with another for the same serial
//! 5. **No Silent Divergence**: a confirmed ledger write whose local record
//!    fails becomes a reconciliation task, never an automatic retry

pub mod api;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod ledger;
pub mod locks;
pub mod reconciliation;
pub mod retry;
pub mod state;
pub mod types;


// Re-exports for convenience
pub use coordinator::{ConfirmationPolicy, TransferCoordinator};
pub use error::CustodyError;
pub use history::{HistoryError, HistoryStore, InMemoryHistoryStore, PgHistoryStore};
pub use ledger::{
    InMemoryLedger, LedgerError, LedgerGateway, Receipt, RpcLedgerGateway, Signer,
};
pub use reconciliation::{FaultReporter, ReconciliationQueue, ReconciliationTask, TaskKind};
pub use retry::{Classify, FaultClass, RetryError, RetryPolicy, with_retry};
pub use state::{ActorRole, CustodyRole, LedgerStatus};
pub use types::{
    Actor, ActorId, BatchRegistration, Product, ProductView, RegisterProduct, SerialNumber,
    TransferEvent, TransferOutcome, TransferRequest,
};
