//! History Store
//!
//! Local record of who moved each product and when. Append-only from the
//! coordinator's point of view, queryable by serial and by actor.
//!
//! Implementations must provide read-your-writes: an `append` is visible to
//! the next `get_last_event` from the same coordinator.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryHistoryStore;
pub use postgres::PgHistoryStore;

use async_trait::async_trait;
use thiserror::Error;

use super::state::CustodyRole;
use super::types::{ActorId, Product, SerialNumber, TransferEvent};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Product not found: {0}")]
    NotFound(SerialNumber),

    #[error("Product already registered: {0}")]
    AlreadyRegistered(SerialNumber),

    #[error("Out-of-order event for {serial}: expected {expected:?}, got {got}")]
    OutOfOrder {
        serial: SerialNumber,
        expected: Option<CustodyRole>,
        got: CustodyRole,
    },

    #[error("Corrupt record for {serial}: {detail}")]
    Corrupt { serial: SerialNumber, detail: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for HistoryError {
    fn from(e: sqlx::Error) -> Self {
        HistoryError::Database(e.to_string())
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Implementation name for logging
    fn name(&self) -> &'static str;

    /// Create a product together with its first event (role `manufacturer`)
    async fn create_product(
        &self,
        product: &Product,
        first_event: &TransferEvent,
    ) -> Result<(), HistoryError>;

    /// Append the next event; the store rejects anything but the next role
    async fn append(&self, serial: &SerialNumber, event: &TransferEvent)
    -> Result<(), HistoryError>;

    /// Ordered history, oldest first
    async fn get_history(&self, serial: &SerialNumber) -> Result<Vec<TransferEvent>, HistoryError>;

    async fn get_last_event(&self, serial: &SerialNumber) -> Result<TransferEvent, HistoryError>;

    async fn get_product(&self, serial: &SerialNumber) -> Result<Product, HistoryError>;

    /// Products whose history records `actor_id` holding `role`
    async fn products_for_actor(
        &self,
        actor_id: &ActorId,
        role: CustodyRole,
    ) -> Result<Vec<Product>, HistoryError>;
}

/// Check that `next` may follow `last` in a history
pub(crate) fn check_append_order(
    serial: &SerialNumber,
    last: Option<&TransferEvent>,
    next: &TransferEvent,
) -> Result<(), HistoryError> {
    let expected = match last {
        Some(last) => last.role.next(),
        None => Some(CustodyRole::INITIAL),
    };
    if expected == Some(next.role) {
        Ok(())
    } else {
        Err(HistoryError::OutOfOrder {
            serial: serial.clone(),
            expected,
            got: next.role,
        })
    }
}
