//! Ledger Gateway
//!
//! Thin adapter over the external append-only ledger. The ledger is the
//! authority on a serial's current status; this crate treats its execution
//! semantics as opaque.
//!
//! Writes are slow and may be accepted without being final. A [`Receipt`]
//! counts as confirmed only once [`Receipt::is_final`] holds.

pub mod memory;
pub mod rpc;

pub use memory::InMemoryLedger;
pub use rpc::RpcLedgerGateway;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::{Classify, FaultClass};
use super::state::LedgerStatus;
use super::types::SerialNumber;

/// Credential able to authorize a ledger write.
///
/// Opaque to the coordinator: an interactive wallet session and raw key
/// material are treated identically.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signer {
    WalletSession { address: String },
    RawKey { secret: String },
}

impl Signer {
    /// Label safe for logs
    pub fn describe(&self) -> String {
        match self {
            Signer::WalletSession { address } => format!("wallet:{}", address),
            Signer::RawKey { .. } => "raw-key".to_string(),
        }
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signer::WalletSession { address } => f
                .debug_struct("WalletSession")
                .field("address", address)
                .finish(),
            Signer::RawKey { .. } => f
                .debug_struct("RawKey")
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Evidence of a ledger write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    /// Block that included the write, `None` while still pending
    pub block_height: Option<u64>,
    pub confirmations: u32,
    /// Revert reason if the ledger rejected the write on execution
    pub reverted: Option<String>,
}

impl Receipt {
    /// Accepted into the pending pool only
    pub fn pending(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            block_height: None,
            confirmations: 0,
            reverted: None,
        }
    }

    #[inline]
    pub fn is_reverted(&self) -> bool {
        self.reverted.is_some()
    }

    /// Included, not reverted, and buried under enough confirmations
    pub fn is_final(&self, required_confirmations: u32) -> bool {
        !self.is_reverted()
            && self.block_height.is_some()
            && self.confirmations >= required_confirmations.max(1)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Retryable ===
    #[error("Network error: {0}")]
    Network(String),

    #[error("Ledger request timed out: {0}")]
    Timeout(String),

    #[error("Network or provider error: {0}")]
    Provider(String),

    #[error("Receipt not yet available: {0}")]
    ReceiptUnavailable(String),

    // === Terminal ===
    #[error("{reason}")]
    Rejected { reason: String },

    /// Exact duplicate of a submission the ledger already accepted
    #[error("Duplicate submission")]
    Duplicate { tx_hash: Option<String> },

    #[error("Signature rejected: {0}")]
    SignatureRejected(String),

    #[error("Invalid ledger request: {0}")]
    InvalidRequest(String),

    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl Classify for LedgerError {
    fn fault_class(&self) -> FaultClass {
        match self {
            LedgerError::Network(_)
            | LedgerError::Timeout(_)
            | LedgerError::Provider(_)
            | LedgerError::ReceiptUnavailable(_) => FaultClass::Retryable,
            LedgerError::Rejected { .. }
            | LedgerError::Duplicate { .. }
            | LedgerError::SignatureRejected(_)
            | LedgerError::InvalidRequest(_)
            | LedgerError::InvalidResponse(_) => FaultClass::Terminal,
        }
    }
}

impl LedgerError {
    /// The write may have reached the ledger even though no answer came back
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, LedgerError::Network(_) | LedgerError::Timeout(_))
    }

    /// Ledger-provided reason, the only ledger detail shown to callers
    pub fn revert_reason(&self) -> String {
        match self {
            LedgerError::Rejected { reason } => reason.clone(),
            LedgerError::Duplicate { .. } => "Duplicate submission".to_string(),
            LedgerError::SignatureRejected(_) => "Signature rejected".to_string(),
            LedgerError::InvalidRequest(_) | LedgerError::InvalidResponse(_) => {
                "Ledger could not process the request".to_string()
            }
            LedgerError::Network(_)
            | LedgerError::Timeout(_)
            | LedgerError::Provider(_)
            | LedgerError::ReceiptUnavailable(_) => {
                "Network or provider error. Please try again.".to_string()
            }
        }
    }
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &'static str;

    /// Current status, `None` if the serial is unknown to the ledger
    async fn get_status(&self, serial: &SerialNumber) -> Result<Option<LedgerStatus>, LedgerError>;

    /// Register a serial at status `Manufactured`
    async fn register_product(
        &self,
        serial: &SerialNumber,
        name: &str,
        manufacturer: &str,
        signer: &Signer,
    ) -> Result<Receipt, LedgerError>;

    async fn submit_transition(
        &self,
        serial: &SerialNumber,
        target: LedgerStatus,
        signer: &Signer,
    ) -> Result<Receipt, LedgerError>;

    /// Latest view of a previously returned receipt
    async fn get_receipt(&self, tx_hash: &str) -> Result<Receipt, LedgerError>;
}
