//! Custody Error Types
//!
//! Every variant carries a stable kind tag (`code()`) and a human-readable
//! reason. Only ledger revert reasons are passed through verbatim; storage
//! details stay in the logs.

use thiserror::Error;

use super::history::HistoryError;
use super::state::{CustodyRole, LedgerStatus};
use super::types::SerialNumber;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    // === Business outcomes ===
    #[error("Product not found: {0}")]
    NotFound(SerialNumber),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid next role {requested}. Expected: {}", expected_label(.expected))]
    InvalidTransition {
        requested: CustodyRole,
        expected: Option<CustodyRole>,
    },

    #[error(
        "Anomaly detected: invalid transition from \"{}\" to \"{target}\"",
        status_label(.current)
    )]
    Anomaly {
        serial: SerialNumber,
        current: Option<LedgerStatus>,
        target: LedgerStatus,
    },

    #[error("Ledger rejected the write: {reason}")]
    LedgerTerminal { reason: String },

    #[error("Ledger unavailable after {attempts} attempt(s): {reason}")]
    LedgerTransient { attempts: u32, reason: String },

    /// The ledger may hold the write, but it could not be confirmed
    #[error("Ledger write on {serial} not confirmed: {detail} (reconciliation task {task_id})")]
    LedgerUnconfirmed {
        serial: SerialNumber,
        task_id: String,
        detail: String,
    },

    #[error("Product already registered: {0}")]
    AlreadyRegistered(SerialNumber),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reconciliation task not found: {0}")]
    TaskNotFound(String),

    // === Internal faults ===
    #[error("Consistency fault on {serial}: {detail} (reconciliation task {task_id})")]
    ConsistencyFault {
        serial: SerialNumber,
        task_id: String,
        detail: String,
    },

    #[error("History store error: {0}")]
    Storage(String),
}

fn expected_label(expected: &Option<CustodyRole>) -> String {
    match expected {
        Some(role) => role.to_string(),
        None => "no further transfer (terminal role)".to_string(),
    }
}

fn status_label(status: &Option<LedgerStatus>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "not registered".to_string(),
    }
}

impl CustodyError {
    pub fn not_custodian() -> Self {
        CustodyError::Unauthorized("You are not the current custodian of this item".to_string())
    }

    /// Stable kind tag for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CustodyError::NotFound(_) | CustodyError::TaskNotFound(_) => "NOT_FOUND",
            CustodyError::Unauthorized(_) => "UNAUTHORIZED",
            CustodyError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CustodyError::Anomaly { .. } => "ANOMALY",
            CustodyError::LedgerTerminal { .. } => "LEDGER_TERMINAL",
            CustodyError::LedgerTransient { .. } => "LEDGER_TRANSIENT",
            CustodyError::LedgerUnconfirmed { .. } => "LEDGER_UNCONFIRMED",
            CustodyError::AlreadyRegistered(_) => "ALREADY_REGISTERED",
            CustodyError::InvalidInput(_) => "INVALID_INPUT",
            CustodyError::ConsistencyFault { .. } => "CONSISTENCY_FAULT",
            CustodyError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            CustodyError::InvalidTransition { .. } | CustodyError::InvalidInput(_) => 400,
            CustodyError::Unauthorized(_) => 403,
            CustodyError::NotFound(_) | CustodyError::TaskNotFound(_) => 404,
            CustodyError::Anomaly { .. } | CustodyError::AlreadyRegistered(_) => 409,
            CustodyError::LedgerTerminal { .. } => 422,
            CustodyError::ConsistencyFault { .. } | CustodyError::Storage(_) => 500,
            CustodyError::LedgerTransient { .. } => 503,
            CustodyError::LedgerUnconfirmed { .. } => 504,
        }
    }

    /// Whether the caller may safely repeat the whole request.
    ///
    /// Only exhausted transient ledger faults qualify: nothing was recorded
    /// locally, so a manual retry cannot double-write.
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(self, CustodyError::LedgerTransient { .. })
    }

    /// Reason string that may cross the API boundary
    pub fn public_message(&self) -> String {
        match self {
            CustodyError::Storage(_) => "Internal storage error".to_string(),
            CustodyError::ConsistencyFault { task_id, .. } => format!(
                "Ledger write confirmed but local history could not be updated; \
                 reconciliation task {} opened",
                task_id
            ),
            CustodyError::LedgerUnconfirmed { task_id, .. } => format!(
                "Ledger write submitted but not confirmed; reconciliation task {} opened",
                task_id
            ),
            other => other.to_string(),
        }
    }
}

impl From<HistoryError> for CustodyError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::NotFound(serial) => CustodyError::NotFound(serial),
            HistoryError::AlreadyRegistered(serial) => CustodyError::AlreadyRegistered(serial),
            other => CustodyError::Storage(other.to_string()),
        }
    }
}
