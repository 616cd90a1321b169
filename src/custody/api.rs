//! Custody API Layer
//!
//! Request/response DTOs and the functions the HTTP gateway calls. Input is
//! validated here before it reaches the coordinator; coordinator errors are
//! mapped to an HTTP status plus a numeric code in the standard envelope.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::coordinator::TransferCoordinator;
use super::error::CustodyError;
use super::ledger::Signer;
use super::reconciliation::ReconciliationTask;
use super::state::CustodyRole;
use super::types::{
    Actor, ActorId, BatchRegistration, Product, ProductView, RegisterProduct, SerialNumber,
    TransferEvent, TransferOutcome, TransferRequest,
};

// ============================================================================
// API Request/Response Types
// ============================================================================

/// Body of `POST /api/v1/products/{serial}/transfer`
#[derive(Debug, Deserialize)]
pub struct TransferApiRequest {
    /// "supplier" or "retailer"
    pub next_role: String,
    /// Identity receiving custody
    pub recipient_id: String,
    pub signer: Signer,
}

/// Body of `POST /api/v1/admin/reconciliation/{task_id}/dismiss`
#[derive(Debug, Deserialize)]
pub struct DismissApiRequest {
    pub reason: String,
}

/// Body of `POST /api/v1/products/batch`
#[derive(Debug, Deserialize)]
pub struct BatchRegisterApiRequest {
    pub products: Vec<RegisterProduct>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EventResponse {
    pub role: String,
    pub actor_id: String,
    /// Timestamp (milliseconds)
    pub occurred_at: i64,
}

impl From<&TransferEvent> for EventResponse {
    fn from(e: &TransferEvent) -> Self {
        Self {
            role: e.role.to_string(),
            actor_id: e.actor_id.to_string(),
            occurred_at: e.occurred_at.timestamp_millis(),
        }
    }
}

fn events(history: &[TransferEvent]) -> Vec<EventResponse> {
    history.iter().map(EventResponse::from).collect()
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub serial_number: String,
    pub name: String,
    pub manufacturer_name: String,
    /// Timestamp (milliseconds)
    pub registered_at: i64,
}

impl From<&Product> for ProductResponse {
    fn from(p: &Product) -> Self {
        Self {
            serial_number: p.serial_number.to_string(),
            name: p.name.clone(),
            manufacturer_name: p.manufacturer_name.clone(),
            registered_at: p.registered_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransferApiResponse {
    pub serial_number: String,
    pub ledger_status: String,
    pub tx_hash: String,
    pub history: Vec<EventResponse>,
}

impl From<TransferOutcome> for TransferApiResponse {
    fn from(o: TransferOutcome) -> Self {
        Self {
            serial_number: o.serial.to_string(),
            ledger_status: o.ledger_status.to_string(),
            tx_hash: o.receipt.tx_hash,
            history: events(&o.history),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductViewResponse {
    #[serde(flatten)]
    pub product: ProductResponse,
    /// `None` if the ledger does not know the serial
    pub ledger_status: Option<String>,
    pub consistent: bool,
    pub history: Vec<EventResponse>,
}

impl From<ProductView> for ProductViewResponse {
    fn from(v: ProductView) -> Self {
        Self {
            product: ProductResponse::from(&v.product),
            ledger_status: v.ledger_status.map(|s| s.to_string()),
            consistent: v.consistent,
            history: events(&v.history),
        }
    }
}

/// API wrapper for standard response format
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    /// Stable kind tag on errors, e.g. `ANOMALY`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            kind: None,
            data: Some(data),
            msg: None,
        }
    }

    pub fn error(code: i32, msg: impl ToString) -> Self {
        Self {
            code,
            kind: None,
            data: None,
            msg: Some(msg.to_string()),
        }
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }
}

pub type ApiResult<T> = Result<T, (StatusCode, ApiResponse<()>)>;

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = -1001;
    pub const INVALID_TRANSITION: i32 = -1002;
    pub const PRODUCT_NOT_FOUND: i32 = -2001;
    pub const TASK_NOT_FOUND: i32 = -2002;
    pub const ALREADY_REGISTERED: i32 = -3001;
    pub const ANOMALY: i32 = -3002;
    pub const UNAUTHORIZED: i32 = -4001;
    pub const FORBIDDEN: i32 = -4003;
    pub const LEDGER_UNAVAILABLE: i32 = -5001;
    pub const LEDGER_UNCONFIRMED: i32 = -5002;
    pub const LEDGER_REJECTED: i32 = -6001;
    pub const CONSISTENCY_FAULT: i32 = -6002;
    pub const INTERNAL_ERROR: i32 = -9001;
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_serial(raw: &str) -> Result<SerialNumber, CustodyError> {
    SerialNumber::parse(raw)
        .ok_or_else(|| CustodyError::InvalidInput("serial number must not be empty".to_string()))
}

fn parse_next_role(raw: &str) -> Result<CustodyRole, CustodyError> {
    raw.parse::<CustodyRole>().map_err(|_| {
        CustodyError::InvalidInput(format!(
            "Invalid next role: {}. Use 'supplier' or 'retailer'",
            raw
        ))
    })
}

/// Map CustodyError to (StatusCode, error_code, message)
pub fn map_error(e: &CustodyError) -> (StatusCode, i32, String) {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let code = match e {
        CustodyError::InvalidInput(_) => error_codes::INVALID_PARAMETER,
        CustodyError::InvalidTransition { .. } => error_codes::INVALID_TRANSITION,
        CustodyError::NotFound(_) => error_codes::PRODUCT_NOT_FOUND,
        CustodyError::TaskNotFound(_) => error_codes::TASK_NOT_FOUND,
        CustodyError::AlreadyRegistered(_) => error_codes::ALREADY_REGISTERED,
        CustodyError::Anomaly { .. } => error_codes::ANOMALY,
        CustodyError::Unauthorized(_) => error_codes::FORBIDDEN,
        CustodyError::LedgerTransient { .. } => error_codes::LEDGER_UNAVAILABLE,
        CustodyError::LedgerUnconfirmed { .. } => error_codes::LEDGER_UNCONFIRMED,
        CustodyError::LedgerTerminal { .. } => error_codes::LEDGER_REJECTED,
        CustodyError::ConsistencyFault { .. } => error_codes::CONSISTENCY_FAULT,
        CustodyError::Storage(_) => error_codes::INTERNAL_ERROR,
    };

    (status, code, e.public_message())
}

fn reject(e: CustodyError) -> (StatusCode, ApiResponse<()>) {
    let (status, code, msg) = map_error(&e);
    if status.is_server_error() {
        error!(kind = e.code(), error = %e, "Custody request failed");
    } else {
        debug!(kind = e.code(), error = %e, "Custody request rejected");
    }
    (status, ApiResponse::error(code, msg).with_kind(e.code()))
}

// ============================================================================
// Handlers (called by the HTTP gateway)
// ============================================================================

pub async fn register_product(
    coordinator: &TransferCoordinator,
    actor: &Actor,
    req: RegisterProduct,
) -> ApiResult<ProductResponse> {
    let product = coordinator.register_product(actor, req).await.map_err(reject)?;
    Ok(ProductResponse::from(&product))
}

pub async fn register_products(
    coordinator: &TransferCoordinator,
    actor: &Actor,
    req: BatchRegisterApiRequest,
) -> ApiResult<BatchRegistration> {
    coordinator
        .register_products(actor, req.products)
        .await
        .map_err(reject)
}

pub async fn transfer_product(
    coordinator: &TransferCoordinator,
    actor: &Actor,
    serial: &str,
    req: TransferApiRequest,
) -> ApiResult<TransferApiResponse> {
    let serial = parse_serial(serial).map_err(reject)?;
    let next_role = parse_next_role(&req.next_role).map_err(reject)?;
    let request = TransferRequest::new(
        serial,
        next_role,
        ActorId::new(req.recipient_id.trim()),
        req.signer,
    );

    let outcome = coordinator
        .request_transfer(actor, request)
        .await
        .map_err(reject)?;
    Ok(TransferApiResponse::from(outcome))
}

pub async fn get_product(
    coordinator: &TransferCoordinator,
    serial: &str,
) -> ApiResult<ProductViewResponse> {
    let serial = parse_serial(serial).map_err(reject)?;
    let view = coordinator.product_view(&serial).await.map_err(reject)?;
    Ok(ProductViewResponse::from(view))
}

pub async fn get_history(
    coordinator: &TransferCoordinator,
    serial: &str,
) -> ApiResult<Vec<EventResponse>> {
    let serial = parse_serial(serial).map_err(reject)?;
    let history = coordinator.history(&serial).await.map_err(reject)?;
    Ok(events(&history))
}

pub async fn my_products(
    coordinator: &TransferCoordinator,
    actor: &Actor,
) -> ApiResult<Vec<ProductResponse>> {
    let products = coordinator.products_for_actor(actor).await.map_err(reject)?;
    Ok(products.iter().map(ProductResponse::from).collect())
}

pub fn list_reconciliation(
    coordinator: &TransferCoordinator,
    actor: &Actor,
) -> ApiResult<Vec<ReconciliationTask>> {
    coordinator.reconciliation_tasks(actor).map_err(reject)
}

pub async fn reconcile_task(
    coordinator: &TransferCoordinator,
    actor: &Actor,
    task_id: &str,
) -> ApiResult<ReconciliationTask> {
    coordinator.reconcile(actor, task_id).await.map_err(reject)
}

pub async fn dismiss_task(
    coordinator: &TransferCoordinator,
    actor: &Actor,
    task_id: &str,
    req: DismissApiRequest,
) -> ApiResult<ReconciliationTask> {
    coordinator
        .dismiss(actor, task_id, &req.reason)
        .await
        .map_err(reject)
}

// ============================================================================
// Unit Tests
// ============================================================================
