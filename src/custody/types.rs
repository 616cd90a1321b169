//! Custody Core Types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::{Receipt, Signer};
use super::state::{ActorRole, CustodyRole, LedgerStatus};

/// Globally unique product serial number
///
/// Immutable once registered and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Build a serial from user input, trimming surrounding whitespace.
    ///
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Weak reference to an identity managed outside this crate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated identity attached to every request (trusted as given)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: ActorId::new(id),
            name: name.into(),
            role,
        }
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

/// One entry of a product's custody history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub role: CustodyRole,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn new(role: CustodyRole, actor_id: ActorId) -> Self {
        Self {
            role,
            actor_id,
            occurred_at: Utc::now(),
        }
    }

    /// Whether `actor` is the custodian recorded by this event
    pub fn held_by(&self, actor: &Actor) -> bool {
        actor.role.custody_role() == Some(self.role) && actor.id == self.actor_id
    }
}

/// Registered product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub serial_number: SerialNumber,
    pub name: String,
    pub manufacturer_name: String,
    pub registered_at: DateTime<Utc>,
}

/// Registration input for one product
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterProduct {
    pub serial_number: String,
    pub name: String,
    pub signer: Signer,
}

/// Result of a bulk registration; items are processed independently
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchRegistration {
    pub registered: Vec<SerialNumber>,
    pub failed: Vec<FailedRegistration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRegistration {
    pub serial_number: String,
    pub code: &'static str,
    pub reason: String,
}

/// Transfer request against one serial
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub serial: SerialNumber,
    pub next_role: CustodyRole,
    /// Identity receiving custody; recorded on the appended event
    pub recipient: ActorId,
    pub signer: Signer,
}

impl TransferRequest {
    pub fn new(
        serial: SerialNumber,
        next_role: CustodyRole,
        recipient: ActorId,
        signer: Signer,
    ) -> Self {
        Self {
            serial,
            next_role,
            recipient,
            signer,
        }
    }
}

/// Successful transfer: the updated ordered history plus ledger evidence
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub serial: SerialNumber,
    pub ledger_status: LedgerStatus,
    pub receipt: Receipt,
    pub history: Vec<TransferEvent>,
}

/// Joined view of ledger status and local history
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    pub product: Product,
    pub ledger_status: Option<LedgerStatus>,
    pub history: Vec<TransferEvent>,
    /// Last history role maps to the live ledger status
    pub consistent: bool,
}

impl ProductView {
    pub fn new(
        product: Product,
        ledger_status: Option<LedgerStatus>,
        history: Vec<TransferEvent>,
    ) -> Self {
        let consistent = match (history.last(), ledger_status) {
            (Some(last), Some(status)) => last.role.ledger_status() == status,
            _ => false,
        };
        Self {
            product,
            ledger_status,
            history,
            consistent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_parse_trims_and_rejects_blank() {
        assert_eq!(SerialNumber::parse("  SN-1 ").unwrap().as_str(), "SN-1");
        assert!(SerialNumber::parse("   ").is_none());
        assert!(SerialNumber::parse("").is_none());
    }

    #[test]
    fn test_held_by_requires_role_and_id() {
        let event = TransferEvent::new(CustodyRole::Supplier, ActorId::new("B"));

        assert!(event.held_by(&Actor::new("B", "Bob", ActorRole::Supplier)));
        // Same id, wrong role class
        assert!(!event.held_by(&Actor::new("B", "Bob", ActorRole::Retailer)));
        // Right role class, different actor
        assert!(!event.held_by(&Actor::new("C", "Carol", ActorRole::Supplier)));
        assert!(!event.held_by(&Actor::new("B", "Bob", ActorRole::Admin)));
    }

    #[test]
    fn test_product_view_consistency_flag() {
        let product = Product {
            serial_number: SerialNumber::parse("SN-1").unwrap(),
            name: "Widget".into(),
            manufacturer_name: "Acme".into(),
            registered_at: Utc::now(),
        };
        let history = vec![TransferEvent::new(
            CustodyRole::Manufacturer,
            ActorId::new("A"),
        )];

        let view = ProductView::new(
            product.clone(),
            Some(LedgerStatus::Manufactured),
            history.clone(),
        );
        assert!(view.consistent);

        let drifted = ProductView::new(product.clone(), Some(LedgerStatus::Shipped), history.clone());
        assert!(!drifted.consistent);

        let missing = ProductView::new(product, None, history);
        assert!(!missing.consistent);
    }
}
