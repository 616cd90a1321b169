//! Custody State Definitions
//!
//! Roles are the states of the custody chain; ledger statuses are their
//! on-ledger mirror. Both tables live here so the two stores are always
//! interpreted against the same edges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Custody roles (states of the custody state machine)
///
/// ```text
/// manufacturer -> supplier -> retailer
/// ```
///
/// Strictly linear: no cycles, no skipping, no reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum CustodyRole {
    Manufacturer = 1,
    Supplier = 2,
    Retailer = 3,
}

impl CustodyRole {
    /// Implicit initial state at registration
    pub const INITIAL: CustodyRole = CustodyRole::Manufacturer;

    /// The only role that may follow this one, `None` for the terminal role
    #[inline]
    pub fn next(&self) -> Option<CustodyRole> {
        match self {
            CustodyRole::Manufacturer => Some(CustodyRole::Supplier),
            CustodyRole::Supplier => Some(CustodyRole::Retailer),
            CustodyRole::Retailer => None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    /// Ledger status that corresponds to holding custody in this role
    #[inline]
    pub fn ledger_status(&self) -> LedgerStatus {
        match self {
            CustodyRole::Manufacturer => LedgerStatus::Manufactured,
            CustodyRole::Supplier => LedgerStatus::Shipped,
            CustodyRole::Retailer => LedgerStatus::Delivered,
        }
    }

    /// Numeric ID for PostgreSQL storage (SMALLINT)
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(CustodyRole::Manufacturer),
            2 => Some(CustodyRole::Supplier),
            3 => Some(CustodyRole::Retailer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CustodyRole::Manufacturer => "manufacturer",
            CustodyRole::Supplier => "supplier",
            CustodyRole::Retailer => "retailer",
        }
    }
}

impl fmt::Display for CustodyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CustodyRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manufacturer" => Ok(CustodyRole::Manufacturer),
            "supplier" => Ok(CustodyRole::Supplier),
            "retailer" => Ok(CustodyRole::Retailer),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Role claimed by an authenticated identity.
///
/// `Admin` exists in the identity model but can never hold custody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Manufacturer,
    Supplier,
    Retailer,
    Admin,
}

impl ActorRole {
    /// Custody role this identity may hold, `None` for non-transfer roles
    pub fn custody_role(&self) -> Option<CustodyRole> {
        match self {
            ActorRole::Manufacturer => Some(CustodyRole::Manufacturer),
            ActorRole::Supplier => Some(CustodyRole::Supplier),
            ActorRole::Retailer => Some(CustodyRole::Retailer),
            ActorRole::Admin => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Manufacturer => "manufacturer",
            ActorRole::Supplier => "supplier",
            ActorRole::Retailer => "retailer",
            ActorRole::Admin => "admin",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("admin") {
            return Ok(ActorRole::Admin);
        }
        let role: CustodyRole = s.parse()?;
        Ok(role.into())
    }
}

impl From<CustodyRole> for ActorRole {
    fn from(role: CustodyRole) -> Self {
        match role {
            CustodyRole::Manufacturer => ActorRole::Manufacturer,
            CustodyRole::Supplier => ActorRole::Supplier,
            CustodyRole::Retailer => ActorRole::Retailer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

/// Ledger custody status for a registered serial.
///
/// Exactly one exists per registered serial; it is the source of truth for
/// the stage a product is at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerStatus {
    Manufactured,
    Shipped,
    Delivered,
}

impl LedgerStatus {
    /// Statuses the ledger may move to from this one
    ///
    /// `Manufactured -> {Shipped}`, `Shipped -> {Delivered}`, `Delivered -> {}`
    pub fn allowed_next(&self) -> &'static [LedgerStatus] {
        match self {
            LedgerStatus::Manufactured => &[LedgerStatus::Shipped],
            LedgerStatus::Shipped => &[LedgerStatus::Delivered],
            LedgerStatus::Delivered => &[],
        }
    }

    #[inline]
    pub fn permits(&self, target: LedgerStatus) -> bool {
        self.allowed_next().contains(&target)
    }

    pub fn custody_role(&self) -> CustodyRole {
        match self {
            LedgerStatus::Manufactured => CustodyRole::Manufacturer,
            LedgerStatus::Shipped => CustodyRole::Supplier,
            LedgerStatus::Delivered => CustodyRole::Retailer,
        }
    }

    /// Wire label used by the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Manufactured => "Manufactured",
            LedgerStatus::Shipped => "Shipped",
            LedgerStatus::Delivered => "Delivered",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Manufactured" => Ok(LedgerStatus::Manufactured),
            "Shipped" => Ok(LedgerStatus::Shipped),
            "Delivered" => Ok(LedgerStatus::Delivered),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ledger status: {0}")]
pub struct UnknownStatus(pub String);
