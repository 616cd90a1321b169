//! Custody Chain
//!
//! Tracks products through a manufacturer → supplier → retailer custody
//! chain, keeping an external ledger and a local history store consistent.
//!
//! # Modules
//!
//! - [`custody`] - State machine, coordinator, ledger and history adapters
//! - [`gateway`] - HTTP surface (axum) with JWT identity
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod custody;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use custody::{
    Actor, ActorRole, CustodyError, CustodyRole, LedgerStatus, SerialNumber, TransferCoordinator,
};
