//! Reconciliation Queue
//!
//! A ledger write that succeeded while the local bookkeeping around it did
//! not leaves the two sources of truth apart. Such faults are reported here
//! as tasks and logged on the `reconciliation` target. Tasks are never
//! retried automatically; an operator resolves them through
//! `TransferCoordinator::reconcile`, or dismisses one the ledger refutes
//! through `TransferCoordinator::dismiss`.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{error, info};
use ulid::Ulid;

use super::types::{ActorId, Product, SerialNumber, TransferEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Ledger confirmed a transition; appending history failed
    HistoryAppendFailed,
    /// Ledger confirmed a registration; creating the product record failed
    RegistrationRecordFailed,
    /// Write accepted by the ledger but never confirmed in time
    UnconfirmedWrite,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::HistoryAppendFailed => "history_append_failed",
            TaskKind::RegistrationRecordFailed => "registration_record_failed",
            TaskKind::UnconfirmedWrite => "unconfirmed_write",
        }
    }
}

/// How a task was closed, and by whom
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// Pending event written to history
    Recorded { by: ActorId },
    /// History already held the pending event
    AlreadyRecorded { by: ActorId },
    /// Closed without writing; the ledger does not hold the write
    Dismissed { by: ActorId, reason: String },
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Recorded { .. } => "recorded",
            Resolution::AlreadyRecorded { .. } => "already_recorded",
            Resolution::Dismissed { .. } => "dismissed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationTask {
    pub id: String,
    pub serial: SerialNumber,
    pub kind: TaskKind,
    /// Event that should have been recorded locally
    pub pending_event: TransferEvent,
    /// Product record to create, for registration faults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_product: Option<Product>,
    pub tx_hash: Option<String>,
    pub detail: String,
    pub reported_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
}

impl ReconciliationTask {
    pub fn new(
        serial: SerialNumber,
        kind: TaskKind,
        pending_event: TransferEvent,
        tx_hash: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            serial,
            kind,
            pending_event,
            pending_product: None,
            tx_hash,
            detail: detail.into(),
            reported_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn with_product(mut self, product: Product) -> Self {
        self.pending_product = Some(product);
        self
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Sink for consistency faults, and the lookup side used by manual repair
pub trait FaultReporter: Send + Sync {
    fn report(&self, task: ReconciliationTask);

    fn get(&self, id: &str) -> Option<ReconciliationTask>;

    /// Close a task with the given outcome; returns false for unknown ids.
    /// A task closes once; later calls leave the first resolution in place.
    fn resolve(&self, id: &str, resolution: Resolution) -> bool;

    /// All tasks, oldest first
    fn list(&self) -> Vec<ReconciliationTask>;
}

/// Resolved tasks are kept this long for audit
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// In-process task list; the log line is the durable record
pub struct ReconciliationQueue {
    tasks: RwLock<Vec<ReconciliationTask>>,
    retention: TimeDelta,
}

impl Default for ReconciliationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Drop resolved tasks older than the retention window; open tasks stay
    pub fn prune_resolved(&self) -> usize {
        let now = Utc::now();
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let before = tasks.len();
        tasks.retain(|t| match t.resolved_at {
            Some(at) => now - at < self.retention,
            None => true,
        });
        before - tasks.len()
    }

    pub fn open_tasks(&self) -> Vec<ReconciliationTask> {
        self.list().into_iter().filter(|t| !t.is_resolved()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FaultReporter for ReconciliationQueue {
    fn report(&self, task: ReconciliationTask) {
        error!(
            target: "reconciliation",
            task_id = %task.id,
            serial = %task.serial,
            kind = task.kind.as_str(),
            role = %task.pending_event.role,
            actor_id = %task.pending_event.actor_id,
            tx_hash = task.tx_hash.as_deref().unwrap_or("-"),
            detail = %task.detail,
            "Ledger and local history diverged; manual reconciliation required"
        );
        let pruned = self.prune_resolved();
        if pruned > 0 {
            info!(target: "reconciliation", pruned, "Pruned resolved reconciliation tasks");
        }
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }

    fn list(&self) -> Vec<ReconciliationTask> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn get(&self, id: &str) -> Option<ReconciliationTask> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    fn resolve(&self, id: &str, resolution: Resolution) -> bool {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                if task.resolved_at.is_none() {
                    info!(
                        target: "reconciliation",
                        task_id = %task.id,
                        serial = %task.serial,
                        kind = task.kind.as_str(),
                        outcome = resolution.as_str(),
                        "Reconciliation task resolved"
                    );
                    task.resolved_at = Some(Utc::now());
                    task.resolution = Some(resolution);
                }
                true
            }
            None => false,
        }
    }
}
