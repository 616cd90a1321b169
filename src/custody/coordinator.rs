//! Transfer Coordinator
//!
//! Drives every custody change. A transfer is validated against the history
//! (existence, custodian, role sequence), cross-checked against the ledger's
//! live status, written to the ledger through the retry policy, confirmed,
//! and only then appended to the history store.
//!
//! The whole read-check-write-append sequence for one serial runs under the
//! per-serial lock. Once preconditions pass, the write phase moves onto a
//! spawned task that owns the lock guard, so a caller that goes away cannot
//! abort a submitted ledger write halfway.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::CustodyError;
use super::history::{HistoryError, HistoryStore};
use super::ledger::{LedgerError, LedgerGateway, Receipt, Signer};
use super::locks::{SerialGuard, SerialLocks};
use super::reconciliation::{FaultReporter, ReconciliationTask, Resolution, TaskKind};
use super::retry::{Classify, FaultClass, RetryError, RetryPolicy};
use super::state::{ActorRole, CustodyRole, LedgerStatus};
use super::types::{
    Actor, BatchRegistration, FailedRegistration, Product, ProductView, RegisterProduct,
    SerialNumber, TransferEvent, TransferOutcome, TransferRequest,
};

/// When a ledger receipt counts as confirmed, and how long to wait for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub required_confirmations: u32,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            required_confirmations: 1,
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

enum ConfirmFailure {
    Reverted(String),
    Unconfirmed { polls: u32, detail: String },
}

fn ledger_failure(err: RetryError<LedgerError>) -> CustodyError {
    match err {
        RetryError::Terminal { error, .. } => CustodyError::LedgerTerminal {
            reason: error.revert_reason(),
        },
        RetryError::Exhausted { attempts, last } => CustodyError::LedgerTransient {
            attempts,
            reason: last.revert_reason(),
        },
    }
}

fn join_failure(e: tokio::task::JoinError) -> CustodyError {
    error!(error = %e, "Ledger commit task did not complete");
    CustodyError::Storage(format!("commit task failed: {}", e))
}

/// Custody coordinator
#[derive(Clone)]
pub struct TransferCoordinator {
    history: Arc<dyn HistoryStore>,
    ledger: Arc<dyn LedgerGateway>,
    reporter: Arc<dyn FaultReporter>,
    locks: Arc<SerialLocks>,
    retry: RetryPolicy,
    confirmation: ConfirmationPolicy,
}

impl TransferCoordinator {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        ledger: Arc<dyn LedgerGateway>,
        reporter: Arc<dyn FaultReporter>,
    ) -> Self {
        info!(
            history = history.name(),
            ledger = ledger.name(),
            "Transfer coordinator initialized"
        );
        Self {
            history,
            ledger,
            reporter,
            locks: Arc::new(SerialLocks::new()),
            retry: RetryPolicy::default(),
            confirmation: ConfirmationPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a product: ledger first, then product + first event locally
    pub async fn register_product(
        &self,
        actor: &Actor,
        input: RegisterProduct,
    ) -> Result<Product, CustodyError> {
        if actor.role != ActorRole::Manufacturer {
            return Err(CustodyError::Unauthorized(
                "Only manufacturers can register products".to_string(),
            ));
        }
        let serial = SerialNumber::parse(&input.serial_number).ok_or_else(|| {
            CustodyError::InvalidInput("serial number must not be empty".to_string())
        })?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CustodyError::InvalidInput(
                "product name must not be empty".to_string(),
            ));
        }

        let guard = self.locks.acquire(&serial).await;

        match self.history.get_product(&serial).await {
            Ok(_) => return Err(CustodyError::AlreadyRegistered(serial)),
            Err(HistoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(status) = self.ledger_status(&serial).await? {
            warn!(
                serial = %serial,
                status = %status,
                "Serial already on ledger but unknown locally"
            );
            return Err(CustodyError::AlreadyRegistered(serial));
        }

        let product = Product {
            serial_number: serial,
            name: name.to_string(),
            manufacturer_name: actor.name.clone(),
            registered_at: Utc::now(),
        };
        let first = TransferEvent::new(CustodyRole::INITIAL, actor.id.clone());

        let this = self.clone();
        let signer = input.signer;
        tokio::spawn(async move {
            this.commit_registration(guard, product, first, signer)
                .await
        })
        .await
        .map_err(join_failure)?
    }

    /// Register several products; each item succeeds or fails on its own
    pub async fn register_products(
        &self,
        actor: &Actor,
        items: Vec<RegisterProduct>,
    ) -> Result<BatchRegistration, CustodyError> {
        if actor.role != ActorRole::Manufacturer {
            return Err(CustodyError::Unauthorized(
                "Only manufacturers can register products".to_string(),
            ));
        }
        if items.is_empty() {
            return Err(CustodyError::InvalidInput(
                "batch must contain at least one product".to_string(),
            ));
        }

        let mut batch = BatchRegistration::default();
        for item in items {
            let raw_serial = item.serial_number.clone();
            match self.register_product(actor, item).await {
                Ok(product) => batch.registered.push(product.serial_number),
                Err(e) => {
                    debug!(serial = %raw_serial, code = e.code(), "Batch item rejected");
                    batch.failed.push(FailedRegistration {
                        serial_number: raw_serial,
                        code: e.code(),
                        reason: e.public_message(),
                    });
                }
            }
        }

        info!(
            actor = %actor.id,
            registered = batch.registered.len(),
            failed = batch.failed.len(),
            "Batch registration finished"
        );
        Ok(batch)
    }

    async fn commit_registration(
        &self,
        _guard: SerialGuard,
        product: Product,
        first: TransferEvent,
        signer: Signer,
    ) -> Result<Product, CustodyError> {
        let serial = product.serial_number.clone();
        let ledger = &self.ledger;

        let receipt = self
            .write_with_retry("register_product", &serial, &first, Some(&product), || {
                ledger.register_product(&serial, &product.name, &product.manufacturer_name, &signer)
            })
            .await?;
        let receipt = self
            .confirm_or_report(&serial, receipt, &first, Some(&product))
            .await?;

        if let Err(e) = self.history.create_product(&product, &first).await {
            let task = ReconciliationTask::new(
                serial,
                TaskKind::RegistrationRecordFailed,
                first,
                Some(receipt.tx_hash),
                e.to_string(),
            )
            .with_product(product);
            return Err(self.consistency_fault(task));
        }

        info!(
            serial = %serial,
            actor = %first.actor_id,
            tx_hash = %receipt.tx_hash,
            "Product registered"
        );
        Ok(product)
    }

    // ========================================================================
    // Transfer
    // ========================================================================

    /// Move custody of `req.serial` to the next role in the chain
    pub async fn request_transfer(
        &self,
        actor: &Actor,
        req: TransferRequest,
    ) -> Result<TransferOutcome, CustodyError> {
        if req.recipient.is_blank() {
            return Err(CustodyError::InvalidInput(
                "recipient id must not be empty".to_string(),
            ));
        }

        let guard = self.locks.acquire(&req.serial).await;
        let (history, target) = self.check_transfer(actor, &req).await?;

        info!(
            serial = %req.serial,
            actor = %actor.id,
            next_role = %req.next_role,
            recipient = %req.recipient,
            signer = %req.signer.describe(),
            "Transfer preconditions passed"
        );

        let this = self.clone();
        tokio::spawn(async move { this.commit_transfer(guard, req, target, history).await })
            .await
            .map_err(join_failure)?
    }

    /// Preconditions, in order; none of them has side effects
    async fn check_transfer(
        &self,
        actor: &Actor,
        req: &TransferRequest,
    ) -> Result<(Vec<TransferEvent>, LedgerStatus), CustodyError> {
        let serial = &req.serial;

        // 1. Product exists
        let history = self.history.get_history(serial).await?;
        let last = history
            .last()
            .ok_or_else(|| CustodyError::Storage(format!("empty history for {}", serial)))?;

        // 2. Actor is the current custodian (role class and identity)
        if !last.held_by(actor) {
            warn!(
                serial = %serial,
                actor = %actor.id,
                role = %actor.role,
                custodian = %last.actor_id,
                "Transfer by non-custodian rejected"
            );
            return Err(CustodyError::not_custodian());
        }

        // 3. Role sequence
        let expected = last.role.next();
        if expected != Some(req.next_role) {
            return Err(CustodyError::InvalidTransition {
                requested: req.next_role,
                expected,
            });
        }

        // 4. Ledger still permits the move
        let target = req.next_role.ledger_status();
        let current = self.ledger_status(serial).await?;
        match current {
            Some(status) if status.permits(target) => Ok((history, target)),
            _ => {
                warn!(
                    serial = %serial,
                    ledger_status = ?current,
                    target = %target,
                    history_role = %last.role,
                    "Anomaly: ledger does not permit transition"
                );
                Err(CustodyError::Anomaly {
                    serial: serial.clone(),
                    current,
                    target,
                })
            }
        }
    }

    async fn commit_transfer(
        &self,
        _guard: SerialGuard,
        req: TransferRequest,
        target: LedgerStatus,
        mut history: Vec<TransferEvent>,
    ) -> Result<TransferOutcome, CustodyError> {
        let serial = &req.serial;
        let event = TransferEvent::new(req.next_role, req.recipient.clone());
        let ledger = &self.ledger;

        let receipt = self
            .write_with_retry("submit_transition", serial, &event, None, || {
                ledger.submit_transition(serial, target, &req.signer)
            })
            .await?;
        let receipt = self
            .confirm_or_report(serial, receipt, &event, None)
            .await?;

        if let Err(e) = self.history.append(serial, &event).await {
            let task = ReconciliationTask::new(
                serial.clone(),
                TaskKind::HistoryAppendFailed,
                event,
                Some(receipt.tx_hash),
                e.to_string(),
            );
            return Err(self.consistency_fault(task));
        }

        info!(
            serial = %serial,
            role = %event.role,
            recipient = %event.actor_id,
            ledger_status = %target,
            tx_hash = %receipt.tx_hash,
            "Transfer recorded"
        );

        history.push(event);
        Ok(TransferOutcome {
            serial: serial.clone(),
            ledger_status: target,
            receipt,
            history,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn history(&self, serial: &SerialNumber) -> Result<Vec<TransferEvent>, CustodyError> {
        Ok(self.history.get_history(serial).await?)
    }

    /// Live ledger status joined with local history
    pub async fn product_view(&self, serial: &SerialNumber) -> Result<ProductView, CustodyError> {
        let product = self.history.get_product(serial).await?;
        let history = self.history.get_history(serial).await?;
        let ledger_status = self.ledger_status(serial).await?;

        let view = ProductView::new(product, ledger_status, history);
        if !view.consistent {
            warn!(
                serial = %serial,
                ledger_status = ?view.ledger_status,
                last_role = ?view.history.last().map(|e| e.role),
                "Ledger and history disagree"
            );
        }
        Ok(view)
    }

    /// Products the actor has held in their own role; admins hold none
    pub async fn products_for_actor(&self, actor: &Actor) -> Result<Vec<Product>, CustodyError> {
        match actor.role.custody_role() {
            Some(role) => Ok(self.history.products_for_actor(&actor.id, role).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Ledger status through the retry policy
    pub async fn ledger_status(
        &self,
        serial: &SerialNumber,
    ) -> Result<Option<LedgerStatus>, CustodyError> {
        let ledger = &self.ledger;
        self.retry
            .run(
                "get_status",
                |_| ledger.get_status(serial),
                |e: &LedgerError| e.fault_class(),
            )
            .await
            .map_err(ledger_failure)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    pub fn reconciliation_tasks(
        &self,
        actor: &Actor,
    ) -> Result<Vec<ReconciliationTask>, CustodyError> {
        Self::require_admin(actor)?;
        Ok(self.reporter.list())
    }

    /// Record a reported task's pending event, if the ledger corroborates it.
    ///
    /// The event is written only when the live ledger status equals the
    /// event's status and the history is exactly one step behind. A task
    /// whose event is already the last history entry is resolved as is.
    pub async fn reconcile(
        &self,
        actor: &Actor,
        task_id: &str,
    ) -> Result<ReconciliationTask, CustodyError> {
        Self::require_admin(actor)?;
        let Some((task, _guard)) = self.open_task_locked(task_id).await? else {
            return self.task(task_id);
        };

        let serial = &task.serial;
        let event = &task.pending_event;

        let history = match self.history.get_history(serial).await {
            Ok(history) => history,
            Err(HistoryError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let last_role = history.last().map(|e| e.role);

        let resolution = if last_role == Some(event.role) {
            info!(
                target: "reconciliation",
                task_id = %task.id,
                serial = %serial,
                "History already holds the pending event"
            );
            Resolution::AlreadyRecorded {
                by: actor.id.clone(),
            }
        } else {
            let target = event.role.ledger_status();
            let current = self.ledger_status(serial).await?;
            let one_step_behind = match last_role {
                Some(role) => role.next() == Some(event.role),
                None => event.role == CustodyRole::INITIAL,
            };
            if !one_step_behind || current != Some(target) {
                warn!(
                    target: "reconciliation",
                    task_id = %task.id,
                    serial = %serial,
                    ledger_status = ?current,
                    last_role = ?last_role,
                    pending_role = %event.role,
                    "Reconciliation refused: ledger does not corroborate pending event"
                );
                return Err(CustodyError::Anomaly {
                    serial: serial.clone(),
                    current,
                    target,
                });
            }

            match last_role {
                None => {
                    let product = task.pending_product.as_ref().ok_or_else(|| {
                        CustodyError::InvalidInput(format!(
                            "task {} carries no product record",
                            task.id
                        ))
                    })?;
                    self.history.create_product(product, event).await?;
                }
                Some(_) => self.history.append(serial, event).await?,
            }
            info!(
                target: "reconciliation",
                task_id = %task.id,
                serial = %serial,
                role = %event.role,
                actor = %actor.id,
                "Pending event recorded"
            );
            Resolution::Recorded {
                by: actor.id.clone(),
            }
        };

        self.reporter.resolve(&task.id, resolution);
        self.task(&task.id)
    }

    /// Close a task without writing history.
    ///
    /// For tasks the ledger refutes, such as an unconfirmed write that was
    /// dropped; the reason is kept on the task.
    pub async fn dismiss(
        &self,
        actor: &Actor,
        task_id: &str,
        reason: &str,
    ) -> Result<ReconciliationTask, CustodyError> {
        Self::require_admin(actor)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CustodyError::InvalidInput(
                "dismissal reason must not be empty".to_string(),
            ));
        }
        let Some((task, _guard)) = self.open_task_locked(task_id).await? else {
            return self.task(task_id);
        };

        warn!(
            target: "reconciliation",
            task_id = %task.id,
            serial = %task.serial,
            kind = task.kind.as_str(),
            actor = %actor.id,
            reason,
            "Reconciliation task dismissed without writing history"
        );
        self.reporter.resolve(
            &task.id,
            Resolution::Dismissed {
                by: actor.id.clone(),
                reason: reason.to_string(),
            },
        );
        self.task(&task.id)
    }

    fn task(&self, task_id: &str) -> Result<ReconciliationTask, CustodyError> {
        self.reporter
            .get(task_id)
            .ok_or_else(|| CustodyError::TaskNotFound(task_id.to_string()))
    }

    /// Fetch a task and take its serial lock; `None` if it is already closed.
    /// The task is read again under the lock so two operators cannot both act.
    async fn open_task_locked(
        &self,
        task_id: &str,
    ) -> Result<Option<(ReconciliationTask, SerialGuard)>, CustodyError> {
        let task = self.task(task_id)?;
        if task.is_resolved() {
            return Ok(None);
        }
        let guard = self.locks.acquire(&task.serial).await;
        let task = self.task(task_id)?;
        if task.is_resolved() {
            return Ok(None);
        }
        Ok(Some((task, guard)))
    }

    fn require_admin(actor: &Actor) -> Result<(), CustodyError> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(CustodyError::Unauthorized(
                "Only administrators can manage reconciliation tasks".to_string(),
            ))
        }
    }

    // ========================================================================
    // Ledger write helpers
    // ========================================================================

    /// Submit a write through the retry policy.
    ///
    /// An attempt that timed out may still have landed. If the write later
    /// fails for good after such an attempt, the live ledger status decides
    /// whether it landed; see [`Self::settle_ambiguous_write`].
    async fn write_with_retry<F, Fut>(
        &self,
        label: &'static str,
        serial: &SerialNumber,
        pending: &TransferEvent,
        product: Option<&Product>,
        write: F,
    ) -> Result<Receipt, CustodyError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Receipt, LedgerError>>,
    {
        let ambiguous = AtomicBool::new(false);
        let result = self
            .retry
            .run(
                label,
                |attempt| {
                    let pending_write = write();
                    let ambiguous = &ambiguous;
                    async move {
                        match pending_write.await {
                            // An earlier attempt landed but its response was lost
                            Err(LedgerError::Duplicate {
                                tx_hash: Some(tx_hash),
                            }) if attempt > 1 => {
                                warn!(
                                    serial = %serial,
                                    tx_hash = %tx_hash,
                                    attempt,
                                    "Ledger already holds this write, adopting it"
                                );
                                Ok(Receipt::pending(tx_hash))
                            }
                            Err(e) => {
                                if e.is_ambiguous() {
                                    ambiguous.store(true, Ordering::SeqCst);
                                }
                                Err(e)
                            }
                            Ok(receipt) => Ok(receipt),
                        }
                    }
                },
                |e: &LedgerError| e.fault_class(),
            )
            .await;

        let err = match result {
            Ok(receipt) => return Ok(receipt),
            Err(err) => err,
        };
        warn!(
            serial = %serial,
            op = label,
            attempts = err.attempts(),
            error = %err,
            "Ledger write failed"
        );
        if ambiguous.load(Ordering::SeqCst) {
            return Err(self.settle_ambiguous_write(serial, pending, product, err).await);
        }
        Err(ledger_failure(err))
    }

    /// Decide a failed write that an unanswered attempt may have applied.
    ///
    /// If the ledger already shows the write's target status, or cannot be
    /// read at all, the write is treated as possibly landed and handed to
    /// reconciliation. Otherwise the original failure stands.
    async fn settle_ambiguous_write(
        &self,
        serial: &SerialNumber,
        pending: &TransferEvent,
        product: Option<&Product>,
        err: RetryError<LedgerError>,
    ) -> CustodyError {
        let target = pending.role.ledger_status();
        let detail = match self.ledger_status(serial).await {
            Ok(Some(status)) if status == target => format!(
                "ledger shows {} after an unanswered attempt; last error after {} attempt(s): {}",
                status,
                err.attempts(),
                err
            ),
            Ok(_) => return ledger_failure(err),
            Err(read) => format!(
                "outcome unknown after {} attempt(s) ({}); status read failed: {}",
                err.attempts(),
                err,
                read
            ),
        };
        warn!(
            serial = %serial,
            target = %target,
            detail = %detail,
            "Ledger write may have landed without an answer"
        );
        self.open_unconfirmed(serial, pending, product, None, detail)
    }

    fn open_unconfirmed(
        &self,
        serial: &SerialNumber,
        pending: &TransferEvent,
        product: Option<&Product>,
        tx_hash: Option<String>,
        detail: String,
    ) -> CustodyError {
        let mut task = ReconciliationTask::new(
            serial.clone(),
            TaskKind::UnconfirmedWrite,
            pending.clone(),
            tx_hash,
            detail.clone(),
        );
        if let Some(product) = product {
            task = task.with_product(product.clone());
        }
        let task_id = task.id.clone();
        self.reporter.report(task);
        CustodyError::LedgerUnconfirmed {
            serial: serial.clone(),
            task_id,
            detail,
        }
    }

    async fn confirm(&self, receipt: Receipt) -> Result<Receipt, ConfirmFailure> {
        let policy = self.confirmation;
        let deadline = Instant::now() + policy.timeout;
        let mut current = receipt;
        let mut polls = 0u32;

        loop {
            if let Some(reason) = &current.reverted {
                return Err(ConfirmFailure::Reverted(reason.clone()));
            }
            if current.is_final(policy.required_confirmations) {
                return Ok(current);
            }
            if Instant::now() >= deadline {
                return Err(ConfirmFailure::Unconfirmed {
                    polls,
                    detail: format!(
                        "{} not confirmed within {:?} ({} confirmation(s))",
                        current.tx_hash, policy.timeout, current.confirmations
                    ),
                });
            }

            tokio::time::sleep(policy.poll_interval).await;
            polls += 1;
            match self.ledger.get_receipt(&current.tx_hash).await {
                Ok(next) => current = next,
                Err(e) if e.fault_class() == FaultClass::Retryable => {
                    debug!(tx_hash = %current.tx_hash, polls, error = %e, "Receipt poll failed");
                }
                Err(e) => {
                    return Err(ConfirmFailure::Unconfirmed {
                        polls,
                        detail: format!("receipt lookup for {} failed: {}", current.tx_hash, e),
                    });
                }
            }
        }
    }

    /// Confirm a receipt; an unconfirmed write is reported for reconciliation
    async fn confirm_or_report(
        &self,
        serial: &SerialNumber,
        receipt: Receipt,
        event: &TransferEvent,
        product: Option<&Product>,
    ) -> Result<Receipt, CustodyError> {
        let tx_hash = receipt.tx_hash.clone();
        match self.confirm(receipt).await {
            Ok(confirmed) => {
                debug!(
                    serial = %serial,
                    tx_hash = %tx_hash,
                    confirmations = confirmed.confirmations,
                    "Ledger write confirmed"
                );
                Ok(confirmed)
            }
            Err(ConfirmFailure::Reverted(reason)) => {
                warn!(serial = %serial, tx_hash = %tx_hash, reason = %reason, "Ledger write reverted");
                Err(CustodyError::LedgerTerminal { reason })
            }
            Err(ConfirmFailure::Unconfirmed { polls, detail }) => {
                warn!(serial = %serial, tx_hash = %tx_hash, polls, "Ledger write not confirmed");
                Err(self.open_unconfirmed(serial, event, product, Some(tx_hash), detail))
            }
        }
    }

    fn consistency_fault(&self, task: ReconciliationTask) -> CustodyError {
        let err = CustodyError::ConsistencyFault {
            serial: task.serial.clone(),
            task_id: task.id.clone(),
            detail: task.detail.clone(),
        };
        self.reporter.report(task);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::integration_tests::{Harness, actor, wallet};
    use crate::custody::types::ActorId;

    #[tokio::test]
    async fn test_unknown_serial_is_not_found() {
        let h = Harness::new();
        let a = actor("A", ActorRole::Manufacturer);
        let err = h
            .transfer(&a, "SN-404", CustodyRole::Supplier, "B")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(h.ledger.status_reads(), 0);
    }

    #[tokio::test]
    async fn test_preconditions_checked_in_order() {
        let h = Harness::new();
        let a = actor("A", ActorRole::Manufacturer);
        h.register(&a, "SN-1").await;
        let reads_after_register = h.ledger.status_reads();

        // Wrong actor and wrong role: custodian check comes first
        let b = actor("B", ActorRole::Supplier);
        let err = h
            .transfer(&b, "SN-1", CustodyRole::Retailer, "C")
            .await
            .unwrap_err();
        assert_eq!(err, CustodyError::not_custodian());

        // Right custodian, skipped role: rejected before the ledger is read
        let err = h
            .transfer(&a, "SN-1", CustodyRole::Retailer, "C")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CustodyError::InvalidTransition {
                requested: CustodyRole::Retailer,
                expected: Some(CustodyRole::Supplier),
            }
        );
        assert_eq!(err.to_string(), "Invalid next role retailer. Expected: supplier");
        assert_eq!(h.ledger.status_reads(), reads_after_register);
    }

    #[tokio::test]
    async fn test_blank_recipient_rejected_without_side_effects() {
        let h = Harness::new();
        let a = actor("A", ActorRole::Manufacturer);
        h.register(&a, "SN-1").await;
        let writes = h.ledger.write_attempts();

        let err = h
            .transfer(&a, "SN-1", CustodyRole::Supplier, "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(h.ledger.write_attempts(), writes);
    }

    #[tokio::test]
    async fn test_admin_cannot_transfer() {
        let h = Harness::new();
        let a = actor("A", ActorRole::Manufacturer);
        h.register(&a, "SN-1").await;

        let admin = actor("root", ActorRole::Admin);
        let err = h
            .transfer(&admin, "SN-1", CustodyRole::Supplier, "B")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let h = Harness::new();
        let supplier = actor("B", ActorRole::Supplier);
        let err = h
            .coordinator
            .register_product(
                &supplier,
                RegisterProduct {
                    serial_number: "SN-1".into(),
                    name: "Widget".into(),
                    signer: wallet("B"),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");

        let a = actor("A", ActorRole::Manufacturer);
        let err = h
            .coordinator
            .register_product(
                &a,
                RegisterProduct {
                    serial_number: "   ".into(),
                    name: "Widget".into(),
                    signer: wallet("A"),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(h.ledger.write_attempts(), 0);
    }

    #[tokio::test]
    async fn test_register_records_manufacturer_name() {
        let h = Harness::new();
        let a = actor("A", ActorRole::Manufacturer);
        let product = h.register(&a, "SN-1").await;

        assert_eq!(product.manufacturer_name, "A Corp");
        let history = h.coordinator.history(&product.serial_number).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, CustodyRole::Manufacturer);
        assert_eq!(history[0].actor_id, ActorId::new("A"));
    }

    #[tokio::test]
    async fn test_register_twice_is_already_registered() {
        let h = Harness::new();
        let a = actor("A", ActorRole::Manufacturer);
        h.register(&a, "SN-1").await;
        let writes = h.ledger.write_attempts();

        let err = h
            .coordinator
            .register_product(
                &a,
                RegisterProduct {
                    serial_number: "SN-1".into(),
                    name: "Widget".into(),
                    signer: wallet("A"),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_REGISTERED");
        assert_eq!(h.ledger.write_attempts(), writes);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_terminal() {
        let h = Harness::new();
        let a = actor("A", ActorRole::Manufacturer);
        h.register(&a, "SN-1").await;

        let coordinator = h.coordinator.clone();
        let receipt = Receipt {
            block_height: Some(3),
            confirmations: 5,
            reverted: Some("Invalid status transition".into()),
            ..Receipt::pending("0xdead")
        };
        let event = TransferEvent::new(CustodyRole::Supplier, ActorId::new("B"));
        let err = coordinator
            .confirm_or_report(&SerialNumber::parse("SN-1").unwrap(), receipt, &event, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CustodyError::LedgerTerminal {
                reason: "Invalid status transition".into()
            }
        );
        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_ledger_failure_mapping() {
        let terminal = ledger_failure(RetryError::Terminal {
            attempt: 1,
            error: LedgerError::Rejected {
                reason: "Product already registered".into(),
            },
        });
        assert_eq!(
            terminal,
            CustodyError::LedgerTerminal {
                reason: "Product already registered".into()
            }
        );

        let exhausted = ledger_failure(RetryError::Exhausted {
            attempts: 3,
            last: LedgerError::Provider("Internal JSON-RPC error".into()),
        });
        assert!(exhausted.is_retryable_by_caller());
        assert_eq!(
            exhausted.public_message(),
            "Ledger unavailable after 3 attempt(s): Network or provider error. Please try again."
        );
    }
}
