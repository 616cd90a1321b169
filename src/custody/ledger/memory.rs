//! In-memory Ledger
//!
//! Stands in for the external ledger in development mode and tests. It
//! enforces the same contract rules as the real one (no duplicate
//! registration, transitions must follow the status table, exact duplicate
//! submissions are rejected) and offers fault injection in the style of a
//! mock service adapter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{LedgerError, LedgerGateway, Receipt, Signer};
use crate::custody::state::LedgerStatus;
use crate::custody::types::SerialNumber;

#[derive(Debug, Clone)]
struct ProductRecord {
    status: LedgerStatus,
    #[allow(dead_code)]
    name: String,
    #[allow(dead_code)]
    manufacturer: String,
}

#[derive(Debug, Clone)]
struct TxRecord {
    block_height: Option<u64>,
    confirmations: u32,
}

#[derive(Default)]
struct Inner {
    products: HashMap<SerialNumber, ProductRecord>,
    txs: HashMap<String, TxRecord>,
    /// (serial, status label) -> tx hash, for duplicate detection
    submissions: HashMap<(SerialNumber, &'static str), String>,
    height: u64,
    next_tx: u64,
}

pub struct InMemoryLedger {
    inner: Mutex<Inner>,
    // === Fault injection ===
    /// Retryable failures to return before touching state
    fail_writes: AtomicU32,
    /// Writes to apply whose response is then lost (reported as timeout)
    drop_write_responses: AtomicU32,
    fail_reads: AtomicU32,
    reject_writes: Mutex<Option<String>>,
    never_finalize: AtomicBool,
    /// Off: a repeated submission is judged by the contract rules alone
    detect_duplicates: AtomicBool,
    // === Counters ===
    write_attempts: AtomicUsize,
    status_reads: AtomicUsize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fail_writes: AtomicU32::new(0),
            drop_write_responses: AtomicU32::new(0),
            fail_reads: AtomicU32::new(0),
            reject_writes: Mutex::new(None),
            never_finalize: AtomicBool::new(false),
            detect_duplicates: AtomicBool::new(true),
            write_attempts: AtomicUsize::new(0),
            status_reads: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the map is still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next `n` writes fail with a retryable network error
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Next `n` writes are applied but answered with a timeout
    pub fn drop_next_write_responses(&self, n: u32) {
        self.drop_write_responses.store(n, Ordering::SeqCst);
    }

    /// Next `n` status reads fail with a retryable network error
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Reject every write with the given revert reason (`None` to clear)
    pub fn set_reject_writes(&self, reason: Option<&str>) {
        *self
            .reject_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }

    /// Keep every receipt pending forever
    pub fn set_never_finalize(&self, never: bool) {
        self.never_finalize.store(never, Ordering::SeqCst);
    }

    /// Turn exact-duplicate detection off, so a resubmitted write reverts
    /// on the contract rules ("Invalid status transition", "Product already
    /// registered") like on a ledger without replay protection
    pub fn set_duplicate_detection(&self, enabled: bool) {
        self.detect_duplicates.store(enabled, Ordering::SeqCst);
    }

    /// Simulate another client moving the ledger behind our back
    pub fn force_status(&self, serial: &SerialNumber, status: LedgerStatus) {
        let mut inner = self.lock();
        match inner.products.get_mut(serial) {
            Some(record) => record.status = status,
            None => {
                inner.products.insert(
                    serial.clone(),
                    ProductRecord {
                        status,
                        name: String::new(),
                        manufacturer: String::new(),
                    },
                );
            }
        }
    }

    /// Current status without going through the gateway (no fault injection)
    pub fn status_of(&self, serial: &SerialNumber) -> Option<LedgerStatus> {
        self.lock().products.get(serial).map(|r| r.status)
    }

    /// Number of write invocations, including failed ones
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_signer(signer: &Signer) -> Result<(), LedgerError> {
        match signer {
            Signer::WalletSession { address } if address.trim().is_empty() => Err(
                LedgerError::SignatureRejected("empty wallet address".into()),
            ),
            Signer::RawKey { secret } if secret.trim().is_empty() => {
                Err(LedgerError::SignatureRejected("empty signing key".into()))
            }
            _ => Ok(()),
        }
    }

    /// Common write path: pre-checks, apply, record tx
    fn write<F>(
        &self,
        serial: &SerialNumber,
        label: &'static str,
        signer: &Signer,
        apply: F,
    ) -> Result<Receipt, LedgerError>
    where
        F: FnOnce(&mut Inner) -> Result<(), LedgerError>,
    {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        if Self::take_one(&self.fail_writes) {
            return Err(LedgerError::Network("injected network failure".into()));
        }
        if let Some(reason) = self
            .reject_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(LedgerError::Rejected { reason });
        }
        Self::check_signer(signer)?;

        let mut inner = self.lock();
        let key = (serial.clone(), label);
        if self.detect_duplicates.load(Ordering::SeqCst)
            && let Some(tx_hash) = inner.submissions.get(&key)
        {
            return Err(LedgerError::Duplicate {
                tx_hash: Some(tx_hash.clone()),
            });
        }

        apply(&mut inner)?;

        inner.next_tx += 1;
        let tx_hash = format!("0x{:064x}", inner.next_tx);
        let finalize = !self.never_finalize.load(Ordering::SeqCst);
        let block_height = if finalize {
            inner.height += 1;
            Some(inner.height)
        } else {
            None
        };
        inner.txs.insert(
            tx_hash.clone(),
            TxRecord {
                block_height,
                confirmations: 0,
            },
        );
        inner.submissions.insert(key, tx_hash.clone());
        drop(inner);

        debug!(serial = %serial, label, tx_hash = %tx_hash, "Ledger write accepted");

        if Self::take_one(&self.drop_write_responses) {
            return Err(LedgerError::Timeout("injected lost response".into()));
        }
        Ok(Receipt::pending(tx_hash))
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_status(&self, serial: &SerialNumber) -> Result<Option<LedgerStatus>, LedgerError> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.fail_reads) {
            return Err(LedgerError::Network("injected read failure".into()));
        }
        Ok(self.status_of(serial))
    }

    async fn register_product(
        &self,
        serial: &SerialNumber,
        name: &str,
        manufacturer: &str,
        signer: &Signer,
    ) -> Result<Receipt, LedgerError> {
        let label = LedgerStatus::Manufactured.as_str();
        self.write(serial, label, signer, |inner| {
            if inner.products.contains_key(serial) {
                return Err(LedgerError::Rejected {
                    reason: "Product already registered".into(),
                });
            }
            inner.products.insert(
                serial.clone(),
                ProductRecord {
                    status: LedgerStatus::Manufactured,
                    name: name.to_string(),
                    manufacturer: manufacturer.to_string(),
                },
            );
            Ok(())
        })
    }

    async fn submit_transition(
        &self,
        serial: &SerialNumber,
        target: LedgerStatus,
        signer: &Signer,
    ) -> Result<Receipt, LedgerError> {
        self.write(serial, target.as_str(), signer, |inner| {
            let record = inner
                .products
                .get_mut(serial)
                .ok_or_else(|| LedgerError::Rejected {
                    reason: "Product does not exist".into(),
                })?;
            if !record.status.permits(target) {
                return Err(LedgerError::Rejected {
                    reason: "Invalid status transition".into(),
                });
            }
            record.status = target;
            Ok(())
        })
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Receipt, LedgerError> {
        let never_finalize = self.never_finalize.load(Ordering::SeqCst);
        let mut inner = self.lock();
        let height = inner.height;
        let tx = inner
            .txs
            .get_mut(tx_hash)
            .ok_or_else(|| LedgerError::ReceiptUnavailable(tx_hash.to_string()))?;

        if never_finalize {
            return Ok(Receipt::pending(tx_hash));
        }
        let block = match tx.block_height {
            Some(b) => b,
            None => {
                tx.block_height = Some(height);
                height
            }
        };
        // Each poll observes one more block on top of the including one
        tx.confirmations = tx.confirmations.saturating_add(1);
        Ok(Receipt {
            tx_hash: tx_hash.to_string(),
            block_height: Some(block),
            confirmations: tx.confirmations,
            reverted: None,
        })
    }
}
