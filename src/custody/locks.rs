//! Per-serial mutual exclusion
//!
//! The read-check-write-append sequence for one serial must be serialized;
//! different serials never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::types::SerialNumber;

/// Idle entries are pruned once the table grows past this size
const PRUNE_THRESHOLD: usize = 4096;

/// Guard held for the whole custody critical section of one serial.
///
/// Owned (not borrowed) so it can move into a spawned task.
pub type SerialGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct SerialLocks {
    locks: DashMap<SerialNumber, Arc<Mutex<()>>>,
}

impl SerialLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `serial`
    pub async fn acquire(&self, serial: &SerialNumber) -> SerialGuard {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let lock = self
            .locks
            .entry(serial.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        lock.lock_owned().await
    }

    /// Drop entries nobody holds or waits on
    pub fn prune(&self) {
        let before = self.locks.len();
        self.locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        debug!(before, after = self.locks.len(), "Pruned serial locks");
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sn(s: &str) -> SerialNumber {
        SerialNumber::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_same_serial_is_exclusive() {
        let locks = Arc::new(SerialLocks::new());
        let guard = locks.acquire(&sn("SN-1")).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&sn("SN-1")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender acquires after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_serials_do_not_contend() {
        let locks = SerialLocks::new();
        let _a = locks.acquire(&sn("SN-1")).await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(&sn("SN-2"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = SerialLocks::new();
        let held = locks.acquire(&sn("SN-1")).await;
        drop(locks.acquire(&sn("SN-2")).await);

        locks.prune();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
