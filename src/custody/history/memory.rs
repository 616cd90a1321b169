//! In-memory History Store
//!
//! Used when no PostgreSQL URL is configured, and by tests. Supports fault
//! injection on `append` to exercise consistency-fault handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{HistoryError, HistoryStore, check_append_order};
use crate::custody::state::CustodyRole;
use crate::custody::types::{ActorId, Product, SerialNumber, TransferEvent};

struct Entry {
    product: Product,
    events: Vec<TransferEvent>,
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: RwLock<HashMap<SerialNumber, Entry>>,
    /// Registration order, for stable listings
    order: RwLock<Vec<SerialNumber>>,
    fail_append: AtomicBool,
    fail_create: AtomicBool,
    append_count: AtomicUsize,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append` fail with `Unavailable`
    pub fn set_fail_append(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `create_product` fail with `Unavailable`
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Number of successful appends (registration excluded)
    pub fn append_count(&self) -> usize {
        self.append_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_product(
        &self,
        product: &Product,
        first_event: &TransferEvent,
    ) -> Result<(), HistoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HistoryError::Unavailable("injected create failure".into()));
        }

        let serial = &product.serial_number;
        check_append_order(serial, None, first_event)?;

        let mut entries = self.entries.write().await;
        if entries.contains_key(serial) {
            return Err(HistoryError::AlreadyRegistered(serial.clone()));
        }
        entries.insert(
            serial.clone(),
            Entry {
                product: product.clone(),
                events: vec![first_event.clone()],
            },
        );
        self.order.write().await.push(serial.clone());
        Ok(())
    }

    async fn append(
        &self,
        serial: &SerialNumber,
        event: &TransferEvent,
    ) -> Result<(), HistoryError> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(HistoryError::Unavailable("injected append failure".into()));
        }

        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(serial)
            .ok_or_else(|| HistoryError::NotFound(serial.clone()))?;
        check_append_order(serial, entry.events.last(), event)?;
        entry.events.push(event.clone());
        self.append_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_history(&self, serial: &SerialNumber) -> Result<Vec<TransferEvent>, HistoryError> {
        self.entries
            .read()
            .await
            .get(serial)
            .map(|e| e.events.clone())
            .ok_or_else(|| HistoryError::NotFound(serial.clone()))
    }

    async fn get_last_event(&self, serial: &SerialNumber) -> Result<TransferEvent, HistoryError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(serial)
            .ok_or_else(|| HistoryError::NotFound(serial.clone()))?;
        entry.events.last().cloned().ok_or_else(|| HistoryError::Corrupt {
            serial: serial.clone(),
            detail: "empty history".into(),
        })
    }

    async fn get_product(&self, serial: &SerialNumber) -> Result<Product, HistoryError> {
        self.entries
            .read()
            .await
            .get(serial)
            .map(|e| e.product.clone())
            .ok_or_else(|| HistoryError::NotFound(serial.clone()))
    }

    async fn products_for_actor(
        &self,
        actor_id: &ActorId,
        role: CustodyRole,
    ) -> Result<Vec<Product>, HistoryError> {
        let entries = self.entries.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|serial| entries.get(serial))
            .filter(|e| {
                e.events
                    .iter()
                    .any(|ev| ev.role == role && &ev.actor_id == actor_id)
            })
            .map(|e| e.product.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(serial: &str) -> Product {
        Product {
            serial_number: SerialNumber::parse(serial).unwrap(),
            name: "Widget".into(),
            manufacturer_name: "Acme".into(),
            registered_at: Utc::now(),
        }
    }

    fn event(role: CustodyRole, actor: &str) -> TransferEvent {
        TransferEvent::new(role, ActorId::new(actor))
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let store = InMemoryHistoryStore::new();
        let p = product("SN-1");
        let serial = p.serial_number.clone();

        store
            .create_product(&p, &event(CustodyRole::Manufacturer, "A"))
            .await
            .unwrap();
        store
            .append(&serial, &event(CustodyRole::Supplier, "B"))
            .await
            .unwrap();

        let last = store.get_last_event(&serial).await.unwrap();
        assert_eq!(last.role, CustodyRole::Supplier);
        assert_eq!(last.actor_id, ActorId::new("B"));
        assert_eq!(store.get_history(&serial).await.unwrap().len(), 2);
        assert_eq!(store.append_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let store = InMemoryHistoryStore::new();
        let p = product("SN-1");
        store
            .create_product(&p, &event(CustodyRole::Manufacturer, "A"))
            .await
            .unwrap();

        let err = store
            .create_product(&p, &event(CustodyRole::Manufacturer, "A"))
            .await
            .unwrap_err();
        assert_eq!(err, HistoryError::AlreadyRegistered(p.serial_number));
    }

    #[tokio::test]
    async fn test_append_rejects_repeated_role_and_unknown_serial() {
        let store = InMemoryHistoryStore::new();
        let p = product("SN-1");
        let serial = p.serial_number.clone();
        store
            .create_product(&p, &event(CustodyRole::Manufacturer, "A"))
            .await
            .unwrap();

        let dup = store
            .append(&serial, &event(CustodyRole::Manufacturer, "A"))
            .await;
        assert!(matches!(dup, Err(HistoryError::OutOfOrder { .. })));

        let unknown = SerialNumber::parse("SN-404").unwrap();
        let missing = store
            .append(&unknown, &event(CustodyRole::Supplier, "B"))
            .await;
        assert_eq!(missing, Err(HistoryError::NotFound(unknown)));
    }

    #[tokio::test]
    async fn test_products_for_actor() {
        let store = InMemoryHistoryStore::new();
        for serial in ["SN-1", "SN-2", "SN-3"] {
            store
                .create_product(&product(serial), &event(CustodyRole::Manufacturer, "A"))
                .await
                .unwrap();
        }
        let sn2 = SerialNumber::parse("SN-2").unwrap();
        store
            .append(&sn2, &event(CustodyRole::Supplier, "B"))
            .await
            .unwrap();

        let a = store
            .products_for_actor(&ActorId::new("A"), CustodyRole::Manufacturer)
            .await
            .unwrap();
        assert_eq!(a.len(), 3);

        let b = store
            .products_for_actor(&ActorId::new("B"), CustodyRole::Supplier)
            .await
            .unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].serial_number, sn2);

        // Same id under a different role does not match
        let a_as_supplier = store
            .products_for_actor(&ActorId::new("A"), CustodyRole::Supplier)
            .await
            .unwrap();
        assert!(a_as_supplier.is_empty());
    }

    #[tokio::test]
    async fn test_injected_append_failure() {
        let store = InMemoryHistoryStore::new();
        let p = product("SN-1");
        store
            .create_product(&p, &event(CustodyRole::Manufacturer, "A"))
            .await
            .unwrap();

        store.set_fail_append(true);
        let result = store
            .append(&p.serial_number, &event(CustodyRole::Supplier, "B"))
            .await;
        assert!(matches!(result, Err(HistoryError::Unavailable(_))));
        assert_eq!(store.get_history(&p.serial_number).await.unwrap().len(), 1);
    }
}
