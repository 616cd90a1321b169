//! PostgreSQL History Store
//!
//! Appends run inside a transaction that locks the product row, so the
//! order check and the insert see the same last event. The unique
//! `(serial_number, role)` constraint backs the "no role twice" rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

use super::{HistoryError, HistoryStore, check_append_order};
use crate::custody::state::CustodyRole;
use crate::custody::types::{ActorId, Product, SerialNumber, TransferEvent};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS custody_products_tb (
        serial_number     TEXT PRIMARY KEY,
        name              TEXT NOT NULL,
        manufacturer_name TEXT NOT NULL,
        registered_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS custody_events_tb (
        id            BIGSERIAL PRIMARY KEY,
        serial_number TEXT NOT NULL REFERENCES custody_products_tb(serial_number),
        seq           SMALLINT NOT NULL,
        role          SMALLINT NOT NULL,
        actor_id      TEXT NOT NULL,
        occurred_at   TIMESTAMPTZ NOT NULL,
        UNIQUE (serial_number, seq),
        UNIQUE (serial_number, role)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS custody_events_actor_idx
        ON custody_events_tb (actor_id, role)
    "#,
];

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if missing
    pub async fn init_schema(&self) -> Result<(), HistoryError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        info!("Custody history schema ready");
        Ok(())
    }

    fn row_to_event(serial: &SerialNumber, row: &PgRow) -> Result<TransferEvent, HistoryError> {
        let role_id: i16 = row.try_get("role")?;
        let role = CustodyRole::from_id(role_id).ok_or_else(|| HistoryError::Corrupt {
            serial: serial.clone(),
            detail: format!("unknown role id {}", role_id),
        })?;
        let actor_id: String = row.try_get("actor_id")?;
        let occurred_at: DateTime<Utc> = row.try_get("occurred_at")?;
        Ok(TransferEvent {
            role,
            actor_id: ActorId::new(actor_id),
            occurred_at,
        })
    }

    fn row_to_product(row: &PgRow) -> Result<Product, HistoryError> {
        let serial: String = row.try_get("serial_number")?;
        let serial_number = SerialNumber::parse(&serial).ok_or_else(|| {
            HistoryError::Database("blank serial_number in custody_products_tb".into())
        })?;
        Ok(Product {
            serial_number,
            name: row.try_get("name")?,
            manufacturer_name: row.try_get("manufacturer_name")?,
            registered_at: row.try_get("registered_at")?,
        })
    }

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn create_product(
        &self,
        product: &Product,
        first_event: &TransferEvent,
    ) -> Result<(), HistoryError> {
        let serial = &product.serial_number;
        check_append_order(serial, None, first_event)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO custody_products_tb (serial_number, name, manufacturer_name, registered_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(serial.as_str())
        .bind(&product.name)
        .bind(&product.manufacturer_name)
        .bind(product.registered_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if Self::is_unique_violation(&e) {
                return Err(HistoryError::AlreadyRegistered(serial.clone()));
            }
            return Err(e.into());
        }

        sqlx::query(
            r#"
            INSERT INTO custody_events_tb (serial_number, seq, role, actor_id, occurred_at)
            VALUES ($1, 1, $2, $3, $4)
            "#,
        )
        .bind(serial.as_str())
        .bind(first_event.role.id())
        .bind(first_event.actor_id.as_str())
        .bind(first_event.occurred_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append(
        &self,
        serial: &SerialNumber,
        event: &TransferEvent,
    ) -> Result<(), HistoryError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent appenders across coordinator instances
        let exists = sqlx::query(
            "SELECT serial_number FROM custody_products_tb WHERE serial_number = $1 FOR UPDATE",
        )
        .bind(serial.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(HistoryError::NotFound(serial.clone()));
        }

        let last = sqlx::query(
            r#"
            SELECT seq, role, actor_id, occurred_at
            FROM custody_events_tb
            WHERE serial_number = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(serial.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let (last_seq, last_event) = match last {
            Some(row) => {
                let seq: i16 = row.try_get("seq")?;
                (seq, Some(Self::row_to_event(serial, &row)?))
            }
            None => (0, None),
        };
        check_append_order(serial, last_event.as_ref(), event)?;

        sqlx::query(
            r#"
            INSERT INTO custody_events_tb (serial_number, seq, role, actor_id, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(serial.as_str())
        .bind(last_seq + 1)
        .bind(event.role.id())
        .bind(event.actor_id.as_str())
        .bind(event.occurred_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_history(&self, serial: &SerialNumber) -> Result<Vec<TransferEvent>, HistoryError> {
        let rows = sqlx::query(
            r#"
            SELECT role, actor_id, occurred_at
            FROM custody_events_tb
            WHERE serial_number = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(serial.as_str())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(HistoryError::NotFound(serial.clone()));
        }
        rows.iter()
            .map(|row| Self::row_to_event(serial, row))
            .collect()
    }

    async fn get_last_event(&self, serial: &SerialNumber) -> Result<TransferEvent, HistoryError> {
        let row = sqlx::query(
            r#"
            SELECT role, actor_id, occurred_at
            FROM custody_events_tb
            WHERE serial_number = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(serial.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_event(serial, &row),
            None => Err(HistoryError::NotFound(serial.clone())),
        }
    }

    async fn get_product(&self, serial: &SerialNumber) -> Result<Product, HistoryError> {
        let row = sqlx::query(
            r#"
            SELECT serial_number, name, manufacturer_name, registered_at
            FROM custody_products_tb
            WHERE serial_number = $1
            "#,
        )
        .bind(serial.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_product(&row),
            None => Err(HistoryError::NotFound(serial.clone())),
        }
    }

    async fn products_for_actor(
        &self,
        actor_id: &ActorId,
        role: CustodyRole,
    ) -> Result<Vec<Product>, HistoryError> {
        let rows = sqlx::query(
            r#"
            SELECT p.serial_number, p.name, p.manufacturer_name, p.registered_at
            FROM custody_products_tb p
            JOIN custody_events_tb e ON e.serial_number = p.serial_number
            WHERE e.actor_id = $1 AND e.role = $2
            ORDER BY p.registered_at ASC
            "#,
        )
        .bind(actor_id.as_str())
        .bind(role.id())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_product).collect()
    }
}
