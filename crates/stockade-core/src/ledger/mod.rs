//! Stock ledger: the sole mutator of item stock counts
//!
//! Every mutation runs inside a caller-supplied database transaction and
//! starts with a row-level exclusive lock (`SELECT ... FOR UPDATE`) on the
//! item, which is the serialization primitive for stock correctness. The
//! ledger never retries; callers decide.
//!
//! `bulk_reserve` acquires locks in ascending item id order. Callers touching
//! multiple items outside of `bulk_reserve` must do the same or risk
//! deadlock.

use sqlx::{Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::models::Item;
use crate::{Error, Result};

/// Exclusive authority over `(stock, reserved_stock, available_stock, version)`
#[derive(Clone)]
pub struct StockLedger {
    db: Database,
}

impl StockLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Credit `quantity` units to `reserved_stock`
    ///
    /// Preconditions: item exists and is on sale, `available_stock >= quantity`.
    pub async fn reserve(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Item> {
        ensure_positive(quantity)?;

        let item = lock_item(tx, item_id).await?;

        let now = chrono::Utc::now();
        if !item.is_on_sale(now) {
            return Err(Error::unavailable(format!(
                "item {} is not open for reservations (status {})",
                item.sku, item.status
            )));
        }

        reserve_guard(item.available_stock, quantity)?;

        let updated = write_counts(tx, item_id, item.stock, item.reserved_stock + quantity).await?;

        debug!(
            item_id = %item_id,
            quantity,
            available = updated.available_stock,
            "Reserved stock"
        );

        Ok(updated)
    }

    /// Return up to `quantity` units from `reserved_stock`
    ///
    /// Clamps to the currently reserved amount; never persists a negative
    /// value.
    pub async fn release(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Item> {
        ensure_positive(quantity)?;

        let item = lock_item(tx, item_id).await?;

        let released = clamp_release(item.reserved_stock, quantity);
        if released < quantity {
            warn!(
                item_id = %item_id,
                requested = quantity,
                released,
                "Release clamped to reserved stock"
            );
        }

        let updated = write_counts(tx, item_id, item.stock, item.reserved_stock - released).await?;

        debug!(item_id = %item_id, released, "Released stock");

        Ok(updated)
    }

    /// Consume `quantity` reserved units: decrements both `stock` and
    /// `reserved_stock`
    pub async fn confirm(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Item> {
        ensure_positive(quantity)?;

        let item = lock_item(tx, item_id).await?;

        confirm_guard(item.stock, item.reserved_stock, quantity)?;

        let updated =
            write_counts(tx, item_id, item.stock - quantity, item.reserved_stock - quantity)
                .await?;

        debug!(
            item_id = %item_id,
            quantity,
            stock = updated.stock,
            "Confirmed stock"
        );

        Ok(updated)
    }

    /// Atomic multi-item reserve
    ///
    /// Item ids must be distinct. Locks are acquired in ascending id order so
    /// two concurrent bulk reservations touching the same pair of items can
    /// never deadlock. Any failure leaves the caller's transaction poisoned;
    /// the caller rolls back and nothing is reserved.
    pub async fn bulk_reserve(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        requests: &[(Uuid, i32)],
    ) -> Result<Vec<Item>> {
        if requests.is_empty() {
            return Err(Error::validation("bulk reserve requires at least one item"));
        }

        let mut seen = std::collections::HashSet::with_capacity(requests.len());
        for (item_id, _) in requests {
            if !seen.insert(*item_id) {
                return Err(Error::validation(format!(
                    "duplicate item {} in bulk reserve",
                    item_id
                )));
            }
        }

        let mut ordered: Vec<(Uuid, i32)> = requests.to_vec();
        ordered.sort_by_key(|(item_id, _)| *item_id);

        let mut items = Vec::with_capacity(ordered.len());
        for (item_id, quantity) in ordered {
            items.push(self.reserve(tx, item_id, quantity).await?);
        }

        Ok(items)
    }

    /// Find every item whose stored `available_stock` has drifted from
    /// `stock - reserved_stock`
    pub async fn check_consistency(&self) -> Result<Vec<StockInconsistency>> {
        let items = sqlx::query_as::<_, Item>(
            r#"
            SELECT * FROM items
            WHERE available_stock <> stock - reserved_stock
              AND deleted_at IS NULL
            ORDER BY sku
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(items
            .into_iter()
            .map(|item| StockInconsistency {
                item_id: item.id,
                sku: item.sku,
                stock: item.stock,
                reserved_stock: item.reserved_stock,
                available_stock: item.available_stock,
                expected_available: item.stock - item.reserved_stock,
            })
            .collect())
    }

    /// Repair drifted rows by recomputing `available_stock`
    ///
    /// Operator recovery only; returns the number of rows rewritten.
    pub async fn fix_consistency(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET available_stock = stock - reserved_stock,
                version = version + 1,
                updated_at = NOW()
            WHERE available_stock <> stock - reserved_stock
              AND deleted_at IS NULL
            "#,
        )
        .execute(self.db.pool())
        .await?;

        let fixed = result.rows_affected();
        if fixed > 0 {
            warn!(fixed, "Repaired inconsistent stock rows");
        }

        Ok(fixed)
    }

    /// Non-locking read, outside of any transaction
    pub async fn get_item(&self, item_id: Uuid) -> Result<Item> {
        sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1 AND deleted_at IS NULL")
            .bind(item_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| Error::not_found(format!("Item {} not found", item_id)))
    }
}

/// One row violating the stock identity
#[derive(Debug, Clone, serde::Serialize)]
pub struct StockInconsistency {
    pub item_id: Uuid,
    pub sku: String,
    pub stock: i32,
    pub reserved_stock: i32,
    pub available_stock: i32,
    pub expected_available: i32,
}

/// Lock the item row for the remainder of the transaction
async fn lock_item(tx: &mut Transaction<'_, Postgres>, item_id: Uuid) -> Result<Item> {
    sqlx::query_as::<_, Item>(
        "SELECT * FROM items WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("Item {} not found", item_id)))
}

/// Persist new counts, recomputing `available_stock` and bumping `version`
async fn write_counts(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
    stock: i32,
    reserved_stock: i32,
) -> Result<Item> {
    let item = sqlx::query_as::<_, Item>(
        r#"
        UPDATE items
        SET stock = $2,
            reserved_stock = $3,
            available_stock = $2 - $3,
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(stock)
    .bind(reserved_stock)
    .fetch_one(&mut **tx)
    .await?;

    Ok(item)
}

fn ensure_positive(quantity: i32) -> Result<()> {
    if quantity < 1 {
        return Err(Error::validation("quantity must be >= 1"));
    }
    Ok(())
}

fn reserve_guard(available: i32, quantity: i32) -> Result<()> {
    if available < quantity {
        return Err(Error::InsufficientStock {
            requested: quantity,
            available,
        });
    }
    Ok(())
}

fn clamp_release(reserved: i32, quantity: i32) -> i32 {
    quantity.min(reserved)
}

fn confirm_guard(stock: i32, reserved: i32, quantity: i32) -> Result<()> {
    if reserved < quantity {
        return Err(Error::NotEnoughReserved {
            requested: quantity,
            reserved,
        });
    }
    if stock < quantity {
        return Err(Error::InsufficientStock {
            requested: quantity,
            available: stock,
        });
    }
    Ok(())
}
