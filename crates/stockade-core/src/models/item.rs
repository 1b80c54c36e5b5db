use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Sale item entity
///
/// `stock` is the total units still sellable, `reserved_stock` the units held
/// by live PENDING reservations, and `available_stock` the stored denormalized
/// difference. `available_stock == stock - reserved_stock` must hold at every
/// transaction boundary; the ledger is the only writer of these three fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub reserved_stock: i32,
    pub available_stock: i32,
    pub status: ItemStatus,
    pub sale_start_date: Option<DateTime<Utc>>,
    pub sale_end_date: Option<DateTime<Utc>>,
    pub max_per_user: i32,
    /// Audit/epoch counter, bumped on every ledger mutation. Not a CAS
    /// primitive; row locks serialize writers.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Whether the stored `available_stock` matches `stock - reserved_stock`
    pub fn is_consistent(&self) -> bool {
        self.available_stock == self.stock - self.reserved_stock
    }

    /// Whether reservations may be placed at `now` (status + sale window)
    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        if self.status != ItemStatus::Active {
            return false;
        }
        if let Some(start) = self.sale_start_date {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.sale_end_date {
            if now > end {
                return false;
            }
        }
        true
    }

    pub fn is_sold_out(&self) -> bool {
        self.stock == 0 || self.status == ItemStatus::SoldOut
    }
}

/// Item lifecycle status, managed by admin flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Active,
    Inactive,
    SoldOut,
    OutOfStock,
}

impl Default for ItemStatus {
    fn default() -> Self {
        ItemStatus::Active
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Active => "ACTIVE",
            ItemStatus::Inactive => "INACTIVE",
            ItemStatus::SoldOut => "SOLD_OUT",
            ItemStatus::OutOfStock => "OUT_OF_STOCK",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample_item() -> Item {
        let now = Utc::now();
        Item {
            id: Uuid::new_v4(),
            sku: "FLASH-001".to_string(),
            name: "Limited Sneaker".to_string(),
            description: None,
            price: dec!(129.99),
            stock: 10,
            reserved_stock: 3,
            available_stock: 7,
            status: ItemStatus::Active,
            sale_start_date: Some(now - Duration::hours(1)),
            sale_end_date: Some(now + Duration::hours(1)),
            max_per_user: 2,
            version: 4,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_consistency_check() {
        let mut item = sample_item();
        assert!(item.is_consistent());

        item.available_stock = 6;
        assert!(!item.is_consistent());
    }

    #[test]
    fn test_sale_window() {
        let now = Utc::now();
        let mut item = sample_item();
        assert!(item.is_on_sale(now));

        item.sale_start_date = Some(now + Duration::minutes(5));
        assert!(!item.is_on_sale(now));

        item.sale_start_date = None;
        item.sale_end_date = Some(now - Duration::minutes(5));
        assert!(!item.is_on_sale(now));

        item.sale_end_date = None;
        item.status = ItemStatus::Inactive;
        assert!(!item.is_on_sale(now));
    }
}
