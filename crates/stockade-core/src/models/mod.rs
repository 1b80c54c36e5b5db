//! Domain entities shared across the core

pub mod item;
pub mod reservation;

pub use item::{Item, ItemStatus};
pub use reservation::{NewReservation, Reservation, ReservationFilter, ReservationStatus};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Pagination {
    #[validate(range(min = 1))]
    pub page: i64,

    #[validate(range(min = 1, max = 100))]
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl Pagination {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        if total == 0 {
            0
        } else {
            (total + self.limit - 1) / self.limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offset() {
        let p = Pagination { page: 3, limit: 20 };
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn test_pagination_total_pages() {
        let p = Pagination { page: 1, limit: 20 };
        assert_eq!(p.total_pages(0), 0);
        assert_eq!(p.total_pages(20), 1);
        assert_eq!(p.total_pages(21), 2);
    }
}
