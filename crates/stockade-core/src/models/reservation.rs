use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer hold on a quantity of an item
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: Uuid,
    pub reservation_code: String,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub status: ReservationStatus,
    /// Only meaningful while PENDING; `created_at + hold duration`
    pub expires_at: DateTime<Utc>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && self.expires_at <= now
    }
}

/// Reservation lifecycle status
///
/// PENDING is the only non-terminal state; the permitted transitions are
/// PENDING -> CONFIRMED | CANCELLED | EXPIRED and nothing else. Legacy
/// producers emitted "BOOKED" for confirmed holds; it is accepted on decode
/// and never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    #[serde(alias = "BOOKED")]
    Confirmed,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    /// Whether `self -> target` is a legal state-machine edge
    pub fn can_transition_to(&self, target: ReservationStatus) -> bool {
        *self == ReservationStatus::Pending && target.is_terminal()
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Insert payload for a new reservation
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub reservation_code: String,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// Query filter for reservation listings
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub user_id: Option<Uuid>,
    pub item_id: Option<Uuid>,
    pub status: Option<ReservationStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transition_legality() {
        let pending = ReservationStatus::Pending;
        assert!(pending.can_transition_to(ReservationStatus::Confirmed));
        assert!(pending.can_transition_to(ReservationStatus::Cancelled));
        assert!(pending.can_transition_to(ReservationStatus::Expired));
        assert!(!pending.can_transition_to(ReservationStatus::Pending));

        // Terminal states have no outgoing edges
        for terminal in [
            ReservationStatus::Confirmed,
            ReservationStatus::Expired,
            ReservationStatus::Cancelled,
        ] {
            for target in [
                ReservationStatus::Pending,
                ReservationStatus::Confirmed,
                ReservationStatus::Expired,
                ReservationStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_legacy_booked_alias() {
        let status: ReservationStatus = serde_json::from_str("\"BOOKED\"").unwrap();
        assert_eq!(status, ReservationStatus::Confirmed);

        // Never emitted on encode
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Confirmed).unwrap(),
            "\"CONFIRMED\""
        );
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let res = Reservation {
            id: Uuid::new_v4(),
            reservation_code: "RSV-20260801-TEST01".to_string(),
            user_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            quantity: 1,
            unit_price: Decimal::new(999, 2),
            total_price: Decimal::new(999, 2),
            status: ReservationStatus::Pending,
            expires_at: now - chrono::Duration::seconds(1),
            cancellation_reason: None,
            created_at: now - chrono::Duration::minutes(10),
            updated_at: now - chrono::Duration::minutes(10),
        };
        assert!(res.is_expired_at(now));

        let confirmed = Reservation {
            status: ReservationStatus::Confirmed,
            ..res
        };
        assert!(!confirmed.is_expired_at(now));
    }
}
