//! Reservation coordinator: orchestrates ledger, store and event publication
//!
//! The coordinator owns the reservation lifecycle. Stock mutation and the
//! matching reservation write always share one database transaction, so a
//! failure anywhere aborts both and no hold can leak. Event publication
//! happens after commit and is best-effort; the sweeper cleans up holds whose
//! customer never heard back.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{reservation_event, routing_keys, EventPublisher};
use crate::config::ReservationConfig;
use crate::db::Database;
use crate::ledger::StockLedger;
use crate::models::{Item, NewReservation, Pagination, Reservation, ReservationStatus};
use crate::store::ReservationStore;
use crate::{Error, Result};

/// The authenticated customer driving a request
#[derive(Debug, Clone)]
pub struct Requester {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
}

pub struct ReservationCoordinator {
    db: Database,
    ledger: StockLedger,
    store: ReservationStore,
    publisher: Arc<dyn EventPublisher>,
    config: ReservationConfig,
}

impl ReservationCoordinator {
    pub fn new(
        db: Database,
        ledger: StockLedger,
        store: ReservationStore,
        publisher: Arc<dyn EventPublisher>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            store,
            publisher,
            config,
        }
    }

    /// Place a hold: reserve stock and record a PENDING reservation
    pub async fn create(
        &self,
        requester: &Requester,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation> {
        if quantity < 1 {
            return Err(Error::validation("quantity must be >= 1"));
        }

        let item = self.ledger.get_item(item_id).await?;

        // Fast-path rejection outside the transaction; the authoritative
        // check happens again under the item row lock.
        let committed = self
            .store
            .count_committed_quantity(self.store.pool(), requester.id, item_id)
            .await?;
        quota_guard(committed, quantity, item.max_per_user)?;

        let mut tx = self.db.begin().await?;

        let item = self.ledger.reserve(&mut tx, item_id, quantity).await?;

        // Re-check under the lock: concurrent creates for this item are
        // serialized here, so the cap cannot be exceeded by a race.
        let committed = self
            .store
            .count_committed_quantity(&mut *tx, requester.id, item_id)
            .await?;
        if let Err(e) = quota_guard(committed, quantity, item.max_per_user) {
            tx.rollback().await?;
            return Err(e);
        }

        let now = Utc::now();
        let new = NewReservation {
            reservation_code: generate_reservation_code(now),
            user_id: requester.id,
            item_id,
            quantity,
            unit_price: item.price,
            total_price: item.price * Decimal::from(quantity),
            expires_at: now + self.config.hold_duration(),
        };

        let reservation = self.store.create(&mut tx, &new).await?;

        tx.commit().await?;

        info!(
            reservation_id = %reservation.id,
            code = %reservation.reservation_code,
            user_id = %requester.id,
            item_id = %item_id,
            quantity,
            "Reservation created"
        );

        self.publish_best_effort(
            routing_keys::RESERVATION_CREATED,
            &reservation,
            &item,
            Some(requester),
        )
        .await;

        Ok(reservation)
    }

    /// Convert a PENDING hold into a purchase
    pub async fn checkout(&self, reservation_id: Uuid, requester: &Requester) -> Result<Reservation> {
        let reservation = self.store.find_by_id(reservation_id).await?;

        checkout_guard(&reservation, requester.id, Utc::now())?;

        let mut tx = self.db.begin().await?;

        let item = self
            .ledger
            .confirm(&mut tx, reservation.item_id, reservation.quantity)
            .await?;

        // Conditional update is the CAS; if the sweeper won the race this
        // errors AlreadyTerminal and the confirm above rolls back with us.
        let reservation = self
            .store
            .transition(&mut tx, reservation_id, ReservationStatus::Confirmed, None)
            .await?;

        tx.commit().await?;

        info!(
            reservation_id = %reservation.id,
            user_id = %requester.id,
            "Reservation confirmed"
        );

        self.publish_best_effort(
            routing_keys::RESERVATION_CONFIRMED,
            &reservation,
            &item,
            Some(requester),
        )
        .await;

        Ok(reservation)
    }

    /// Cancel a PENDING hold and return its stock
    pub async fn cancel(
        &self,
        reservation_id: Uuid,
        requester: &Requester,
        reason: Option<&str>,
    ) -> Result<Reservation> {
        let reservation = self.store.find_by_id(reservation_id).await?;

        cancel_guard(&reservation, requester.id, requester.is_admin)?;

        let mut tx = self.db.begin().await?;

        let item = self
            .ledger
            .release(&mut tx, reservation.item_id, reservation.quantity)
            .await?;

        let reservation = self
            .store
            .transition(&mut tx, reservation_id, ReservationStatus::Cancelled, reason)
            .await?;

        tx.commit().await?;

        info!(
            reservation_id = %reservation.id,
            user_id = %requester.id,
            admin = requester.is_admin,
            "Reservation cancelled"
        );

        self.publish_best_effort(
            routing_keys::RESERVATION_CANCELLED,
            &reservation,
            &item,
            Some(requester),
        )
        .await;

        Ok(reservation)
    }

    /// Single fetch; owner or admin only
    pub async fn get(&self, reservation_id: Uuid, requester: &Requester) -> Result<Reservation> {
        let reservation = self.store.find_by_id(reservation_id).await?;

        if reservation.user_id != requester.id && !requester.is_admin {
            return Err(Error::NotOwner);
        }

        Ok(reservation)
    }

    /// The requester's own reservations, paginated
    pub async fn list_own(
        &self,
        requester: &Requester,
        status: Option<ReservationStatus>,
        pagination: &Pagination,
    ) -> Result<(Vec<Reservation>, i64)> {
        self.store
            .find_by_user(requester.id, status, pagination)
            .await
    }

    async fn publish_best_effort(
        &self,
        routing_key: &str,
        reservation: &Reservation,
        item: &Item,
        requester: Option<&Requester>,
    ) {
        let user = requester.map(|r| (r.name.as_str(), r.email.as_str()));

        let message = match reservation_event(routing_key, reservation, item, user) {
            Ok(message) => message,
            Err(e) => {
                warn!(routing_key, error = %e, "Failed to build event, skipping publish");
                return;
            }
        };

        if let Err(e) = self.publisher.publish(routing_key, &message).await {
            // The state change is committed; losing the event is recoverable
            // (expiry still happens via the sweeper, listings read the store).
            warn!(
                routing_key,
                reservation_id = %reservation.id,
                error = %e,
                "Event publish failed after commit"
            );
        }
    }
}

/// Guard for checkout preconditions
fn checkout_guard(reservation: &Reservation, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    if reservation.user_id != user_id {
        return Err(Error::NotOwner);
    }
    if reservation.status != ReservationStatus::Pending {
        return Err(Error::AlreadyTerminal(reservation.status));
    }
    if reservation.expires_at <= now {
        return Err(Error::Expired);
    }
    Ok(())
}

/// Guard for cancel preconditions; admins bypass ownership
fn cancel_guard(reservation: &Reservation, user_id: Uuid, is_admin: bool) -> Result<()> {
    if reservation.user_id != user_id && !is_admin {
        return Err(Error::NotOwner);
    }
    if reservation.status != ReservationStatus::Pending {
        return Err(Error::AlreadyTerminal(reservation.status));
    }
    Ok(())
}

fn quota_guard(committed: i64, requested: i32, max_per_user: i32) -> Result<()> {
    if committed + requested as i64 > max_per_user as i64 {
        return Err(Error::QuotaExceeded {
            requested,
            committed: committed as i32,
            max_per_user,
        });
    }
    Ok(())
}

const CODE_CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Human-readable reservation code, unique by entropy: RSV-YYYYMMDD-XXXXXX
fn generate_reservation_code(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect();

    format!("RSV-{}-{}", now.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending_reservation(user_id: Uuid, expires_in_secs: i64) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            reservation_code: generate_reservation_code(now),
            user_id,
            item_id: Uuid::new_v4(),
            quantity: 2,
            unit_price: dec!(25.00),
            total_price: dec!(50.00),
            status: ReservationStatus::Pending,
            expires_at: now + chrono::Duration::seconds(expires_in_secs),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_checkout_guard_happy_path() {
        let user = Uuid::new_v4();
        let res = pending_reservation(user, 60);
        assert!(checkout_guard(&res, user, Utc::now()).is_ok());
    }

    #[test]
    fn test_checkout_guard_rejects_foreign_user() {
        let res = pending_reservation(Uuid::new_v4(), 60);
        assert!(matches!(
            checkout_guard(&res, Uuid::new_v4(), Utc::now()),
            Err(Error::NotOwner)
        ));
    }

    #[test]
    fn test_checkout_guard_rejects_terminal() {
        let user = Uuid::new_v4();
        let mut res = pending_reservation(user, 60);
        res.status = ReservationStatus::Cancelled;
        assert!(matches!(
            checkout_guard(&res, user, Utc::now()),
            Err(Error::AlreadyTerminal(ReservationStatus::Cancelled))
        ));
    }

    #[test]
    fn test_checkout_guard_expiry_boundary() {
        let user = Uuid::new_v4();
        let res = pending_reservation(user, 600);

        // Just before the deadline succeeds, just after fails
        let before = res.expires_at - chrono::Duration::milliseconds(1);
        let after = res.expires_at + chrono::Duration::milliseconds(1);

        assert!(checkout_guard(&res, user, before).is_ok());
        assert!(matches!(checkout_guard(&res, user, after), Err(Error::Expired)));
        // expires_at itself counts as expired
        assert!(matches!(
            checkout_guard(&res, user, res.expires_at),
            Err(Error::Expired)
        ));
    }

    #[test]
    fn test_cancel_guard_admin_bypasses_ownership() {
        let res = pending_reservation(Uuid::new_v4(), 60);
        let stranger = Uuid::new_v4();

        assert!(matches!(
            cancel_guard(&res, stranger, false),
            Err(Error::NotOwner)
        ));
        assert!(cancel_guard(&res, stranger, true).is_ok());
    }

    #[test]
    fn test_cancel_guard_rejects_terminal_even_for_admin() {
        let mut res = pending_reservation(Uuid::new_v4(), 60);
        res.status = ReservationStatus::Confirmed;
        assert!(matches!(
            cancel_guard(&res, Uuid::new_v4(), true),
            Err(Error::AlreadyTerminal(ReservationStatus::Confirmed))
        ));
    }

    #[test]
    fn test_quota_guard() {
        // 2 committed, max 2: nothing more fits
        assert!(quota_guard(2, 1, 2).is_err());
        // 0 committed, max 2: exactly 2 fits
        assert!(quota_guard(0, 2, 2).is_ok());
        assert!(quota_guard(0, 3, 2).is_err());
    }

    #[test]
    fn test_reservation_code_shape() {
        let code = generate_reservation_code(Utc::now());
        assert!(code.starts_with("RSV-"));
        assert_eq!(code.len(), "RSV-".len() + 8 + 1 + 6);

        let suffix = code.rsplit('-').next().unwrap();
        assert!(suffix.bytes().all(|b| CODE_CHARSET.contains(&b)));
    }
}
