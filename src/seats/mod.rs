//! Seat reservation state machine.
//!
//! Seats move available -> held -> booked, back to available on release.
//! A reservation owns its (seat, event) pair exclusively while it is held or
//! confirmed; the partial unique index on seat_reservations backs the
//! in-transaction check. All transitions lock the seat row first.

pub mod sweeper;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::catalog;
use crate::clock::{new_id, Clock};
use crate::models::{ReservationStatus, Seat, SeatReservation, SeatStatus};
use crate::stock::Tx;
use crate::utils::error::AppError;

/// Deadline attached to a reservation created implicitly at checkout, where
/// the row is confirmed in the same transaction and the deadline never
/// fires.
fn direct_confirm_grace() -> Duration {
    Duration::minutes(15)
}

/// Legal target states for an explicit status toggle. Asking for the state
/// the reservation is already in is a detectable client error, not a silent
/// success.
pub fn check_toggle(
    current: ReservationStatus,
    target: ReservationStatus,
) -> Result<(), AppError> {
    if current == target {
        return Err(AppError::Conflict("status_already_set".to_string()));
    }
    match (current, target) {
        (ReservationStatus::Held, ReservationStatus::Confirmed)
        | (ReservationStatus::Held, ReservationStatus::Released) => Ok(()),
        (ReservationStatus::Confirmed, ReservationStatus::Released) => Err(
            AppError::PreconditionFailed(
                "confirmed reservations are released through the refund path".to_string(),
            ),
        ),
        _ => Err(AppError::PreconditionFailed(format!(
            "cannot move a {target:?}-bound reservation from {current:?}"
        ))),
    }
}

/// Exclusivity decision for a fresh claim: the seat must be physically
/// available and no active reservation may shadow the (seat, event) pair.
pub fn check_seat_free(
    seat_status: SeatStatus,
    claim: Option<ReservationStatus>,
) -> Result<(), AppError> {
    if seat_status != SeatStatus::Available {
        return Err(AppError::SeatAlreadyReserved);
    }
    if claim.is_some_and(ReservationStatus::is_active) {
        return Err(AppError::SeatAlreadyReserved);
    }
    Ok(())
}

/// How a checkout may attach a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutClaim {
    /// Buyer confirmed this seat earlier; nothing left to write.
    AlreadyConfirmed,
    /// Buyer holds a live reservation; promote it to confirmed.
    PromoteHeld,
    /// Seat is unclaimed; take it directly.
    DirectGrab,
}

/// Decide what a buyer's checkout may do with a seat. Anyone else's active
/// claim, or the buyer's own expired one, blocks the attachment.
pub fn classify_checkout_claim(
    buyer: Uuid,
    seat_status: SeatStatus,
    claim: Option<&SeatReservation>,
    now: DateTime<Utc>,
) -> Result<CheckoutClaim, AppError> {
    match claim {
        Some(r) if r.user_id != buyer => Err(AppError::SeatAlreadyReserved),
        Some(r) if r.status == ReservationStatus::Confirmed => Ok(CheckoutClaim::AlreadyConfirmed),
        Some(r) => {
            if r.expired_at(now) {
                // The sweeper owns this row; the buyer lost the race.
                Err(AppError::SeatAlreadyReserved)
            } else {
                Ok(CheckoutClaim::PromoteHeld)
            }
        }
        None => {
            check_seat_free(seat_status, None)?;
            Ok(CheckoutClaim::DirectGrab)
        }
    }
}

/// Active reservation shadowing a (seat, event) pair, locked for the
/// caller's transaction.
async fn lock_active_reservation(
    tx: &mut Tx<'_>,
    event_id: Uuid,
    seat_id: Uuid,
) -> Result<Option<SeatReservation>, AppError> {
    let row = sqlx::query_as::<_, SeatReservation>(
        r#"
        SELECT * FROM seat_reservations
        WHERE event_id = $1 AND seat_id = $2 AND status IN ('held', 'confirmed')
        FOR UPDATE
        "#,
    )
    .bind(event_id)
    .bind(seat_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

async fn lock_reservation(
    tx: &mut Tx<'_>,
    reservation_id: Uuid,
) -> Result<SeatReservation, AppError> {
    sqlx::query_as::<_, SeatReservation>(
        "SELECT * FROM seat_reservations WHERE id = $1 FOR UPDATE",
    )
    .bind(reservation_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("reservation {reservation_id} not found")))
}

async fn set_reservation_status(
    tx: &mut Tx<'_>,
    reservation: &SeatReservation,
    status: ReservationStatus,
) -> Result<SeatReservation, AppError> {
    sqlx::query_as::<_, SeatReservation>(
        r#"
        UPDATE seat_reservations
        SET status = $1, version = version + 1, updated_at = now()
        WHERE id = $2 AND version = $3
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(reservation.id)
    .bind(reservation.version)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::Conflict("reservation changed underneath us".to_string()))
}

async fn insert_reservation(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    event_id: Uuid,
    seat_id: Uuid,
    status: ReservationStatus,
    expires_at: DateTime<Utc>,
) -> Result<SeatReservation, AppError> {
    let reservation = sqlx::query_as::<_, SeatReservation>(
        r#"
        INSERT INTO seat_reservations (id, user_id, event_id, seat_id, status, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(new_id())
    .bind(user_id)
    .bind(event_id)
    .bind(seat_id)
    .bind(status)
    .bind(expires_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(reservation)
}

/// Take a held claim on a seat for an event.
pub async fn reserve(
    pool: &PgPool,
    clock: &dyn Clock,
    user_id: Uuid,
    event_id: Uuid,
    seat_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<SeatReservation, AppError> {
    let now = clock.now();
    if expires_at <= now {
        return Err(AppError::ValidationError(
            "expires_at must be in the future".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let event = catalog::load_event(&mut *tx, event_id).await?;
    let seat = catalog::lock_seat(&mut *tx, seat_id).await?;

    if event.venue_id != Some(seat.venue_id) {
        return Err(AppError::ValidationError(
            "seat does not belong to the event's venue".to_string(),
        ));
    }
    let claim = lock_active_reservation(&mut tx, event_id, seat_id)
        .await?
        .map(|r| r.status);
    check_seat_free(seat.status, claim)?;

    let reservation =
        insert_reservation(&mut tx, user_id, event_id, seat_id, ReservationStatus::Held, expires_at)
            .await?;
    catalog::update_seat_status(&mut *tx, seat_id, seat.version, SeatStatus::Held).await?;
    catalog::adjust_event_available_seats(&mut *tx, event_id, -1).await?;

    tx.commit().await?;
    info!(
        reservation_id = %reservation.id,
        seat_id = %seat_id,
        event_id = %event_id,
        user_id = %user_id,
        expires_at = %expires_at,
        "seat reserved"
    );
    Ok(reservation)
}

/// held -> confirmed; the seat becomes booked.
pub async fn confirm(
    pool: &PgPool,
    clock: &dyn Clock,
    reservation_id: Uuid,
) -> Result<SeatReservation, AppError> {
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let reservation = lock_reservation(&mut tx, reservation_id).await?;
    if reservation.status != ReservationStatus::Held {
        return Err(AppError::PreconditionFailed(format!(
            "reservation is {:?}, not held",
            reservation.status
        )));
    }
    if reservation.expired_at(now) {
        return Err(AppError::PreconditionFailed(
            "reservation has expired".to_string(),
        ));
    }

    let seat = catalog::lock_seat(&mut *tx, reservation.seat_id).await?;
    if seat.status != SeatStatus::Held {
        return Err(AppError::Conflict(format!(
            "seat is {:?}, expected held",
            seat.status
        )));
    }

    let updated = set_reservation_status(&mut tx, &reservation, ReservationStatus::Confirmed).await?;
    catalog::update_seat_status(&mut *tx, seat.id, seat.version, SeatStatus::Booked).await?;

    tx.commit().await?;
    info!(reservation_id = %reservation_id, seat_id = %seat.id, "reservation confirmed");
    Ok(updated)
}

/// held (live or expired) -> released; the seat returns to available.
/// Confirmed reservations do not pass through here.
pub async fn release(
    pool: &PgPool,
    _clock: &dyn Clock,
    reservation_id: Uuid,
) -> Result<SeatReservation, AppError> {
    let mut tx = pool.begin().await?;

    let reservation = lock_reservation(&mut tx, reservation_id).await?;
    check_toggle(reservation.status, ReservationStatus::Released)?;

    let seat = catalog::lock_seat(&mut *tx, reservation.seat_id).await?;
    let updated = set_reservation_status(&mut tx, &reservation, ReservationStatus::Released).await?;
    if seat.status == SeatStatus::Held {
        catalog::update_seat_status(&mut *tx, seat.id, seat.version, SeatStatus::Available).await?;
        catalog::adjust_event_available_seats(&mut *tx, reservation.event_id, 1).await?;
    }

    tx.commit().await?;
    info!(reservation_id = %reservation_id, seat_id = %seat.id, "reservation released");
    Ok(updated)
}

/// Move a held reservation to a different seat in one transaction.
pub async fn rebind(
    pool: &PgPool,
    clock: &dyn Clock,
    reservation_id: Uuid,
    new_seat_id: Uuid,
) -> Result<SeatReservation, AppError> {
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let reservation = lock_reservation(&mut tx, reservation_id).await?;
    if reservation.status != ReservationStatus::Held {
        return Err(AppError::PreconditionFailed(
            "only held reservations can be rebound".to_string(),
        ));
    }
    if reservation.expired_at(now) {
        return Err(AppError::PreconditionFailed(
            "reservation has expired".to_string(),
        ));
    }
    if reservation.seat_id == new_seat_id {
        return Err(AppError::Conflict("status_already_set".to_string()));
    }

    let event = catalog::load_event(&mut *tx, reservation.event_id).await?;
    let candidate = catalog::load_seat(&mut *tx, new_seat_id).await?;
    if event.venue_id != Some(candidate.venue_id) {
        return Err(AppError::ValidationError(
            "seat does not belong to the event's venue".to_string(),
        ));
    }

    // Ascending-id lock order across the two seats keeps concurrent rebinds
    // deadlock-free.
    let (first, second) = if reservation.seat_id < new_seat_id {
        (reservation.seat_id, new_seat_id)
    } else {
        (new_seat_id, reservation.seat_id)
    };
    let seat_a = catalog::lock_seat(&mut *tx, first).await?;
    let seat_b = catalog::lock_seat(&mut *tx, second).await?;
    let (old_seat, new_seat) = if seat_a.id == reservation.seat_id {
        (seat_a, seat_b)
    } else {
        (seat_b, seat_a)
    };

    let claim = lock_active_reservation(&mut tx, reservation.event_id, new_seat.id)
        .await?
        .map(|r| r.status);
    check_seat_free(new_seat.status, claim)?;

    let updated = sqlx::query_as::<_, SeatReservation>(
        r#"
        UPDATE seat_reservations
        SET seat_id = $1, version = version + 1, updated_at = now()
        WHERE id = $2 AND version = $3
        RETURNING *
        "#,
    )
    .bind(new_seat.id)
    .bind(reservation.id)
    .bind(reservation.version)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("reservation changed underneath us".to_string()))?;

    catalog::update_seat_status(&mut *tx, old_seat.id, old_seat.version, SeatStatus::Available)
        .await?;
    catalog::update_seat_status(&mut *tx, new_seat.id, new_seat.version, SeatStatus::Held).await?;

    tx.commit().await?;
    info!(
        reservation_id = %reservation_id,
        old_seat = %old_seat.id,
        new_seat = %new_seat.id,
        "reservation rebound"
    );
    Ok(updated)
}

/// Explicit status toggle from the HTTP surface. Organizer-only: the caller
/// must own the reservation's event.
pub async fn toggle_status(
    pool: &PgPool,
    clock: &dyn Clock,
    actor_user_id: Uuid,
    reservation_id: Uuid,
    target: ReservationStatus,
) -> Result<SeatReservation, AppError> {
    // Peek first so a same-status toggle fails fast without mutating.
    let current = sqlx::query_as::<_, SeatReservation>(
        "SELECT * FROM seat_reservations WHERE id = $1",
    )
    .bind(reservation_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("reservation {reservation_id} not found")))?;

    let event = catalog::load_event(pool, current.event_id).await?;
    let organizer = catalog::load_organizer_for_user(pool, actor_user_id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => AppError::Forbidden(
                "only the event organizer can change reservation status".to_string(),
            ),
            other => other,
        })?;
    if event.organizer_id != organizer.id {
        return Err(AppError::Forbidden(
            "only the event organizer can change reservation status".to_string(),
        ));
    }

    check_toggle(current.status, target)?;

    match target {
        ReservationStatus::Confirmed => confirm(pool, clock, reservation_id).await,
        ReservationStatus::Released => release(pool, clock, reservation_id).await,
        ReservationStatus::Held => Err(AppError::PreconditionFailed(
            "reservations cannot be toggled back to held".to_string(),
        )),
    }
}

/// Attach a seat to a checkout, inside the checkout's transaction.
///
/// The buyer either confirmed a prior explicit reservation, or grabs an
/// unclaimed seat directly. Only seat and reservation rows are written here;
/// the caller settles `events.available_seats` for the direct grabs once
/// every seat lock in the checkout is taken, keeping the seat-then-event
/// lock order fixed across the crate.
pub async fn confirm_for_checkout(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    event_id: Uuid,
    seat_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(Seat, CheckoutClaim), AppError> {
    let seat = catalog::lock_seat(&mut **tx, seat_id).await?;
    let claim = lock_active_reservation(tx, event_id, seat_id).await?;
    let decision = classify_checkout_claim(user_id, seat.status, claim.as_ref(), now)?;

    match decision {
        CheckoutClaim::AlreadyConfirmed => {}
        CheckoutClaim::PromoteHeld => {
            if let Some(reservation) = claim {
                set_reservation_status(tx, &reservation, ReservationStatus::Confirmed).await?;
                catalog::update_seat_status(&mut **tx, seat.id, seat.version, SeatStatus::Booked)
                    .await?;
            }
        }
        CheckoutClaim::DirectGrab => {
            insert_reservation(
                tx,
                user_id,
                event_id,
                seat_id,
                ReservationStatus::Confirmed,
                now + direct_confirm_grace(),
            )
            .await?;
            catalog::update_seat_status(&mut **tx, seat.id, seat.version, SeatStatus::Booked)
                .await?;
        }
    }
    Ok((seat, decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_toggle_to_same_status_is_rejected() {
        for status in [
            ReservationStatus::Held,
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
        ] {
            let err = check_toggle(status, status).unwrap_err();
            assert!(matches!(err, AppError::Conflict(msg) if msg == "status_already_set"));
        }
    }

    #[test]
    fn test_held_reservation_can_confirm_or_release() {
        assert!(check_toggle(ReservationStatus::Held, ReservationStatus::Confirmed).is_ok());
        assert!(check_toggle(ReservationStatus::Held, ReservationStatus::Released).is_ok());
    }

    #[test]
    fn test_confirmed_reservation_is_not_releasable_here() {
        let err =
            check_toggle(ReservationStatus::Confirmed, ReservationStatus::Released).unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed(_)));
    }

    #[test]
    fn test_released_reservation_is_terminal() {
        assert!(check_toggle(ReservationStatus::Released, ReservationStatus::Held).is_err());
        assert!(check_toggle(ReservationStatus::Released, ReservationStatus::Confirmed).is_err());
    }

    #[test]
    fn test_reservation_expiry_boundary() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let reservation = SeatReservation {
            id: new_id(),
            user_id: new_id(),
            event_id: new_id(),
            seat_id: new_id(),
            status: ReservationStatus::Held,
            expires_at: t0 + Duration::seconds(60),
            version: 0,
            created_at: t0,
            updated_at: t0,
        };
        assert!(!reservation.expired_at(t0 + Duration::seconds(59)));
        assert!(reservation.expired_at(t0 + Duration::seconds(60)));
    }

    #[test]
    fn test_active_statuses_block_other_claims() {
        assert!(ReservationStatus::Held.is_active());
        assert!(ReservationStatus::Confirmed.is_active());
        assert!(!ReservationStatus::Released.is_active());
    }

    fn claim_by(user_id: Uuid, status: ReservationStatus, expires_at: DateTime<Utc>) -> SeatReservation {
        SeatReservation {
            id: new_id(),
            user_id,
            event_id: new_id(),
            seat_id: new_id(),
            status,
            expires_at,
            version: 0,
            created_at: expires_at - Duration::minutes(10),
            updated_at: expires_at - Duration::minutes(10),
        }
    }

    #[test]
    fn test_seat_with_active_claim_is_exclusive() {
        // Two users race for one seat: whoever claimed first shuts the
        // second out, whether the claim is still held or already confirmed.
        for status in [ReservationStatus::Held, ReservationStatus::Confirmed] {
            let result = check_seat_free(SeatStatus::Available, Some(status));
            assert!(matches!(result, Err(AppError::SeatAlreadyReserved)));
        }
    }

    #[test]
    fn test_unclaimed_available_seat_is_free() {
        assert!(check_seat_free(SeatStatus::Available, None).is_ok());
        // A released claim no longer shadows the pair.
        assert!(check_seat_free(SeatStatus::Available, Some(ReservationStatus::Released)).is_ok());
    }

    #[test]
    fn test_non_available_seat_blocks_even_without_a_claim() {
        for status in [SeatStatus::Held, SeatStatus::Booked] {
            let result = check_seat_free(status, None);
            assert!(matches!(result, Err(AppError::SeatAlreadyReserved)));
        }
    }

    #[test]
    fn test_checkout_blocked_by_rival_claim() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let buyer = new_id();
        let rival = claim_by(new_id(), ReservationStatus::Held, now + Duration::minutes(5));

        let result = classify_checkout_claim(buyer, SeatStatus::Held, Some(&rival), now);
        assert!(matches!(result, Err(AppError::SeatAlreadyReserved)));
    }

    #[test]
    fn test_checkout_promotes_buyers_live_hold() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let buyer = new_id();
        let own = claim_by(buyer, ReservationStatus::Held, now + Duration::minutes(5));

        let decision = classify_checkout_claim(buyer, SeatStatus::Held, Some(&own), now).unwrap();
        assert_eq!(decision, CheckoutClaim::PromoteHeld);
    }

    #[test]
    fn test_checkout_rejects_buyers_expired_hold() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let buyer = new_id();
        let stale = claim_by(buyer, ReservationStatus::Held, now - Duration::seconds(1));

        let result = classify_checkout_claim(buyer, SeatStatus::Held, Some(&stale), now);
        assert!(matches!(result, Err(AppError::SeatAlreadyReserved)));
    }

    #[test]
    fn test_checkout_accepts_buyers_confirmed_seat() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let buyer = new_id();
        let own = claim_by(buyer, ReservationStatus::Confirmed, now + Duration::minutes(5));

        let decision = classify_checkout_claim(buyer, SeatStatus::Booked, Some(&own), now).unwrap();
        assert_eq!(decision, CheckoutClaim::AlreadyConfirmed);
    }

    #[test]
    fn test_checkout_grabs_unclaimed_seat_directly() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();

        let decision = classify_checkout_claim(new_id(), SeatStatus::Available, None, now).unwrap();
        assert_eq!(decision, CheckoutClaim::DirectGrab);

        let booked = classify_checkout_claim(new_id(), SeatStatus::Booked, None, now);
        assert!(matches!(booked, Err(AppError::SeatAlreadyReserved)));
    }
}
