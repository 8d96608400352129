//! Releases held reservations whose deadline has passed.
//!
//! A confirmer racing this sweeper contends for the same reservation row;
//! whoever takes the lock first decides, and the loser re-reads status and
//! deadline. Each release runs in its own transaction.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog;
use crate::models::{ReservationStatus, SeatReservation, SeatStatus};
use crate::utils::error::AppError;

/// One sweep pass. Returns the number of reservations released.
pub async fn sweep_expired_reservations(
    pool: &PgPool,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<u64, AppError> {
    let expired: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM seat_reservations
        WHERE status = 'held' AND expires_at <= $1
        ORDER BY expires_at
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut released = 0u64;
    for reservation_id in expired {
        match release_one(pool, reservation_id, now).await {
            Ok(true) => released += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(reservation_id = %reservation_id, error = %e, "failed to release expired reservation");
            }
        }
    }

    if released > 0 {
        info!(released, "expired seat reservations swept");
    }
    Ok(released)
}

async fn release_one(
    pool: &PgPool,
    reservation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;

    let reservation = sqlx::query_as::<_, SeatReservation>(
        r#"
        SELECT * FROM seat_reservations
        WHERE id = $1 AND status = 'held' AND expires_at <= $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(reservation_id)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(reservation) = reservation else {
        // Confirmed in the meantime, or a confirmer holds the lock.
        return Ok(false);
    };

    let seat = catalog::lock_seat(&mut *tx, reservation.seat_id).await?;

    sqlx::query(
        r#"
        UPDATE seat_reservations
        SET status = $1, version = version + 1, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(ReservationStatus::Released)
    .bind(reservation.id)
    .execute(&mut *tx)
    .await?;

    if seat.status == SeatStatus::Held {
        catalog::update_seat_status(&mut *tx, seat.id, seat.version, SeatStatus::Available).await?;
        catalog::adjust_event_available_seats(&mut *tx, reservation.event_id, 1).await?;
    }

    tx.commit().await?;
    Ok(true)
}
