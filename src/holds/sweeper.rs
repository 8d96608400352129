//! Reclaims expired holds back into `available`.
//!
//! The sweeper is the only writer allowed to clean up expired holds;
//! `acquire_hold` never reclaims opportunistically. Each hold is reclaimed
//! in its own transaction so one poisoned row cannot wedge a whole batch.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::TicketHold;
use crate::stock::{self, StockOp};
use crate::utils::error::AppError;

pub const DEFAULT_BATCH_SIZE: i64 = 500;

/// One sweep pass. Returns the number of holds reclaimed.
pub async fn sweep_expired_holds(
    pool: &PgPool,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<u64, AppError> {
    let expired: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM ticket_holds WHERE held_until <= $1 ORDER BY held_until LIMIT $2",
    )
    .bind(now)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut reclaimed = 0u64;
    for hold_id in expired {
        match reclaim_one(pool, hold_id, now).await {
            Ok(true) => reclaimed += 1,
            Ok(false) => {}
            Err(e) => {
                // Keep going; the row stays expired and the next pass retries.
                warn!(hold_id = %hold_id, error = %e, "failed to reclaim expired hold");
            }
        }
    }

    if reclaimed > 0 {
        info!(reclaimed, "expired holds swept");
    }
    Ok(reclaimed)
}

/// Reclaim a single hold. `SKIP LOCKED` keeps the sweeper from queueing
/// behind a confirmer that is racing us for the same row; whoever wins the
/// lock decides the hold's fate.
async fn reclaim_one(pool: &PgPool, hold_id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;

    let hold = sqlx::query_as::<_, TicketHold>(
        "SELECT * FROM ticket_holds WHERE id = $1 AND held_until <= $2 FOR UPDATE SKIP LOCKED",
    )
    .bind(hold_id)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(hold) = hold else {
        // Confirmed, released or still locked by someone else.
        return Ok(false);
    };

    stock::apply_in_tx(
        &mut tx,
        hold.ticket_type_id,
        StockOp::CreditAvailable,
        hold.quantity,
    )
    .await?;
    sqlx::query("DELETE FROM ticket_holds WHERE id = $1")
        .bind(hold.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}
