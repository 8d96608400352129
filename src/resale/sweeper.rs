//! Expires stale resale listings and returns their units to `reserved`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ResaleStatus, TicketResale};
use crate::stock::{self, StockOp};
use crate::utils::error::AppError;

/// One sweep pass. Returns the number of listings expired.
pub async fn sweep_expired_listings(
    pool: &PgPool,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<u64, AppError> {
    let expired: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM ticket_resales
        WHERE status IN ('listed', 'pending') AND expires_at <= $1
        ORDER BY expires_at
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut swept = 0u64;
    for listing_id in expired {
        match expire_one(pool, listing_id, now).await {
            Ok(true) => swept += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(listing_id = %listing_id, error = %e, "failed to expire resale listing");
            }
        }
    }

    if swept > 0 {
        info!(swept, "expired resale listings swept");
    }
    Ok(swept)
}

async fn expire_one(pool: &PgPool, listing_id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;

    let listing = sqlx::query_as::<_, TicketResale>(
        r#"
        SELECT * FROM ticket_resales
        WHERE id = $1 AND status IN ('listed', 'pending') AND expires_at <= $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(listing_id)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(listing) = listing else {
        return Ok(false);
    };

    let ticket_type_id: Uuid =
        sqlx::query_scalar("SELECT ticket_type_id FROM tickets WHERE id = $1")
            .bind(listing.ticket_id)
            .fetch_one(&mut *tx)
            .await?;

    stock::apply_in_tx(&mut tx, ticket_type_id, StockOp::CompleteResale, 1).await?;

    sqlx::query(
        r#"
        UPDATE ticket_resales
        SET status = $1, version = version + 1, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(ResaleStatus::Expired)
    .bind(listing.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}
