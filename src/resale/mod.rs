//! Ticket resale listings.
//!
//! Listing parks one reserved unit in the `resale` partition until the
//! listing completes, is cancelled, or expires. The minimum-hold window
//! keeps freshly bought tickets off the market.

pub mod sweeper;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::catalog;
use crate::clock::{new_id, Clock};
use crate::models::{ResaleStatus, Ticket, TicketResale, TicketStatus};
use crate::stock::{self, StockOp, Tx};
use crate::utils::error::AppError;

/// Platform cut of the resale price, in percent.
const PLATFORM_FEE_PERCENT: i64 = 10;

/// Anti-flip window: a ticket may be listed only once it has been owned for
/// at least `min_hold_days` whole days.
pub fn check_listable(
    ticket: &Ticket,
    min_hold_days: i32,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if ticket.status != TicketStatus::Valid {
        return Err(AppError::PreconditionFailed(format!(
            "only valid tickets can be resold, this one is {:?}",
            ticket.status
        )));
    }
    if !ticket.is_transferable {
        return Err(AppError::PreconditionFailed(
            "ticket is not transferable".to_string(),
        ));
    }
    let held_for = now - ticket.purchased_at;
    if held_for < Duration::days(i64::from(min_hold_days)) {
        return Err(AppError::PreconditionFailed(format!(
            "too_early: ticket must be held for {min_hold_days} day(s) before resale"
        )));
    }
    Ok(())
}

pub fn platform_fee(resale_price: Decimal) -> Decimal {
    resale_price * Decimal::from(PLATFORM_FEE_PERCENT) / Decimal::from(100)
}

async fn lock_ticket(tx: &mut Tx<'_>, ticket_id: Uuid) -> Result<Ticket, AppError> {
    sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(ticket_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("ticket {ticket_id} not found")))
}

async fn lock_listing(tx: &mut Tx<'_>, listing_id: Uuid) -> Result<TicketResale, AppError> {
    sqlx::query_as::<_, TicketResale>("SELECT * FROM ticket_resales WHERE id = $1 FOR UPDATE")
        .bind(listing_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("resale listing {listing_id} not found")))
}

/// List a ticket on the resale market: reserved -> resale for one unit.
pub async fn list_for_resale(
    pool: &PgPool,
    clock: &dyn Clock,
    ticket_id: Uuid,
    owner_id: Uuid,
    resale_price: Decimal,
    expires_at: DateTime<Utc>,
    min_hold_days: i32,
) -> Result<TicketResale, AppError> {
    let now = clock.now();
    if resale_price <= Decimal::ZERO {
        return Err(AppError::ValidationError(
            "resale price must be positive".to_string(),
        ));
    }
    if expires_at <= now {
        return Err(AppError::ValidationError(
            "expires_at must be in the future".to_string(),
        ));
    }
    if min_hold_days < 1 {
        return Err(AppError::ValidationError(
            "min_hold_days must be at least 1".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let ticket = lock_ticket(&mut tx, ticket_id).await?;
    if ticket.user_id != owner_id {
        return Err(AppError::Forbidden(
            "only the ticket owner can list it".to_string(),
        ));
    }
    check_listable(&ticket, min_hold_days, now)?;

    let open_listings: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ticket_resales WHERE ticket_id = $1 AND status IN ('listed', 'pending')",
    )
    .bind(ticket_id)
    .fetch_one(&mut *tx)
    .await?;
    if open_listings > 0 {
        return Err(AppError::Conflict(
            "ticket already has an open resale listing".to_string(),
        ));
    }

    stock::apply_in_tx(&mut tx, ticket.ticket_type_id, StockOp::ListForResale, 1).await?;

    let listing = sqlx::query_as::<_, TicketResale>(
        r#"
        INSERT INTO ticket_resales (
            id, ticket_id, original_user_id, original_price, resale_price,
            platform_fee, listed_at, expires_at, status, min_hold_days
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(new_id())
    .bind(ticket_id)
    .bind(owner_id)
    .bind(ticket.actual_price)
    .bind(resale_price)
    .bind(platform_fee(resale_price))
    .bind(now)
    .bind(expires_at)
    .bind(ResaleStatus::Listed)
    .bind(min_hold_days)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(
        listing_id = %listing.id,
        ticket_id = %ticket_id,
        resale_price = %resale_price,
        "ticket listed for resale"
    );
    Ok(listing)
}

/// Transfer a listed ticket to the buyer: resale -> reserved, new owner,
/// limits adjusted on both sides, all in one transaction.
pub async fn complete_resale(
    pool: &PgPool,
    clock: &dyn Clock,
    listing_id: Uuid,
    buyer_id: Uuid,
) -> Result<TicketResale, AppError> {
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let listing = lock_listing(&mut tx, listing_id).await?;
    if buyer_id == listing.original_user_id {
        return Err(AppError::ValidationError(
            "cannot buy back your own listing".to_string(),
        ));
    }
    if !listing.purchasable_at(now) {
        return Err(AppError::PreconditionFailed(format!(
            "listing is {:?} or past its deadline",
            listing.status
        )));
    }

    let ticket = lock_ticket(&mut tx, listing.ticket_id).await?;

    let buyer_limits = catalog::load_user_limits(&mut *tx, buyer_id, ticket.event_id).await?;
    if let Some(limits) = &buyer_limits {
        if !limits.can_buy(1) {
            return Err(AppError::UserLimitExceeded {
                remaining: limits.remaining(),
            });
        }
    }

    stock::apply_in_tx(&mut tx, ticket.ticket_type_id, StockOp::CompleteResale, 1).await?;

    sqlx::query(
        r#"
        UPDATE tickets
        SET user_id = $1, is_transferable = TRUE, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(buyer_id)
    .bind(ticket.id)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query_as::<_, TicketResale>(
        r#"
        UPDATE ticket_resales
        SET status = $1, new_user_id = $2, sold_at = $3, version = version + 1, updated_at = now()
        WHERE id = $4 AND version = $5
        RETURNING *
        "#,
    )
    .bind(ResaleStatus::Completed)
    .bind(buyer_id)
    .bind(now)
    .bind(listing.id)
    .bind(listing.version)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("listing changed underneath us".to_string()))?;

    catalog::bump_tickets_bought(&mut *tx, listing.original_user_id, ticket.event_id, -1).await?;
    catalog::bump_tickets_resold(&mut *tx, listing.original_user_id, ticket.event_id, 1).await?;
    if buyer_limits.is_some() {
        catalog::bump_tickets_bought(&mut *tx, buyer_id, ticket.event_id, 1).await?;
    }

    tx.commit().await?;
    info!(
        listing_id = %listing_id,
        ticket_id = %ticket.id,
        buyer_id = %buyer_id,
        "resale completed"
    );
    Ok(updated)
}

/// Withdraw a listing. Owner only, listed only; resale -> reserved.
pub async fn cancel_resale(
    pool: &PgPool,
    _clock: &dyn Clock,
    listing_id: Uuid,
    requester_id: Uuid,
) -> Result<TicketResale, AppError> {
    let mut tx = pool.begin().await?;

    let listing = lock_listing(&mut tx, listing_id).await?;
    if listing.original_user_id != requester_id {
        return Err(AppError::Forbidden(
            "only the seller can cancel a listing".to_string(),
        ));
    }
    if listing.status != ResaleStatus::Listed {
        return Err(AppError::PreconditionFailed(format!(
            "only listed listings can be cancelled, this one is {:?}",
            listing.status
        )));
    }

    let ticket = lock_ticket(&mut tx, listing.ticket_id).await?;
    stock::apply_in_tx(&mut tx, ticket.ticket_type_id, StockOp::CompleteResale, 1).await?;

    let updated = sqlx::query_as::<_, TicketResale>(
        r#"
        UPDATE ticket_resales
        SET status = $1, version = version + 1, updated_at = now()
        WHERE id = $2 AND version = $3
        RETURNING *
        "#,
    )
    .bind(ResaleStatus::Canceled)
    .bind(listing.id)
    .bind(listing.version)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("listing changed underneath us".to_string()))?;

    tx.commit().await?;
    info!(listing_id = %listing_id, "resale listing cancelled");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ticket_bought_at(purchased_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id: new_id(),
            ticket_number: "TKT-1".to_string(),
            event_id: new_id(),
            user_id: new_id(),
            ticket_type_id: new_id(),
            seat_id: None,
            actual_price: Decimal::from(40),
            discount_code_id: None,
            status: TicketStatus::Valid,
            qr_hash: "deadbeef".to_string(),
            payment_reference: None,
            is_transferable: true,
            purchased_at,
            created_at: purchased_at,
            updated_at: purchased_at,
            deleted_at: None,
        }
    }

    #[test]
    fn test_min_hold_window_boundary() {
        // Bought day 0, min_hold_days = 2: day 1 rejected, day 2 + 1s accepted.
        let day0 = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let ticket = ticket_bought_at(day0);

        let day1 = day0 + Duration::days(1);
        assert!(matches!(
            check_listable(&ticket, 2, day1),
            Err(AppError::PreconditionFailed(msg)) if msg.starts_with("too_early")
        ));

        let day2 = day0 + Duration::days(2) + Duration::seconds(1);
        assert!(check_listable(&ticket, 2, day2).is_ok());
    }

    #[test]
    fn test_exactly_at_window_is_accepted() {
        let day0 = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let ticket = ticket_bought_at(day0);
        assert!(check_listable(&ticket, 2, day0 + Duration::days(2)).is_ok());
    }

    #[test]
    fn test_non_valid_ticket_cannot_be_listed() {
        let day0 = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut ticket = ticket_bought_at(day0);
        ticket.status = TicketStatus::Used;
        assert!(check_listable(&ticket, 1, day0 + Duration::days(3)).is_err());
    }

    #[test]
    fn test_non_transferable_ticket_cannot_be_listed() {
        let day0 = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut ticket = ticket_bought_at(day0);
        ticket.is_transferable = false;
        assert!(check_listable(&ticket, 1, day0 + Duration::days(3)).is_err());
    }

    #[test]
    fn test_platform_fee_is_ten_percent() {
        assert_eq!(platform_fee(Decimal::from(50)), Decimal::from(5));
    }

    #[test]
    fn test_listing_purchasable_only_while_listed_and_unexpired() {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut listing = TicketResale {
            id: new_id(),
            ticket_id: new_id(),
            original_user_id: new_id(),
            new_user_id: None,
            original_price: Decimal::from(40),
            resale_price: Decimal::from(50),
            platform_fee: Decimal::from(5),
            listed_at: t0,
            sold_at: None,
            expires_at: t0 + Duration::days(7),
            status: ResaleStatus::Listed,
            min_hold_days: 1,
            version: 0,
            created_at: t0,
            updated_at: t0,
        };

        assert!(listing.purchasable_at(t0 + Duration::days(6)));
        assert!(!listing.purchasable_at(t0 + Duration::days(7)));

        listing.status = ResaleStatus::Canceled;
        assert!(!listing.purchasable_at(t0 + Duration::days(1)));
    }
}
