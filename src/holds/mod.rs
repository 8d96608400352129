//! Ticket holds: the shopping-cart stage of a purchase.
//!
//! A hold debits `available` into `held` and carries a wall-clock deadline.
//! Nothing persists until the hold is confirmed; abandonment is handled by
//! the expiry sweeper, which is the only component allowed to reclaim
//! expired holds.

pub mod sweeper;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::catalog;
use crate::clock::{new_id, Clock};
use crate::discounts;
use crate::models::{
    Ticket, TicketHold, TicketStatus, TicketType, TicketTypeStatus, UserTicketLimits,
};
use crate::seats;
use crate::stock::{self, StockOp, Tx};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct AcquiredHold {
    pub hold_id: Uuid,
    pub held_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Hold was live; stock credited back and the row deleted.
    Released,
    /// Row still exists but the deadline has passed; the sweeper owns
    /// reclamation.
    Expired,
    /// No such hold.
    Missing,
}

/// Everything a buyer may attach to a confirmation.
#[derive(Debug, Clone, Default)]
pub struct ConfirmOptions {
    pub discount_code: Option<String>,
    pub seat_ids: Vec<Uuid>,
    pub payment_reference: Option<String>,
}

/// Pure validation for an acquire attempt, in check order: ticket type must
/// be sellable, the quantity inside its per-user bounds, and the buyer under
/// their event cap. Runs before any stock row is locked.
pub fn check_acquire(
    ticket_type: &TicketType,
    limits: Option<&UserTicketLimits>,
    quantity: i32,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if ticket_type.status != TicketTypeStatus::Active {
        return Err(AppError::PreconditionFailed(
            "ticket type is not active".to_string(),
        ));
    }
    if !ticket_type.sales_open_at(now) {
        return Err(AppError::SalesWindowClosed);
    }
    if quantity < ticket_type.min_tickets_per_user || quantity > ticket_type.max_tickets_per_user {
        return Err(AppError::ValidationError(format!(
            "quantity {} outside [{}, {}]",
            quantity, ticket_type.min_tickets_per_user, ticket_type.max_tickets_per_user
        )));
    }
    if let Some(limits) = limits {
        if !limits.can_buy(quantity) {
            return Err(AppError::UserLimitExceeded {
                remaining: limits.remaining(),
            });
        }
    }
    Ok(())
}

/// Acquire a hold on `quantity` units of a ticket type.
///
/// Validation happens before the stock row is touched; the debit and the
/// hold insert share one transaction so a failed debit leaves no orphan row.
pub async fn acquire_hold(
    pool: &PgPool,
    clock: &dyn Clock,
    user_id: Uuid,
    session_id: &str,
    ticket_type_id: Uuid,
    quantity: i32,
) -> Result<AcquiredHold, AppError> {
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let ticket_type = catalog::load_ticket_type(&mut *tx, ticket_type_id).await?;
    let limits = catalog::load_user_limits(&mut *tx, user_id, ticket_type.event_id).await?;
    check_acquire(&ticket_type, limits.as_ref(), quantity, now)?;

    let stock_row = stock::apply_in_tx(&mut tx, ticket_type_id, StockOp::DebitAvailable, quantity)
        .await?;
    let held_until = now + Duration::seconds(i64::from(stock_row.hold_seconds));

    let hold_id = new_id();
    sqlx::query(
        r#"
        INSERT INTO ticket_holds (id, ticket_type_id, user_id, session_id, quantity, held_until)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(hold_id)
    .bind(ticket_type_id)
    .bind(user_id)
    .bind(session_id)
    .bind(quantity)
    .bind(held_until)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        hold_id = %hold_id,
        ticket_type_id = %ticket_type_id,
        user_id = %user_id,
        quantity,
        held_until = %held_until,
        "hold acquired"
    );
    Ok(AcquiredHold {
        hold_id,
        held_until,
    })
}

async fn lock_hold(tx: &mut Tx<'_>, hold_id: Uuid) -> Result<Option<TicketHold>, AppError> {
    let hold = sqlx::query_as::<_, TicketHold>(
        "SELECT * FROM ticket_holds WHERE id = $1 FOR UPDATE",
    )
    .bind(hold_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(hold)
}

/// Push the deadline out by another `hold_seconds`. A hold may be extended
/// once, and only while it is still live.
pub async fn extend_hold(
    pool: &PgPool,
    clock: &dyn Clock,
    hold_id: Uuid,
) -> Result<AcquiredHold, AppError> {
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let hold = lock_hold(&mut tx, hold_id)
        .await?
        .ok_or(AppError::HoldExpired)?;
    if hold.expired_at(now) {
        return Err(AppError::HoldExpired);
    }
    if hold.extended {
        return Err(AppError::PreconditionFailed(
            "hold was already extended once".to_string(),
        ));
    }

    let hold_seconds: i32 = sqlx::query_scalar(
        "SELECT hold_seconds FROM ticket_stocks WHERE ticket_type_id = $1",
    )
    .bind(hold.ticket_type_id)
    .fetch_one(&mut *tx)
    .await?;

    let held_until = now + Duration::seconds(i64::from(hold_seconds));
    sqlx::query(
        "UPDATE ticket_holds SET held_until = $1, extended = TRUE, updated_at = now() WHERE id = $2",
    )
    .bind(held_until)
    .bind(hold_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(hold_id = %hold_id, held_until = %held_until, "hold extended");
    Ok(AcquiredHold {
        hold_id,
        held_until,
    })
}

/// Idempotent release. Live holds credit stock back and disappear; expired
/// or missing holds are left for the sweeper so release and expiry never
/// double-credit.
pub async fn release_hold(
    pool: &PgPool,
    clock: &dyn Clock,
    hold_id: Uuid,
) -> Result<ReleaseOutcome, AppError> {
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let hold = match lock_hold(&mut tx, hold_id).await? {
        Some(hold) => hold,
        None => return Ok(ReleaseOutcome::Missing),
    };
    if hold.expired_at(now) {
        return Ok(ReleaseOutcome::Expired);
    }

    stock::apply_in_tx(
        &mut tx,
        hold.ticket_type_id,
        StockOp::CreditAvailable,
        hold.quantity,
    )
    .await?;
    sqlx::query("DELETE FROM ticket_holds WHERE id = $1")
        .bind(hold_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(hold_id = %hold_id, quantity = hold.quantity, "hold released");
    Ok(ReleaseOutcome::Released)
}

/// Confirm a live hold into persisted tickets.
///
/// The whole checkout runs in one transaction: seat confirmation, the
/// held -> reserved stock move, discount consumption (the last fallible step
/// before tickets are written), ticket persistence and the purchase-cap
/// bump. Any failure rolls the lot back, so a consumed discount use can
/// never leak.
pub async fn confirm_hold(
    pool: &PgPool,
    clock: &dyn Clock,
    hold_id: Uuid,
    opts: ConfirmOptions,
) -> Result<Vec<Ticket>, AppError> {
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let hold = lock_hold(&mut tx, hold_id)
        .await?
        .ok_or(AppError::HoldExpired)?;
    if hold.expired_at(now) {
        // The sweeper owns the row now; from the confirmer's view the hold
        // is gone.
        return Err(AppError::HoldExpired);
    }

    let ticket_type = catalog::load_ticket_type(&mut *tx, hold.ticket_type_id).await?;
    let event = catalog::load_event(&mut *tx, ticket_type.event_id).await?;

    if opts.seat_ids.len() as i32 > hold.quantity {
        return Err(AppError::ValidationError(format!(
            "{} seats requested for {} tickets",
            opts.seat_ids.len(),
            hold.quantity
        )));
    }

    // Seats are locked in ascending id order to keep multi-seat checkouts
    // deadlock-free.
    let mut seat_ids = opts.seat_ids.clone();
    seat_ids.sort();
    seat_ids.dedup();
    let mut seat_prices: Vec<(Uuid, Decimal)> = Vec::with_capacity(seat_ids.len());
    let mut direct_grabs = 0;
    for seat_id in &seat_ids {
        let (seat, claim) =
            seats::confirm_for_checkout(&mut tx, hold.user_id, event.id, *seat_id, now).await?;
        if claim == seats::CheckoutClaim::DirectGrab {
            direct_grabs += 1;
        }
        let tier_price = match seat.price_tier_id {
            Some(tier_id) => {
                sqlx::query_scalar::<_, Decimal>("SELECT price FROM price_tiers WHERE id = $1")
                    .bind(tier_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .unwrap_or(Decimal::ZERO)
            }
            None => Decimal::ZERO,
        };
        seat_prices.push((*seat_id, tier_price));
    }
    // The event row is only touched once every seat lock is taken, so the
    // seat-then-event lock order holds across concurrent checkouts and
    // explicit reservations.
    if direct_grabs > 0 {
        catalog::adjust_event_available_seats(&mut *tx, event.id, -direct_grabs).await?;
    }

    stock::apply_in_tx(&mut tx, hold.ticket_type_id, StockOp::Confirm, hold.quantity).await?;

    let unit_prices: Vec<Decimal> = (0..hold.quantity as usize)
        .map(|i| {
            let tier = seat_prices.get(i).map(|(_, p)| *p).unwrap_or(Decimal::ZERO);
            tier + ticket_type.price_modifier
        })
        .collect();
    let order_value: Decimal = unit_prices.iter().copied().sum();

    // Discount consumption is the last fallible business step before the
    // tickets are written.
    let discount = match &opts.discount_code {
        Some(code) => Some(
            discounts::validate_and_consume(&mut tx, code, event.id, order_value, hold.user_id, now)
                .await?,
        ),
        None => None,
    };
    let charged_total = match &discount {
        Some(d) => d.apply(order_value),
        None => order_value,
    };

    let mut tickets = Vec::with_capacity(hold.quantity as usize);
    for i in 0..hold.quantity as usize {
        let gross = unit_prices[i];
        let actual_price = if order_value.is_zero() {
            gross
        } else {
            // Spread the discount across the order proportionally.
            gross * charged_total / order_value
        };
        let ticket = insert_ticket(
            &mut tx,
            &hold,
            &ticket_type,
            seat_ids.get(i).copied(),
            actual_price,
            discount.as_ref().map(|d| d.id),
            opts.payment_reference.clone(),
            now,
        )
        .await?;
        tickets.push(ticket);
    }

    catalog::bump_tickets_bought(&mut *tx, hold.user_id, event.id, hold.quantity).await?;

    sqlx::query("DELETE FROM ticket_holds WHERE id = $1")
        .bind(hold_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(
        hold_id = %hold_id,
        user_id = %hold.user_id,
        tickets = tickets.len(),
        "hold confirmed"
    );
    Ok(tickets)
}

#[allow(clippy::too_many_arguments)]
async fn insert_ticket(
    tx: &mut Tx<'_>,
    hold: &TicketHold,
    ticket_type: &TicketType,
    seat_id: Option<Uuid>,
    actual_price: Decimal,
    discount_code_id: Option<Uuid>,
    payment_reference: Option<String>,
    now: DateTime<Utc>,
) -> Result<Ticket, AppError> {
    let id = new_id();
    let ticket_number = format!("TKT-{}", id.simple());
    let qr_hash = new_id().simple().to_string();

    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        INSERT INTO tickets (
            id, ticket_number, event_id, user_id, ticket_type_id, seat_id,
            actual_price, discount_code_id, status, qr_hash, payment_reference,
            is_transferable, purchased_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, $12)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(ticket_number)
    .bind(ticket_type.event_id)
    .bind(hold.user_id)
    .bind(ticket_type.id)
    .bind(seat_id)
    .bind(actual_price)
    .bind(discount_code_id)
    .bind(TicketStatus::Valid)
    .bind(qr_hash)
    .bind(payment_reference)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ticket_type_at(sales_start: DateTime<Utc>) -> TicketType {
        TicketType {
            id: new_id(),
            event_id: new_id(),
            organizer_id: new_id(),
            name: "General admission".to_string(),
            price_modifier: Decimal::ZERO,
            min_tickets_per_user: 1,
            max_tickets_per_user: 6,
            quantity_available: None,
            sales_start,
            sales_end: Some(sales_start + Duration::days(30)),
            status: TicketTypeStatus::Active,
            is_default: true,
            created_at: sales_start,
            updated_at: sales_start,
            deleted_at: None,
        }
    }

    fn limits_for(tt: &TicketType, max: i32, bought: i32) -> UserTicketLimits {
        UserTicketLimits {
            id: new_id(),
            user_id: new_id(),
            event_id: tt.event_id,
            max_tickets: max,
            tickets_bought: bought,
            tickets_resold: 0,
            created_at: tt.created_at,
            updated_at: tt.created_at,
        }
    }

    #[test]
    fn test_acquire_passes_inside_window_and_bounds() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let tt = ticket_type_at(t0);
        assert!(check_acquire(&tt, None, 2, t0 + Duration::hours(1)).is_ok());
    }

    #[test]
    fn test_acquire_rejects_closed_sales_window() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let tt = ticket_type_at(t0);

        let before = check_acquire(&tt, None, 1, t0 - Duration::seconds(1));
        assert!(matches!(before, Err(AppError::SalesWindowClosed)));

        let after = check_acquire(&tt, None, 1, t0 + Duration::days(30));
        assert!(matches!(after, Err(AppError::SalesWindowClosed)));
    }

    #[test]
    fn test_acquire_rejects_inactive_ticket_type() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut tt = ticket_type_at(t0);
        tt.status = TicketTypeStatus::Archived;

        let result = check_acquire(&tt, None, 1, t0 + Duration::hours(1));
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
    }

    #[test]
    fn test_acquire_rejects_quantity_outside_per_user_bounds() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let tt = ticket_type_at(t0);
        let now = t0 + Duration::hours(1);

        assert!(matches!(
            check_acquire(&tt, None, 0, now),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            check_acquire(&tt, None, 7, now),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_acquire_rejects_user_over_cap_before_stock() {
        // max_tickets=4, already bought 3: asking for 2 trips the cap.
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let tt = ticket_type_at(t0);
        let limits = limits_for(&tt, 4, 3);
        let now = t0 + Duration::hours(1);

        let result = check_acquire(&tt, Some(&limits), 2, now);
        assert!(matches!(
            result,
            Err(AppError::UserLimitExceeded { remaining: 1 })
        ));

        // Exactly the remaining allowance is fine.
        assert!(check_acquire(&tt, Some(&limits), 1, now).is_ok());
    }

    #[test]
    fn test_hold_expiry_is_inclusive_at_deadline() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let hold = TicketHold {
            id: new_id(),
            ticket_type_id: new_id(),
            user_id: new_id(),
            session_id: "sess-1".to_string(),
            quantity: 2,
            held_until: t0 + Duration::seconds(900),
            extended: false,
            created_at: t0,
            updated_at: t0,
        };

        // One tick before the deadline the hold is confirmable.
        assert!(!hold.expired_at(t0 + Duration::seconds(899)));
        // At and after the deadline it is not.
        assert!(hold.expired_at(t0 + Duration::seconds(900)));
        assert!(hold.expired_at(t0 + Duration::seconds(901)));
    }
}
