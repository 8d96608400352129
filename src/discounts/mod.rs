//! Discount-code redemption.
//!
//! Consumption runs under a row lock on the code, with the checks applied in
//! a fixed order so concurrent redeemers of a nearly-exhausted code get a
//! deterministic outcome. Consumers call `validate_and_consume` inside their
//! checkout transaction, so a failed checkout rolls the burned use back with
//! everything else.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool};
use std::fmt;
use tracing::info;
use uuid::Uuid;

use crate::clock::new_id;
use crate::models::DiscountCode;
use crate::stock::Tx;
use crate::utils::error::AppError;

/// Why a code was rejected. Serialized into the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountReason {
    /// Unknown, inactive or soft-deleted code.
    Invalid,
    NotYetValid,
    Expired,
    Exhausted,
    EventMismatch,
    OrderTooSmall,
}

impl fmt::Display for DiscountReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DiscountReason::Invalid => "invalid code",
            DiscountReason::NotYetValid => "code is not yet valid",
            DiscountReason::Expired => "code has expired",
            DiscountReason::Exhausted => "code has no uses left",
            DiscountReason::EventMismatch => "code does not apply to this event",
            DiscountReason::OrderTooSmall => "order is below the code's minimum",
        };
        f.write_str(msg)
    }
}

/// The ordered precondition chain. `already_redeemed_by_user` feeds the
/// single-use rule; it counts as exhaustion, not invalidity.
pub fn check_redeemable(
    code: &DiscountCode,
    event_id: Uuid,
    order_value: Decimal,
    already_redeemed_by_user: bool,
    now: DateTime<Utc>,
) -> Result<(), DiscountReason> {
    if !code.is_active || code.deleted_at.is_some() {
        return Err(DiscountReason::Invalid);
    }
    if now < code.valid_from {
        return Err(DiscountReason::NotYetValid);
    }
    if now >= code.valid_until {
        return Err(DiscountReason::Expired);
    }
    if code.max_uses > 0 && code.current_uses >= code.max_uses {
        return Err(DiscountReason::Exhausted);
    }
    if code.is_single_use && already_redeemed_by_user {
        return Err(DiscountReason::Exhausted);
    }
    if let Some(code_event) = code.event_id {
        if code_event != event_id {
            return Err(DiscountReason::EventMismatch);
        }
    }
    if order_value < code.min_order_value {
        return Err(DiscountReason::OrderTooSmall);
    }
    Ok(())
}

async fn load_by_code<'e, E>(exec: E, code: &str) -> Result<Option<DiscountCode>, AppError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, DiscountCode>(
        "SELECT * FROM discount_codes WHERE code = $1 AND deleted_at IS NULL",
    )
    .bind(code)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

async fn user_redeemed<'e, E>(
    exec: E,
    discount_code_id: Uuid,
    user_id: Uuid,
) -> Result<bool, AppError>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM discount_redemptions WHERE discount_code_id = $1 AND user_id = $2",
    )
    .bind(discount_code_id)
    .bind(user_id)
    .fetch_one(exec)
    .await?;
    Ok(count > 0)
}

/// Validate and burn one use of a code, inside the caller's transaction.
///
/// The row lock serialises concurrent redemptions; a `max_uses = N` code
/// admits exactly N of them. The use-count increment rolls back with the
/// surrounding checkout, so no compensation is needed on that path.
pub async fn validate_and_consume(
    tx: &mut Tx<'_>,
    code: &str,
    event_id: Uuid,
    order_value: Decimal,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DiscountCode, AppError> {
    let row = sqlx::query_as::<_, DiscountCode>(
        "SELECT * FROM discount_codes WHERE code = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(code)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::DiscountInvalid(DiscountReason::Invalid))?;

    let redeemed = user_redeemed(&mut **tx, row.id, user_id).await?;
    check_redeemable(&row, event_id, order_value, redeemed, now)
        .map_err(AppError::DiscountInvalid)?;

    let updated = sqlx::query_as::<_, DiscountCode>(
        r#"
        UPDATE discount_codes
        SET current_uses = current_uses + 1, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(row.id)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO discount_redemptions (id, discount_code_id, user_id) VALUES ($1, $2, $3)",
    )
    .bind(new_id())
    .bind(row.id)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    info!(
        code = %updated.code,
        user_id = %user_id,
        current_uses = updated.current_uses,
        "discount consumed"
    );
    Ok(updated)
}

/// Dry-run validation for the public validate endpoint. No lock, no
/// increment.
pub async fn validate_dry_run(
    pool: &PgPool,
    code: &str,
    event_id: Uuid,
    order_value: Decimal,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DiscountCode, AppError> {
    let row = load_by_code(pool, code)
        .await?
        .ok_or(AppError::DiscountInvalid(DiscountReason::Invalid))?;
    let redeemed = user_redeemed(pool, row.id, user_id).await?;
    check_redeemable(&row, event_id, order_value, redeemed, now)
        .map_err(AppError::DiscountInvalid)?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscountType;
    use chrono::{Duration, TimeZone};

    fn code_valid_between(from: DateTime<Utc>, until: DateTime<Utc>) -> DiscountCode {
        DiscountCode {
            id: new_id(),
            organizer_id: new_id(),
            code: "SPRING10".to_string(),
            discount_type: DiscountType::Percentage,
            value: Decimal::from(10),
            valid_from: from,
            valid_until: until,
            max_uses: 0,
            current_uses: 0,
            min_order_value: Decimal::ZERO,
            is_single_use: false,
            is_active: true,
            event_id: None,
            created_at: from,
            updated_at: from,
            deleted_at: None,
        }
    }

    #[test]
    fn test_validity_window_is_half_open() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let code = code_valid_between(t0, t0 + Duration::days(10));
        let event = new_id();
        let order = Decimal::from(50);

        assert_eq!(
            check_redeemable(&code, event, order, false, t0 - Duration::seconds(1)),
            Err(DiscountReason::NotYetValid)
        );
        assert!(check_redeemable(&code, event, order, false, t0).is_ok());
        assert!(
            check_redeemable(&code, event, order, false, t0 + Duration::days(10) - Duration::seconds(1))
                .is_ok()
        );
        assert_eq!(
            check_redeemable(&code, event, order, false, t0 + Duration::days(10)),
            Err(DiscountReason::Expired)
        );
    }

    #[test]
    fn test_max_uses_admits_exactly_n() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut code = code_valid_between(t0, t0 + Duration::days(10));
        code.max_uses = 1;

        assert!(check_redeemable(&code, new_id(), Decimal::from(50), false, t0).is_ok());

        code.current_uses = 1;
        assert_eq!(
            check_redeemable(&code, new_id(), Decimal::from(50), false, t0),
            Err(DiscountReason::Exhausted)
        );
    }

    #[test]
    fn test_zero_max_uses_means_unlimited() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut code = code_valid_between(t0, t0 + Duration::days(10));
        code.current_uses = 10_000;
        assert!(check_redeemable(&code, new_id(), Decimal::from(50), false, t0).is_ok());
    }

    #[test]
    fn test_single_use_repeat_by_same_user_is_exhausted() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut code = code_valid_between(t0, t0 + Duration::days(10));
        code.is_single_use = true;

        assert!(check_redeemable(&code, new_id(), Decimal::from(50), false, t0).is_ok());
        assert_eq!(
            check_redeemable(&code, new_id(), Decimal::from(50), true, t0),
            Err(DiscountReason::Exhausted)
        );
    }

    #[test]
    fn test_event_scoped_code_rejects_other_events() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut code = code_valid_between(t0, t0 + Duration::days(10));
        let event = new_id();
        code.event_id = Some(event);

        assert!(check_redeemable(&code, event, Decimal::from(50), false, t0).is_ok());
        assert_eq!(
            check_redeemable(&code, new_id(), Decimal::from(50), false, t0),
            Err(DiscountReason::EventMismatch)
        );
    }

    #[test]
    fn test_minimum_order_value() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut code = code_valid_between(t0, t0 + Duration::days(10));
        code.min_order_value = Decimal::from(30);

        assert_eq!(
            check_redeemable(&code, new_id(), Decimal::from(29), false, t0),
            Err(DiscountReason::OrderTooSmall)
        );
        assert!(check_redeemable(&code, new_id(), Decimal::from(30), false, t0).is_ok());
    }

    #[test]
    fn test_inactive_or_deleted_code_is_invalid() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let mut inactive = code_valid_between(t0, t0 + Duration::days(10));
        inactive.is_active = false;
        assert_eq!(
            check_redeemable(&inactive, new_id(), Decimal::from(50), false, t0),
            Err(DiscountReason::Invalid)
        );

        let mut deleted = code_valid_between(t0, t0 + Duration::days(10));
        deleted.deleted_at = Some(t0);
        assert_eq!(
            check_redeemable(&deleted, new_id(), Decimal::from(50), false, t0),
            Err(DiscountReason::Invalid)
        );
    }
}
