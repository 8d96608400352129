//! Read-mostly access to catalog entities the sales core depends on.
//!
//! Every read filters soft-deleted rows. The core's writes through this
//! module are limited to seat status and the denormalised
//! `events.available_seats` counter; everything else belongs to the catalog
//! CRUD surface, which is not part of the core.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Event, Organizer, Seat, SeatStatus, TicketType, UserTicketLimits};
use crate::utils::error::AppError;

pub async fn load_event<'e, E>(exec: E, id: Uuid) -> Result<Event, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {id} not found")))
}

pub async fn load_ticket_type<'e, E>(exec: E, id: Uuid) -> Result<TicketType, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, TicketType>(
        "SELECT * FROM ticket_types WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("ticket type {id} not found")))
}

pub async fn load_seat<'e, E>(exec: E, id: Uuid) -> Result<Seat, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Seat>("SELECT * FROM seats WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("seat {id} not found")))
}

pub async fn load_organizer_for_user<'e, E>(exec: E, user_id: Uuid) -> Result<Organizer, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Organizer>(
        "SELECT * FROM organizers WHERE user_id = $1 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .fetch_optional(exec)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("no organizer for user {user_id}")))
}

/// Lock a seat row for the duration of the caller's transaction. Seat
/// transitions must all pass through this lock.
pub async fn lock_seat<'e, E>(exec: E, id: Uuid) -> Result<Seat, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Seat>(
        "SELECT * FROM seats WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("seat {id} not found")))
}

/// Seat status write, guarded by the seat's version.
pub async fn update_seat_status<'e, E>(
    exec: E,
    seat_id: Uuid,
    expected_version: i64,
    status: SeatStatus,
) -> Result<Seat, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Seat>(
        r#"
        UPDATE seats
        SET status = $1, version = version + 1, updated_at = now()
        WHERE id = $2 AND version = $3 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(seat_id)
    .bind(expected_version)
    .fetch_optional(exec)
    .await?
    .ok_or_else(|| AppError::Conflict(format!("seat {seat_id} changed underneath us")))
}

/// Adjust the denormalised available-seat counter on an event. The CHECK
/// constraint keeps the counter inside `[0, total_seats]`.
pub async fn adjust_event_available_seats<'e, E>(
    exec: E,
    event_id: Uuid,
    delta: i32,
) -> Result<(), AppError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE events
        SET available_seats = available_seats + $1,
            version = version + 1,
            updated_at = now()
        WHERE id = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(delta)
    .bind(event_id)
    .execute(exec)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("event {event_id} not found")));
    }
    Ok(())
}

/// Fetch the per-user purchase limits row for an event, if one exists. No
/// row means the user has no cap configured.
pub async fn load_user_limits<'e, E>(
    exec: E,
    user_id: Uuid,
    event_id: Uuid,
) -> Result<Option<UserTicketLimits>, AppError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, UserTicketLimits>(
        "SELECT * FROM user_ticket_limits WHERE user_id = $1 AND event_id = $2",
    )
    .bind(user_id)
    .bind(event_id)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

/// Bump `tickets_bought`. The CHECK constraint rejects a bump past
/// `max_tickets`, which surfaces as a 422 precondition failure if a
/// validation race slips through.
pub async fn bump_tickets_bought<'e, E>(
    exec: E,
    user_id: Uuid,
    event_id: Uuid,
    delta: i32,
) -> Result<(), AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE user_ticket_limits
        SET tickets_bought = GREATEST(tickets_bought + $1, 0), updated_at = now()
        WHERE user_id = $2 AND event_id = $3
        "#,
    )
    .bind(delta)
    .bind(user_id)
    .bind(event_id)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn bump_tickets_resold<'e, E>(
    exec: E,
    user_id: Uuid,
    event_id: Uuid,
    delta: i32,
) -> Result<(), AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE user_ticket_limits
        SET tickets_resold = tickets_resold + $1, updated_at = now()
        WHERE user_id = $2 AND event_id = $3
        "#,
    )
    .bind(delta)
    .bind(user_id)
    .bind(event_id)
    .execute(exec)
    .await?;
    Ok(())
}
