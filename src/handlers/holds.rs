use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::external::Notification;
use crate::holds::{self, ConfirmOptions, ReleaseOutcome};
use crate::state::AppState;
use crate::stock::with_contention_retry;
use crate::utils::error::AppError;
use crate::utils::response::{created, no_content, success};

use super::{current_user, with_deadline};

#[derive(Deserialize)]
pub struct AcquireHoldRequest {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub session_id: String,
}

#[derive(Serialize)]
pub struct HoldResponse {
    pub hold_id: Uuid,
    pub held_until: DateTime<Utc>,
}

pub async fn acquire(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AcquireHoldRequest>,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;

    let hold = with_deadline(
        &state,
        with_contention_retry("acquire_hold", || {
            holds::acquire_hold(
                &state.pool,
                state.clock.as_ref(),
                user_id,
                &body.session_id,
                body.ticket_type_id,
                body.quantity,
            )
        }),
    )
    .await?;

    let payload = HoldResponse {
        hold_id: hold.hold_id,
        held_until: hold.held_until,
    };
    Ok(created(payload, "Hold acquired").into_response())
}

pub async fn extend(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let hold = with_deadline(
        &state,
        holds::extend_hold(&state.pool, state.clock.as_ref(), hold_id),
    )
    .await?;

    let payload = HoldResponse {
        hold_id: hold.hold_id,
        held_until: hold.held_until,
    };
    Ok(success(payload, "Hold extended").into_response())
}

pub async fn release(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let outcome = with_deadline(
        &state,
        holds::release_hold(&state.pool, state.clock.as_ref(), hold_id),
    )
    .await?;

    release_response(hold_id, outcome)
}

/// A hold that never existed is a 404; one that existed but ran out is a
/// 410, so clients can tell a bad id from a lost cart.
fn release_response(hold_id: Uuid, outcome: ReleaseOutcome) -> Result<Response, AppError> {
    match outcome {
        ReleaseOutcome::Released => Ok(no_content().into_response()),
        ReleaseOutcome::Expired => Err(AppError::HoldExpired),
        ReleaseOutcome::Missing => Err(AppError::NotFound(format!("hold {hold_id} not found"))),
    }
}

#[derive(Deserialize, Default)]
pub struct ConfirmHoldRequest {
    pub discount_code: Option<String>,
    #[serde(default)]
    pub seat_ids: Vec<Uuid>,
    pub payment_reference: Option<String>,
}

#[derive(Serialize)]
pub struct ConfirmHoldResponse {
    pub ticket_ids: Vec<Uuid>,
}

pub async fn confirm(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ConfirmHoldRequest>,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;

    let opts = ConfirmOptions {
        discount_code: body.discount_code,
        seat_ids: body.seat_ids,
        payment_reference: body.payment_reference,
    };
    let tickets = with_deadline(
        &state,
        with_contention_retry("confirm_hold", || {
            holds::confirm_hold(&state.pool, state.clock.as_ref(), hold_id, opts.clone())
        }),
    )
    .await?;

    // The transaction is committed; fan-out happens strictly after it.
    if let Some(first) = tickets.first() {
        state.notifier.notify(Notification {
            kind: "ticket.purchased".to_string(),
            title: "Tickets confirmed".to_string(),
            body: format!("{} ticket(s) confirmed", tickets.len()),
            sender: None,
            related_id: Some(first.event_id),
            recipients: vec![user_id],
            metadata: serde_json::json!({ "count": tickets.len() }),
        });
    }

    let payload = ConfirmHoldResponse {
        ticket_ids: tickets.iter().map(|t| t.id).collect(),
    };
    Ok(created(payload, "Hold confirmed").into_response())
}
