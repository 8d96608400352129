use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::external::Notification;
use crate::resale;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

use super::{current_user, with_deadline};

const DEFAULT_MIN_HOLD_DAYS: i32 = 1;

#[derive(Deserialize)]
pub struct ListResaleRequest {
    pub ticket_id: Uuid,
    pub resale_price: Decimal,
    pub expires_at: DateTime<Utc>,
    pub min_hold_days: Option<i32>,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ListResaleRequest>,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;
    if !state.permissions.has_permission(user_id, "resale:list")? {
        return Err(AppError::Forbidden(
            "not allowed to list tickets for resale".to_string(),
        ));
    }

    let listing = with_deadline(
        &state,
        resale::list_for_resale(
            &state.pool,
            state.clock.as_ref(),
            body.ticket_id,
            user_id,
            body.resale_price,
            body.expires_at,
            body.min_hold_days.unwrap_or(DEFAULT_MIN_HOLD_DAYS),
        ),
    )
    .await?;

    Ok(created(listing, "Ticket listed for resale").into_response())
}

pub async fn buy(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let buyer_id = current_user(&headers)?;

    let listing = with_deadline(
        &state,
        resale::complete_resale(&state.pool, state.clock.as_ref(), listing_id, buyer_id),
    )
    .await?;

    // Post-commit fan-out to both parties.
    state.notifier.notify(Notification {
        kind: "resale.completed".to_string(),
        title: "Resale completed".to_string(),
        body: "A resale listing has been sold".to_string(),
        sender: None,
        related_id: Some(listing.ticket_id),
        recipients: vec![listing.original_user_id, buyer_id],
        metadata: serde_json::json!({ "listing_id": listing.id }),
    });

    Ok(success(listing, "Resale completed").into_response())
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;

    let listing = with_deadline(
        &state,
        resale::cancel_resale(&state.pool, state.clock.as_ref(), listing_id, user_id),
    )
    .await?;

    Ok(success(listing, "Resale listing cancelled").into_response())
}
