use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::ReservationStatus;
use crate::seats;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

use super::{current_user, with_deadline};

#[derive(Deserialize)]
pub struct ReserveSeatRequest {
    pub event_id: Uuid,
    pub seat_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub async fn reserve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReserveSeatRequest>,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;

    let reservation = with_deadline(
        &state,
        seats::reserve(
            &state.pool,
            state.clock.as_ref(),
            user_id,
            body.event_id,
            body.seat_id,
            body.expires_at,
        ),
    )
    .await?;

    Ok(created(reservation, "Seat reserved").into_response())
}

#[derive(Deserialize)]
pub struct ToggleStatusRequest {
    pub status: ReservationStatus,
}

pub async fn toggle_status(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ToggleStatusRequest>,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;

    let reservation = with_deadline(
        &state,
        seats::toggle_status(
            &state.pool,
            state.clock.as_ref(),
            user_id,
            reservation_id,
            body.status,
        ),
    )
    .await?;

    Ok(success(reservation, "Reservation updated").into_response())
}

#[derive(Deserialize)]
pub struct RebindRequest {
    pub seat_id: Uuid,
}

pub async fn rebind(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Json(body): Json<RebindRequest>,
) -> Result<Response, AppError> {
    let reservation = with_deadline(
        &state,
        seats::rebind(
            &state.pool,
            state.clock.as_ref(),
            reservation_id,
            body.seat_id,
        ),
    )
    .await?;

    Ok(success(reservation, "Reservation moved to new seat").into_response())
}
