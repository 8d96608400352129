use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discounts;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

use super::{current_user, with_deadline};

#[derive(Deserialize)]
pub struct ValidateQuery {
    pub code: String,
    pub event_id: Uuid,
    pub order_value: Decimal,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub code: String,
    pub discounted_value: Decimal,
}

/// Dry-run validation: reports whether the code would apply and what the
/// order would cost, without burning a use.
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ValidateQuery>,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;
    let now = state.clock.now();

    let code = with_deadline(
        &state,
        discounts::validate_dry_run(
            &state.pool,
            &query.code,
            query.event_id,
            query.order_value,
            user_id,
            now,
        ),
    )
    .await?;

    let payload = ValidateResponse {
        discounted_value: code.apply(query.order_value),
        code: code.code,
    };
    Ok(success(payload, "Discount code is valid").into_response())
}
