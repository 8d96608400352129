pub mod discounts;
pub mod holds;
pub mod resale;
pub mod reservations;

use std::future::Future;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "entrada-api",
    };

    success(payload, "Health check successful").into_response()
}

/// Caller identity, resolved upstream by the auth collaborator and forwarded
/// in a trusted header.
pub fn current_user(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::AuthError("missing x-user-id header".to_string()))?;
    raw.parse()
        .map_err(|_| AppError::AuthError("x-user-id is not a valid UUID".to_string()))
}

/// Per-request deadline around the purchase path. On expiry the in-flight
/// transaction rolls back with its connection and the client gets a
/// retryable error.
pub async fn with_deadline<F, T>(state: &AppState, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    let deadline = Duration::from_secs(state.config.request_timeout_secs);
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Transient("request deadline exceeded".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_current_user_requires_header() {
        let headers = HeaderMap::new();
        assert!(matches!(
            current_user(&headers),
            Err(AppError::AuthError(_))
        ));
    }

    #[test]
    fn test_current_user_parses_uuid() {
        let user = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_str(&user.to_string()).unwrap());
        assert_eq!(current_user(&headers).unwrap(), user);
    }

    #[test]
    fn test_current_user_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            current_user(&headers),
            Err(AppError::AuthError(_))
        ));
    }
}
