use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::discounts::DiscountReason;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i32, available: i32 },

    #[error("User ticket limit exceeded: {remaining} remaining")]
    UserLimitExceeded { remaining: i32 },

    #[error("Sales window closed for this ticket type")]
    SalesWindowClosed,

    #[error("Hold has expired")]
    HoldExpired,

    #[error("Seat is already reserved for this event")]
    SeatAlreadyReserved,

    #[error("Discount code rejected: {0}")]
    DiscountInvalid(DiscountReason),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Database error")]
    DatabaseError(sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

// SQLSTATE codes with a business meaning.
const PG_DEADLOCK_DETECTED: &str = "40P01";
const PG_SERIALIZATION_FAILURE: &str = "40001";
const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_CHECK_VIOLATION: &str = "23514";

/// Map a SQLSTATE to the error kind it means for the core. Deadlock and
/// serialization failure are retryable; a unique violation is a row that
/// already exists; a check violation is a validation race the constraint
/// caught. Anything else stays an opaque database error.
fn classify_sqlstate(code: &str, constraint: Option<&str>) -> Option<AppError> {
    match code {
        PG_DEADLOCK_DETECTED | PG_SERIALIZATION_FAILURE => {
            Some(AppError::Transient("database contention".to_string()))
        }
        PG_UNIQUE_VIOLATION => Some(AppError::Conflict(format!(
            "duplicate row ({})",
            constraint.unwrap_or("unique constraint")
        ))),
        PG_CHECK_VIOLATION => Some(AppError::PreconditionFailed(format!(
            "constraint violated ({})",
            constraint.unwrap_or("check constraint")
        ))),
        _ => None,
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => {
                let mapped = db
                    .code()
                    .as_deref()
                    .and_then(|code| classify_sqlstate(code, db.constraint()));
                match mapped {
                    Some(err) => err,
                    None => AppError::DatabaseError(e),
                }
            }
            _ => AppError::DatabaseError(e),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::SalesWindowClosed => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::UserLimitExceeded { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_)
            | AppError::InsufficientStock { .. }
            | AppError::SeatAlreadyReserved => StatusCode::CONFLICT,
            AppError::HoldExpired => StatusCode::GONE,
            AppError::PreconditionFailed(_) | AppError::DiscountInvalid(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_)
            | AppError::ExternalServiceError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::UserLimitExceeded { .. } => "USER_LIMIT_EXCEEDED",
            AppError::SalesWindowClosed => "SALES_WINDOW_CLOSED",
            AppError::HoldExpired => "HOLD_EXPIRED",
            AppError::SeatAlreadyReserved => "SEAT_ALREADY_RESERVED",
            AppError::DiscountInvalid(_) => "DISCOUNT_INVALID",
            AppError::Transient(_) => "TRANSIENT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            other => {
                error!(error = ?other, code = other.code(), "Application error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        // Do not expose internal details in the API response
        let details = None;

        error_response(code, public_message, details, status)
    }
}
