//! Contracts with outbound collaborators.
//!
//! The core treats authorization as an opaque predicate and notifications as
//! fire-and-forget. Neither may influence a business transaction:
//! notifications are dispatched strictly after commit, and a bus failure is
//! logged and dropped.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::utils::error::AppError;

/// Opaque permission predicate. A transport failure surfaces as
/// `ExternalServiceError`, never as a silent deny or allow.
pub trait PermissionChecker: Send + Sync {
    fn has_permission(&self, user_id: Uuid, action: &str) -> Result<bool, AppError>;
}

/// Development-mode checker.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn has_permission(&self, _user_id: Uuid, _action: &str) -> Result<bool, AppError> {
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: String,
    pub title: String,
    pub body: String,
    pub sender: Option<Uuid>,
    pub related_id: Option<Uuid>,
    pub recipients: Vec<Uuid>,
    pub metadata: Value,
}

/// Fire-and-forget notification fan-out. Callers invoke this only after
/// their transaction has committed, so a rollback can never leave ghost
/// notifications behind.
pub trait NotificationBus: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub type SharedBus = Arc<dyn NotificationBus>;

/// Default bus: structured log lines instead of a delivery transport.
#[derive(Debug, Clone, Default)]
pub struct LogBus;

impl NotificationBus for LogBus {
    fn notify(&self, notification: Notification) {
        if notification.recipients.is_empty() {
            warn!(kind = %notification.kind, "notification with no recipients dropped");
            return;
        }
        info!(
            kind = %notification.kind,
            title = %notification.title,
            recipients = notification.recipients.len(),
            "notification dispatched"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all_grants_everything() {
        let checker = AllowAll;
        assert!(checker.has_permission(Uuid::new_v4(), "event:create").unwrap());
    }
}
