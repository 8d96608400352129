use std::sync::Arc;

use sqlx::PgPool;

use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::external::{AllowAll, LogBus, PermissionChecker, SharedBus};

/// Shared per-request context. Holds immutable configuration and handles
/// only; stock and reservation state live exclusively in the database.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub clock: SharedClock,
    pub config: Arc<Config>,
    pub notifier: SharedBus,
    pub permissions: Arc<dyn PermissionChecker>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            notifier: Arc::new(LogBus),
            permissions: Arc::new(AllowAll),
        }
    }
}
