//! Periodic background tasks with single-holder fencing.
//!
//! Each sweeper runs as one long-lived tokio task per process. Across
//! replicas, a Postgres advisory lock on a well-known key elects a single
//! active holder; the session lock doubles as the lease and evaporates when
//! the holder's connection dies. Non-holders keep polling, so failover takes
//! at most one period. Duplicate sweepers would be safe anyway, since every
//! sweep mutation is transactional and idempotent, just wasteful.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::utils::error::AppError;

pub const MIN_PERIOD_SECS: u64 = 10;
pub const MAX_PERIOD_SECS: u64 = 60;
pub const DEFAULT_PERIOD_SECS: u64 = 15;

/// Advisory lock keys. One per sweeper, stable across releases.
pub const HOLD_SWEEPER_LEASE_KEY: i64 = 0x7469_636b_686f_6c64; // "tickhold"
pub const RESERVATION_SWEEPER_LEASE_KEY: i64 = 0x7365_6174_7265_7376; // "seatresv"
pub const RESALE_SWEEPER_LEASE_KEY: i64 = 0x7265_7361_6c65_7377; // "resalesw"

#[derive(Debug, Clone)]
pub struct Sweeper {
    pub name: &'static str,
    pub period: Duration,
    pub batch_size: i64,
    pub lease_key: i64,
}

impl Sweeper {
    pub fn new(name: &'static str, period_secs: u64, batch_size: i64, lease_key: i64) -> Self {
        Self {
            name,
            period: Duration::from_secs(period_secs.clamp(MIN_PERIOD_SECS, MAX_PERIOD_SECS)),
            batch_size,
            lease_key,
        }
    }

    /// Run `sweep` every period while this process holds the lease.
    pub fn spawn<F, Fut>(self, pool: PgPool, clock: SharedClock, sweep: F) -> JoinHandle<()>
    where
        F: Fn(PgPool, DateTime<Utc>, i64) -> Fut + Send + 'static,
        Fut: Future<Output = Result<u64, AppError>> + Send,
    {
        tokio::spawn(async move {
            info!(sweeper = self.name, period = ?self.period, "sweeper started");
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut lease: Option<PoolConnection<Postgres>> = None;

            loop {
                ticker.tick().await;

                if lease.is_none() {
                    lease = acquire_lease(&pool, self.name, self.lease_key).await;
                }
                let Some(conn) = lease.as_mut() else {
                    continue;
                };

                // Keepalive doubles as a liveness probe; if the session died
                // the advisory lock is already gone and we re-elect.
                if sqlx::query("SELECT 1").execute(&mut **conn).await.is_err() {
                    warn!(sweeper = self.name, "lease connection lost, standing down");
                    lease = None;
                    continue;
                }

                let now = clock.now();
                match sweep(pool.clone(), now, self.batch_size).await {
                    Ok(0) => {}
                    Ok(n) => debug!(sweeper = self.name, swept = n, "sweep pass complete"),
                    Err(e) => warn!(sweeper = self.name, error = %e, "sweep pass failed"),
                }
            }
        })
    }
}

/// Try to become the lease holder. The advisory lock is session-scoped, so
/// holding the connection open holds the lease.
async fn acquire_lease(
    pool: &PgPool,
    name: &'static str,
    key: i64,
) -> Option<PoolConnection<Postgres>> {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(sweeper = name, error = %e, "could not get a connection for the lease");
            return None;
        }
    };

    match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
        .bind(key)
        .fetch_one(&mut *conn)
        .await
    {
        Ok(true) => {
            info!(sweeper = name, "lease acquired");
            Some(conn)
        }
        Ok(false) => {
            debug!(sweeper = name, "another replica holds the lease");
            None
        }
        Err(e) => {
            warn!(sweeper = name, error = %e, "lease attempt failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_clamped_into_allowed_range() {
        let too_fast = Sweeper::new("holds", 1, 500, HOLD_SWEEPER_LEASE_KEY);
        assert_eq!(too_fast.period, Duration::from_secs(MIN_PERIOD_SECS));

        let too_slow = Sweeper::new("holds", 600, 500, HOLD_SWEEPER_LEASE_KEY);
        assert_eq!(too_slow.period, Duration::from_secs(MAX_PERIOD_SECS));

        let default = Sweeper::new("holds", DEFAULT_PERIOD_SECS, 500, HOLD_SWEEPER_LEASE_KEY);
        assert_eq!(default.period, Duration::from_secs(15));
    }

    #[test]
    fn test_lease_keys_are_distinct() {
        let keys = [
            HOLD_SWEEPER_LEASE_KEY,
            RESERVATION_SWEEPER_LEASE_KEY,
            RESALE_SWEEPER_LEASE_KEY,
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
