//! Four-partition stock ledger.
//!
//! Every unit of a ticket type lives in exactly one partition: `available`,
//! `held`, `reserved` or `resale`. Mutations happen under a row lock on the
//! stock row (`SELECT ... FOR UPDATE`) with an optimistic version bump as a
//! secondary guard, so the conservation invariant holds at every commit.

use rand::Rng;
use sqlx::{Postgres, Transaction};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::TicketStock;
use crate::utils::error::AppError;

pub type Tx<'a> = Transaction<'a, Postgres>;

/// Retry caps per the contention discipline: optimistic-lock conflicts get
/// three attempts, deadlocks two, everything else propagates.
const STALE_VERSION_RETRIES: u32 = 3;
const DEADLOCK_RETRIES: u32 = 2;
const BACKOFF_MIN_MS: u64 = 10;
const BACKOFF_MAX_MS: u64 = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StockError {
    #[error("insufficient units in {partition}: requested {requested}, have {available}")]
    Insufficient {
        partition: &'static str,
        requested: i32,
        available: i32,
    },

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i32),

    #[error("stock row changed underneath us")]
    StaleVersion,
}

impl From<StockError> for AppError {
    fn from(e: StockError) -> Self {
        match e {
            StockError::Insufficient {
                requested,
                available,
                ..
            } => AppError::InsufficientStock {
                requested,
                available,
            },
            StockError::NonPositiveQuantity(n) => {
                AppError::ValidationError(format!("quantity must be positive, got {n}"))
            }
            StockError::StaleVersion => AppError::Conflict("stock version conflict".to_string()),
        }
    }
}

/// The six ledger transitions. Each moves `n` units between two partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockOp {
    /// available -> held (hold acquired)
    DebitAvailable,
    /// held -> available (hold released or expired)
    CreditAvailable,
    /// held -> reserved (hold confirmed, ticket persisted)
    Confirm,
    /// reserved -> available (ticket released back to the pool)
    Release,
    /// reserved -> resale (ticket listed on the resale market)
    ListForResale,
    /// resale -> reserved (resale completed or withdrawn)
    CompleteResale,
}

impl fmt::Display for StockOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StockOp::DebitAvailable => "debit_available",
            StockOp::CreditAvailable => "credit_available",
            StockOp::Confirm => "confirm",
            StockOp::Release => "release",
            StockOp::ListForResale => "list_for_resale",
            StockOp::CompleteResale => "complete_resale",
        };
        f.write_str(name)
    }
}

/// In-memory image of the four partitions. All transition arithmetic lives
/// here so it can be checked without a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockCounts {
    pub total: i32,
    pub available: i32,
    pub reserved: i32,
    pub held: i32,
    pub resale: i32,
}

impl StockCounts {
    pub fn fresh(total: i32) -> Self {
        Self {
            total,
            available: total,
            reserved: 0,
            held: 0,
            resale: 0,
        }
    }

    /// Conservation invariant: partitions are non-negative and never sum past
    /// `total`.
    pub fn is_consistent(&self) -> bool {
        self.available >= 0
            && self.reserved >= 0
            && self.held >= 0
            && self.resale >= 0
            && self.available + self.reserved + self.held + self.resale <= self.total
    }

    pub fn apply(&mut self, op: StockOp, n: i32) -> Result<(), StockError> {
        if n <= 0 {
            return Err(StockError::NonPositiveQuantity(n));
        }
        // Each op drains one partition into another.
        match op {
            StockOp::DebitAvailable => {
                Self::shift("available", &mut self.available, &mut self.held, n)?
            }
            StockOp::CreditAvailable => {
                Self::shift("held", &mut self.held, &mut self.available, n)?
            }
            StockOp::Confirm => Self::shift("held", &mut self.held, &mut self.reserved, n)?,
            StockOp::Release => {
                Self::shift("reserved", &mut self.reserved, &mut self.available, n)?
            }
            StockOp::ListForResale => {
                Self::shift("reserved", &mut self.reserved, &mut self.resale, n)?
            }
            StockOp::CompleteResale => {
                Self::shift("resale", &mut self.resale, &mut self.reserved, n)?
            }
        }
        debug_assert!(self.is_consistent());
        Ok(())
    }

    fn shift(
        partition: &'static str,
        from: &mut i32,
        to: &mut i32,
        n: i32,
    ) -> Result<(), StockError> {
        if *from < n {
            return Err(StockError::Insufficient {
                partition,
                requested: n,
                available: *from,
            });
        }
        *from -= n;
        *to += n;
        Ok(())
    }
}

impl From<&TicketStock> for StockCounts {
    fn from(row: &TicketStock) -> Self {
        Self {
            total: row.total,
            available: row.available,
            reserved: row.reserved,
            held: row.held,
            resale: row.resale,
        }
    }
}

/// Lock the stock row for a ticket type within the caller's transaction.
pub async fn lock_stock_row(tx: &mut Tx<'_>, ticket_type_id: Uuid) -> Result<TicketStock, AppError> {
    let row = sqlx::query_as::<_, TicketStock>(
        "SELECT * FROM ticket_stocks WHERE ticket_type_id = $1 FOR UPDATE",
    )
    .bind(ticket_type_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("no stock row for ticket type {ticket_type_id}")))?;
    Ok(row)
}

/// Apply one ledger transition inside the caller's transaction.
///
/// The row is already locked, so the version predicate cannot miss under
/// normal operation; a zero-row update means something bypassed the lock and
/// the caller must treat the attempt as stale.
pub async fn apply_in_tx(
    tx: &mut Tx<'_>,
    ticket_type_id: Uuid,
    op: StockOp,
    n: i32,
) -> Result<TicketStock, AppError> {
    let row = lock_stock_row(tx, ticket_type_id).await?;

    let mut counts = StockCounts::from(&row);
    counts.apply(op, n).map_err(AppError::from)?;

    let updated = sqlx::query_as::<_, TicketStock>(
        r#"
        UPDATE ticket_stocks
        SET available = $1,
            reserved = $2,
            held = $3,
            resale = $4,
            version = version + 1,
            updated_at = now()
        WHERE id = $5 AND version = $6
        RETURNING *
        "#,
    )
    .bind(counts.available)
    .bind(counts.reserved)
    .bind(counts.held)
    .bind(counts.resale)
    .bind(row.id)
    .bind(row.version)
    .fetch_optional(&mut **tx)
    .await?;

    match updated {
        Some(stock) => {
            debug!(
                ticket_type_id = %ticket_type_id,
                op = %op,
                quantity = n,
                available = stock.available,
                held = stock.held,
                reserved = stock.reserved,
                resale = stock.resale,
                "stock transition applied"
            );
            Ok(stock)
        }
        None => Err(StockError::StaleVersion.into()),
    }
}

/// Retry an operation that can lose a race on a version-guarded row.
///
/// Each attempt must be a self-contained transaction; a failed attempt has
/// rolled everything back before the next one starts. Stale-version
/// conflicts get three attempts, transient contention (deadlock or
/// serialization failure) two, everything else propagates immediately.
pub async fn with_contention_retry<T, F, Fut>(op_name: &str, mut attempt: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut stale_left = STALE_VERSION_RETRIES;
    let mut transient_left = DEADLOCK_RETRIES;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(AppError::Conflict(msg)) if stale_left > 0 => {
                stale_left -= 1;
                warn!(op = op_name, %msg, "version conflict, retrying");
                tokio::time::sleep(jittered_backoff()).await;
            }
            Err(AppError::Transient(msg)) if transient_left > 0 => {
                transient_left -= 1;
                warn!(op = op_name, %msg, "database contention, retrying");
                tokio::time::sleep(jittered_backoff()).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn jittered_backoff() -> Duration {
    let ms = rand::thread_rng().gen_range(BACKOFF_MIN_MS..=BACKOFF_MAX_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_counts_are_consistent() {
        let counts = StockCounts::fresh(10);
        assert!(counts.is_consistent());
        assert_eq!(counts.available, 10);
    }

    #[test]
    fn test_full_purchase_cycle_conserves_units() {
        let mut counts = StockCounts::fresh(10);

        counts.apply(StockOp::DebitAvailable, 6).unwrap();
        assert_eq!((counts.available, counts.held), (4, 6));

        counts.apply(StockOp::Confirm, 6).unwrap();
        assert_eq!((counts.held, counts.reserved), (0, 6));

        counts.apply(StockOp::ListForResale, 1).unwrap();
        assert_eq!((counts.reserved, counts.resale), (5, 1));

        counts.apply(StockOp::CompleteResale, 1).unwrap();
        assert_eq!((counts.resale, counts.reserved), (0, 6));

        counts.apply(StockOp::Release, 6).unwrap();
        assert_eq!(counts, StockCounts::fresh(10));
    }

    #[test]
    fn test_exact_stock_boundary() {
        // Buying exactly what's available succeeds; one more unit fails.
        let mut counts = StockCounts::fresh(10);
        counts.apply(StockOp::DebitAvailable, 10).unwrap();
        assert_eq!(counts.available, 0);

        let err = counts.apply(StockOp::DebitAvailable, 1).unwrap_err();
        assert_eq!(
            err,
            StockError::Insufficient {
                partition: "available",
                requested: 1,
                available: 0,
            }
        );
    }

    #[test]
    fn test_competing_debits_cannot_both_win() {
        // Two buyers want 6 of 10. Whichever debit lands second must fail.
        let mut counts = StockCounts::fresh(10);
        counts.apply(StockOp::DebitAvailable, 6).unwrap();

        let err = counts.apply(StockOp::DebitAvailable, 6).unwrap_err();
        assert!(matches!(err, StockError::Insufficient { available: 4, .. }));
        assert_eq!((counts.available, counts.held), (4, 6));
    }

    #[test]
    fn test_acquire_then_release_is_identity() {
        let mut counts = StockCounts::fresh(8);
        counts.apply(StockOp::DebitAvailable, 3).unwrap();
        counts.apply(StockOp::CreditAvailable, 3).unwrap();
        assert_eq!(counts, StockCounts::fresh(8));
    }

    #[test]
    fn test_credit_more_than_held_fails() {
        let mut counts = StockCounts::fresh(8);
        counts.apply(StockOp::DebitAvailable, 2).unwrap();

        let err = counts.apply(StockOp::CreditAvailable, 3).unwrap_err();
        assert!(matches!(
            err,
            StockError::Insufficient {
                partition: "held",
                ..
            }
        ));
        // Partial failure leaves counts untouched.
        assert_eq!((counts.available, counts.held), (6, 2));
    }

    #[test]
    fn test_zero_and_negative_quantities_rejected() {
        let mut counts = StockCounts::fresh(5);
        assert_eq!(
            counts.apply(StockOp::DebitAvailable, 0).unwrap_err(),
            StockError::NonPositiveQuantity(0)
        );
        assert_eq!(
            counts.apply(StockOp::Confirm, -2).unwrap_err(),
            StockError::NonPositiveQuantity(-2)
        );
    }

    #[test]
    fn test_resale_requires_reserved_units() {
        let mut counts = StockCounts::fresh(5);
        let err = counts.apply(StockOp::ListForResale, 1).unwrap_err();
        assert!(matches!(
            err,
            StockError::Insufficient {
                partition: "reserved",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_contention_retry_eventually_succeeds() {
        let mut attempts = 0;
        let result = with_contention_retry("test_op", || {
            attempts += 1;
            let outcome = if attempts < 3 {
                Err(AppError::Conflict("stock version conflict".to_string()))
            } else {
                Ok(attempts)
            };
            async move { outcome }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_contention_retry_gives_up_after_budget() {
        let result: Result<(), _> = with_contention_retry("test_op", || async {
            Err(AppError::Conflict("stock version conflict".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_contention_retry_propagates_hard_errors() {
        let mut attempts = 0;
        let result: Result<(), _> = with_contention_retry("test_op", || {
            attempts += 1;
            async { Err(AppError::SalesWindowClosed) }
        })
        .await;
        assert!(matches!(result, Err(AppError::SalesWindowClosed)));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_every_transition_preserves_invariant() {
        let ops = [
            StockOp::DebitAvailable,
            StockOp::Confirm,
            StockOp::ListForResale,
            StockOp::CompleteResale,
            StockOp::Release,
        ];
        let mut counts = StockCounts::fresh(4);
        for op in ops {
            counts.apply(op, 2).unwrap();
            assert!(counts.is_consistent(), "after {op}");
        }
    }
}
