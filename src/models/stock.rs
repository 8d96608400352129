use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Four-partition inventory row, one per ticket type.
///
/// Units move between partitions, never appear or vanish:
/// `available + reserved + held + resale <= total` at every commit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketStock {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub total: i32,
    pub available: i32,
    pub reserved: i32,
    pub held: i32,
    pub resale: i32,
    pub hold_seconds: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Time-bounded soft claim on N units of a ticket type. Not a reservation:
/// no ticket exists until the hold is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketHold {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub user_id: Uuid,
    pub session_id: String,
    pub quantity: i32,
    pub held_until: DateTime<Utc>,
    pub extended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketHold {
    pub fn expired_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.held_until
    }
}
