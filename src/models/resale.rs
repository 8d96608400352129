use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "resale_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResaleStatus {
    Listed,
    Pending,
    Completed,
    Canceled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketResale {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub original_user_id: Uuid,
    pub new_user_id: Option<Uuid>,
    pub original_price: Decimal,
    pub resale_price: Decimal,
    pub platform_fee: Decimal,
    pub listed_at: DateTime<Utc>,
    pub sold_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub status: ResaleStatus,
    pub min_hold_days: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketResale {
    pub fn purchasable_at(&self, at: DateTime<Utc>) -> bool {
        self.status == ResaleStatus::Listed && at < self.expires_at
    }
}
