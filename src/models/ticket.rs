use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Valid,
    Used,
    Canceled,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_type_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub actual_price: Decimal,
    pub discount_code_id: Option<Uuid>,
    pub status: TicketStatus,
    pub qr_hash: String,
    pub payment_reference: Option<String>,
    pub is_transferable: bool,
    pub purchased_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
