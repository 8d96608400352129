use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_type_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketTypeStatus {
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub organizer_id: Uuid,
    pub name: String,
    pub price_modifier: Decimal,
    pub min_tickets_per_user: i32,
    pub max_tickets_per_user: i32,
    pub quantity_available: Option<i32>,
    pub sales_start: DateTime<Utc>,
    pub sales_end: Option<DateTime<Utc>>,
    pub status: TicketTypeStatus,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TicketType {
    /// Sales window check: `[sales_start, sales_end?)`.
    pub fn sales_open_at(&self, at: DateTime<Utc>) -> bool {
        if at < self.sales_start {
            return false;
        }
        match self.sales_end {
            Some(end) => at < end,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "price_tier_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PriceTierStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PriceTier {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub min_tickets: i32,
    pub max_tickets: i32,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
    pub status: PriceTierStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PriceTier {
    pub fn effective_at(&self, at: DateTime<Utc>) -> bool {
        if at < self.effective_from {
            return false;
        }
        match self.effective_to {
            Some(to) => at < to,
            None => true,
        }
    }

    /// A tier may be attached to a ticket type only when it is active, inside
    /// its effective window, and its per-user bounds cover the ticket type's.
    pub fn can_attach_to(&self, ticket_type: &TicketType, at: DateTime<Utc>) -> bool {
        self.status == PriceTierStatus::Active
            && self.effective_at(at)
            && self.max_tickets >= ticket_type.max_tickets_per_user
            && self.min_tickets <= ticket_type.min_tickets_per_user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ticket_type(min: i32, max: i32) -> TicketType {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        TicketType {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            name: "General".to_string(),
            price_modifier: Decimal::ZERO,
            min_tickets_per_user: min,
            max_tickets_per_user: max,
            quantity_available: None,
            sales_start: t0,
            sales_end: Some(t0 + Duration::days(30)),
            status: TicketTypeStatus::Active,
            is_default: true,
            created_at: t0,
            updated_at: t0,
            deleted_at: None,
        }
    }

    fn tier(min: i32, max: i32, status: PriceTierStatus) -> PriceTier {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        PriceTier {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            name: "Standard".to_string(),
            price: Decimal::new(2500, 2),
            min_tickets: min,
            max_tickets: max,
            effective_from: t0,
            effective_to: None,
            status,
            created_at: t0,
            updated_at: t0,
            deleted_at: None,
        }
    }

    #[test]
    fn test_sales_window_is_half_open() {
        let tt = ticket_type(1, 4);
        assert!(!tt.sales_open_at(tt.sales_start - Duration::seconds(1)));
        assert!(tt.sales_open_at(tt.sales_start));
        let end = tt.sales_end.unwrap();
        assert!(tt.sales_open_at(end - Duration::seconds(1)));
        assert!(!tt.sales_open_at(end));
    }

    #[test]
    fn test_tier_attachment_requires_covering_bounds() {
        let tt = ticket_type(2, 6);
        let now = tt.sales_start + Duration::days(1);

        assert!(tier(1, 8, PriceTierStatus::Active).can_attach_to(&tt, now));
        // max too small
        assert!(!tier(1, 4, PriceTierStatus::Active).can_attach_to(&tt, now));
        // min too large
        assert!(!tier(3, 8, PriceTierStatus::Active).can_attach_to(&tt, now));
        // inactive tier never attaches
        assert!(!tier(1, 8, PriceTierStatus::Inactive).can_attach_to(&tt, now));
    }

    #[test]
    fn test_tier_attachment_respects_effective_window() {
        let tt = ticket_type(1, 4);
        let mut t = tier(1, 8, PriceTierStatus::Active);
        t.effective_to = Some(t.effective_from + Duration::days(10));

        assert!(t.can_attach_to(&tt, t.effective_from));
        assert!(!t.can_attach_to(&tt, t.effective_from + Duration::days(10)));
        assert!(!t.can_attach_to(&tt, t.effective_from - Duration::seconds(1)));
    }
}
