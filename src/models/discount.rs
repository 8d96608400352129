use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discount_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiscountCode {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// 0 means unlimited.
    pub max_uses: i32,
    pub current_uses: i32,
    pub min_order_value: Decimal,
    pub is_single_use: bool,
    pub is_active: bool,
    pub event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DiscountCode {
    /// Price after applying this code, floored at zero.
    pub fn apply(&self, order_value: Decimal) -> Decimal {
        let discounted = match self.discount_type {
            DiscountType::Percentage => {
                order_value - order_value * self.value / Decimal::from(100)
            }
            DiscountType::Fixed => order_value - self.value,
        };
        discounted.max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn code(discount_type: DiscountType, value: Decimal) -> DiscountCode {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        DiscountCode {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            code: "LAUNCH20".to_string(),
            discount_type,
            value,
            valid_from: t0,
            valid_until: t0 + chrono::Duration::days(30),
            max_uses: 0,
            current_uses: 0,
            min_order_value: Decimal::ZERO,
            is_single_use: false,
            is_active: true,
            event_id: None,
            created_at: t0,
            updated_at: t0,
            deleted_at: None,
        }
    }

    #[test]
    fn test_percentage_discount() {
        let d = code(DiscountType::Percentage, Decimal::from(20));
        assert_eq!(d.apply(Decimal::from(50)), Decimal::from(40));
    }

    #[test]
    fn test_fixed_discount_floors_at_zero() {
        let d = code(DiscountType::Fixed, Decimal::from(60));
        assert_eq!(d.apply(Decimal::from(50)), Decimal::ZERO);
    }
}
