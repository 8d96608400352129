use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-user, per-event purchase cap. Checked before any stock row is touched.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserTicketLimits {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub max_tickets: i32,
    pub tickets_bought: i32,
    pub tickets_resold: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserTicketLimits {
    pub fn can_buy(&self, quantity: i32) -> bool {
        self.tickets_bought + quantity <= self.max_tickets
    }

    pub fn remaining(&self) -> i32 {
        (self.max_tickets - self.tickets_bought).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: i32, bought: i32) -> UserTicketLimits {
        UserTicketLimits {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            max_tickets: max,
            tickets_bought: bought,
            tickets_resold: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_cap_is_inclusive() {
        let l = limits(4, 3);
        assert!(l.can_buy(1));
        assert!(!l.can_buy(2));
        assert_eq!(l.remaining(), 1);
    }

    #[test]
    fn test_remaining_never_negative() {
        let l = limits(2, 2);
        assert_eq!(l.remaining(), 0);
        assert!(!l.can_buy(1));
    }
}
