use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub total: Decimal,
    pub tax: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            "refunded" => Some(OrderStatus::Refunded),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Legal transitions of the order state machine. Every terminal state
    /// except `completed -> refunded` is absorbing.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Failed
                | OrderStatus::Refunded
                | OrderStatus::Cancelled
        )
    }

    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Refunded,
        OrderStatus::Cancelled,
    ];

    /// The states from which `next` is legally reachable, as status strings.
    /// Conditional UPDATE guards are built from this so the SQL can never
    /// drift from the transition table above.
    pub fn transition_sources(next: OrderStatus) -> Vec<String> {
        Self::ALL
            .iter()
            .filter(|s| s.can_transition_to(next))
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn pending_reaches_every_first_hop() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
    }

    #[test]
    fn refund_only_from_completed() {
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Failed.can_transition_to(Refunded));
        assert!(!Processing.can_transition_to(Refunded));
    }

    #[test]
    fn transition_sources_match_the_table() {
        assert_eq!(
            super::OrderStatus::transition_sources(Completed),
            vec!["pending".to_string(), "processing".to_string()]
        );
        assert_eq!(
            super::OrderStatus::transition_sources(Cancelled),
            vec!["pending".to_string()]
        );
        assert_eq!(
            super::OrderStatus::transition_sources(Refunded),
            vec!["completed".to_string()]
        );
    }

    #[test]
    fn terminal_states_do_not_restart() {
        for terminal in [Failed, Refunded, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Completed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
