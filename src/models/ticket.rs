use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketCategory {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub reserved: i32,
    pub sold: i32,
    pub available_from: DateTime<Utc>,
    pub available_to: DateTime<Utc>,
    pub is_vip: bool,
    pub is_early_bird: bool,
    pub max_per_order: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketCategory {
    /// Units still purchasable, never negative.
    pub fn available(&self) -> i32 {
        (self.quantity - self.reserved - self.sold).max(0)
    }

    pub fn is_available_now(&self, now: DateTime<Utc>) -> bool {
        self.available_from <= now && now <= self.available_to
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_category_id: Option<Uuid>,
    pub seat_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub price: Decimal,
    pub status: String,
    pub qr_code: Option<String>,
    pub barcode: Option<String>,
    pub is_checked_in: bool,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Available,
    Reserved,
    Sold,
    Cancelled,
    Used,
    Expired,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Available => "available",
            TicketStatus::Reserved => "reserved",
            TicketStatus::Sold => "sold",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Used => "used",
            TicketStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(TicketStatus::Available),
            "reserved" => Some(TicketStatus::Reserved),
            "sold" => Some(TicketStatus::Sold),
            "cancelled" => Some(TicketStatus::Cancelled),
            "used" => Some(TicketStatus::Used),
            "expired" => Some(TicketStatus::Expired),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn category(quantity: i32, reserved: i32, sold: i32) -> TicketCategory {
        let now = Utc::now();
        TicketCategory {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "Regular".to_string(),
            price: Decimal::new(50000, 2),
            quantity,
            reserved,
            sold,
            available_from: now - Duration::days(1),
            available_to: now + Duration::days(1),
            is_vip: false,
            is_early_bird: false,
            max_per_order: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn available_subtracts_committed_units() {
        assert_eq!(category(100, 10, 30).available(), 60);
    }

    #[test]
    fn available_never_goes_negative() {
        assert_eq!(category(10, 8, 5).available(), 0);
    }

    #[test]
    fn sales_window_bounds_are_inclusive_of_now() {
        let cat = category(10, 0, 0);
        assert!(cat.is_available_now(Utc::now()));
        assert!(!cat.is_available_now(Utc::now() + Duration::days(2)));
        assert!(!cat.is_available_now(Utc::now() - Duration::days(2)));
    }

    #[test]
    fn ticket_status_round_trips_through_strings() {
        for status in [
            TicketStatus::Available,
            TicketStatus::Reserved,
            TicketStatus::Sold,
            TicketStatus::Cancelled,
            TicketStatus::Used,
            TicketStatus::Expired,
        ] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("refunded"), None);
    }
}
