use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Seat {
    pub id: Uuid,
    pub event_id: Uuid,
    pub section: String,
    pub row_label: String,
    pub seat_number: i32,
}

impl Seat {
    /// Human-readable label shown to door staff, e.g. `VIP B-12`.
    pub fn label(&self) -> String {
        format!("{} {}-{}", self.section, self.row_label, self.seat_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_label_reads_section_row_number() {
        let seat = Seat {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            section: "VIP".to_string(),
            row_label: "B".to_string(),
            seat_number: 12,
        };
        assert_eq!(seat.label(), "VIP B-12");
    }
}
