//! Door validation and single-use check-in.
//!
//! Validation failures here are expected, frequent, staff-facing outcomes,
//! so they come back as structured results rather than errors; only
//! authorization and infrastructure problems surface as `AppError`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::models::{Event, Seat, Ticket, TicketStatus};
use crate::utils::error::AppError;

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub title: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventSummary>,
    /// Assigned-seating label, when the ticket carries a seat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
}

impl ValidationOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            checked_in_at: None,
            event: None,
            seat: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckInOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
}

/// Checks whether a ticket is admissible right now. Staff only.
///
/// The checks run in order and the first failure wins: exists, not already
/// used, status exactly `sold`, event not ended.
pub async fn validate_ticket(
    pool: &PgPool,
    auth: &AuthContext,
    ticket_id: Uuid,
) -> Result<ValidationOutcome, AppError> {
    auth.require_staff()?;

    let Some(ticket) = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(ValidationOutcome::rejected("Ticket not found"));
    };

    if ticket.is_checked_in {
        return Ok(ValidationOutcome {
            valid: false,
            message: "Ticket already used".to_string(),
            checked_in_at: ticket.checked_in_at,
            event: None,
            seat: None,
        });
    }

    if TicketStatus::parse(&ticket.status) != Some(TicketStatus::Sold) {
        return Ok(ValidationOutcome::rejected(format!(
            "Ticket is not valid for entry (status: {})",
            ticket.status
        )));
    }

    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(ticket.event_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} not found", ticket.event_id)))?;

    if Utc::now() > event.end_time {
        return Ok(ValidationOutcome::rejected("Event has ended"));
    }

    let seat = match ticket.seat_id {
        Some(seat_id) => sqlx::query_as::<_, Seat>("SELECT * FROM seats WHERE id = $1")
            .bind(seat_id)
            .fetch_optional(pool)
            .await?
            .map(|s| s.label()),
        None => None,
    };

    Ok(ValidationOutcome {
        valid: true,
        message: "Ticket is valid".to_string(),
        checked_in_at: None,
        event: Some(EventSummary {
            title: event.title,
            location: event.location,
            start_time: event.start_time,
            end_time: event.end_time,
        }),
        seat,
    })
}

/// Admits a ticket exactly once.
///
/// Re-validates at check-in time, then closes the remaining check-then-act
/// window with a conditional UPDATE: of two concurrent scans, only the one
/// whose UPDATE matches a row admits the holder.
pub async fn check_in_ticket(
    pool: &PgPool,
    auth: &AuthContext,
    ticket_id: Uuid,
) -> Result<CheckInOutcome, AppError> {
    let validation = validate_ticket(pool, auth, ticket_id).await?;
    if !validation.valid {
        return Ok(CheckInOutcome {
            success: false,
            message: validation.message,
            checked_in_at: validation.checked_in_at,
        });
    }

    let checked_in: Option<(DateTime<Utc>,)> = sqlx::query_as(
        "UPDATE tickets
         SET is_checked_in = true, checked_in_at = now(), status = $2, updated_at = now()
         WHERE id = $1 AND is_checked_in = false AND status = $3
         RETURNING checked_in_at",
    )
    .bind(ticket_id)
    .bind(TicketStatus::Used.as_str())
    .bind(TicketStatus::Sold.as_str())
    .fetch_optional(pool)
    .await?;

    match checked_in {
        Some((at,)) => {
            tracing::info!(%ticket_id, staff = %auth.user_id, "Ticket checked in");
            Ok(CheckInOutcome {
                success: true,
                message: "Checked in".to_string(),
                checked_in_at: Some(at),
            })
        }
        None => {
            // A concurrent scan won the race between validation and update.
            let prior: Option<(Option<DateTime<Utc>>,)> =
                sqlx::query_as("SELECT checked_in_at FROM tickets WHERE id = $1")
                    .bind(ticket_id)
                    .fetch_optional(pool)
                    .await?;

            Ok(CheckInOutcome {
                success: false,
                message: "Ticket already used".to_string(),
                checked_in_at: prior.and_then(|p| p.0),
            })
        }
    }
}
