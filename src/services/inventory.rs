//! Live availability and oversell-safe reservation.
//!
//! Capacity is tracked as `reserved`/`sold` counters on the category row.
//! Reservation is a single conditional UPDATE, so two concurrent buyers can
//! never commit more units than `quantity`; the database check constraint
//! backstops the same invariant.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Event, TicketCategory};
use crate::utils::error::AppError;

#[derive(Debug, Serialize)]
pub struct CategoryAvailability {
    pub ticket_category_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub available: i32,
    pub is_available_now: bool,
    pub is_vip: bool,
    pub is_early_bird: bool,
    pub max_per_order: Option<i32>,
}

/// Availability of every category of an event. Pure read.
pub async fn get_available_tickets(
    pool: &PgPool,
    event_id: Uuid,
) -> Result<Vec<CategoryAvailability>, AppError> {
    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(pool)
        .await?;
    if event.is_none() {
        return Err(AppError::NotFound(format!("Event {event_id} not found")));
    }

    let categories = sqlx::query_as::<_, TicketCategory>(
        "SELECT * FROM ticket_categories WHERE event_id = $1 ORDER BY price",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    Ok(categories
        .into_iter()
        .map(|c| CategoryAvailability {
            ticket_category_id: c.id,
            name: c.name.clone(),
            price: c.price,
            quantity: c.quantity,
            available: c.available(),
            is_available_now: c.is_available_now(now),
            is_vip: c.is_vip,
            is_early_bird: c.is_early_bird,
            max_per_order: c.max_per_order,
        })
        .collect())
}

/// Reserves `quantity` units of a category, all or nothing.
///
/// The capacity check and the counter bump are one statement, so a
/// concurrent reservation either sees the updated counter or loses the
/// race; it can never interleave between check and act.
pub async fn reserve_units(
    tx: &mut Transaction<'_, Postgres>,
    category_id: Uuid,
    quantity: i32,
) -> Result<TicketCategory, AppError> {
    let reserved = sqlx::query_as::<_, TicketCategory>(
        "UPDATE ticket_categories
         SET reserved = reserved + $2, updated_at = now()
         WHERE id = $1
           AND reserved + sold + $2 <= quantity
           AND available_from <= now() AND now() <= available_to
         RETURNING *",
    )
    .bind(category_id)
    .bind(quantity)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(category) = reserved {
        return Ok(category);
    }

    // The conditional update missed; read the row to report why.
    let category = sqlx::query_as::<_, TicketCategory>(
        "SELECT * FROM ticket_categories WHERE id = $1",
    )
    .bind(category_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Ticket category {category_id} not found")))?;

    if !category.is_available_now(Utc::now()) {
        return Err(AppError::ValidationError(format!(
            "Sales for '{}' are not currently open",
            category.name
        )));
    }

    Err(AppError::InventoryExhausted {
        remaining: category.available(),
    })
}
