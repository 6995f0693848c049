//! Order creation: reserve inventory and open a pending order atomically.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::models::{Order, OrderStatus, Ticket, TicketCategory, TicketStatus};
use crate::services::inventory::reserve_units;
use crate::utils::error::AppError;
use crate::utils::{random_suffix, to_base36};

const ORDER_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemRequest {
    pub ticket_category_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CreatedOrder {
    pub order: Order,
    pub tickets: Vec<Ticket>,
}

/// `ORD-<base36 timestamp>-<6 random alphanumeric>`.
pub fn generate_order_number() -> String {
    format!(
        "ORD-{}-{}",
        to_base36(Utc::now().timestamp_millis().max(0) as u64),
        random_suffix(ORDER_SUFFIX_LEN)
    )
}

/// Resolves an order the caller may act on. A missing order and an order
/// owned by someone else answer identically, so the response never reveals
/// whether the id exists.
pub(crate) fn authorize_order(
    auth: &AuthContext,
    order: Option<Order>,
    order_id: Uuid,
) -> Result<Order, AppError> {
    match order {
        Some(order) if auth.require_order_access(order.user_id).is_ok() => Ok(order),
        _ => Err(AppError::NotFound(format!("Order {order_id} not found"))),
    }
}

/// Checks per-order limits and that the requested total matches the summed
/// line prices. The category rows passed in must be the ones the tickets
/// were priced from, so price and validation cannot disagree.
fn validate_order_pricing(
    lines: &[(TicketCategory, i32)],
    total: Decimal,
) -> Result<(), AppError> {
    let mut expected_total = Decimal::ZERO;
    for (category, quantity) in lines {
        if let Some(max) = category.max_per_order {
            if *quantity > max {
                return Err(AppError::ValidationError(format!(
                    "At most {max} tickets of '{}' per order",
                    category.name
                )));
            }
        }
        expected_total += category.price * Decimal::from(*quantity);
    }

    if expected_total != total {
        return Err(AppError::ValidationError(format!(
            "Order total {total} does not match ticket prices {expected_total}"
        )));
    }
    Ok(())
}

/// Reserves inventory, opens the order, and creates one reserved ticket row
/// per unit, all in a single transaction. Prices are read from the same row
/// versions the reservation locked, and the requested total is validated
/// against those, so a price change racing the order rolls the whole
/// transaction back instead of producing a mispriced order.
pub async fn create_order(
    pool: &PgPool,
    auth: &AuthContext,
    items: &[OrderItemRequest],
    total: Decimal,
) -> Result<CreatedOrder, AppError> {
    if items.is_empty() {
        return Err(AppError::ValidationError(
            "An order needs at least one ticket".to_string(),
        ));
    }
    for item in items {
        if item.quantity < 1 {
            return Err(AppError::ValidationError(
                "Ticket quantity must be at least 1".to_string(),
            ));
        }
    }

    let mut tx = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (order_number, user_id, total, status)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(generate_order_number())
    .bind(auth.user_id)
    .bind(total)
    .bind(OrderStatus::Pending.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let mut tickets = Vec::new();
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        // Conditional counter bump; a concurrent buyer taking the last units
        // makes this fail and the whole transaction rolls back. The updated
        // row it returns is the authoritative price for this order.
        let category = reserve_units(&mut tx, item.ticket_category_id, item.quantity).await?;

        for _ in 0..item.quantity {
            let ticket = sqlx::query_as::<_, Ticket>(
                "INSERT INTO tickets (event_id, ticket_category_id, order_id, price, status)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING *",
            )
            .bind(category.event_id)
            .bind(category.id)
            .bind(order.id)
            .bind(category.price)
            .bind(TicketStatus::Reserved.as_str())
            .fetch_one(&mut *tx)
            .await?;
            tickets.push(ticket);
        }
        lines.push((category, item.quantity));
    }

    // Errors here drop the transaction, releasing everything above.
    validate_order_pricing(&lines, total)?;

    tx.commit().await?;

    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        tickets = tickets.len(),
        "Order created"
    );

    Ok(CreatedOrder { order, tickets })
}

/// Cancels a pending order, releasing its reserved inventory.
pub async fn cancel_order(
    pool: &PgPool,
    auth: &AuthContext,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    let order = authorize_order(auth, order, order_id)?;

    let mut tx = pool.begin().await?;

    let cancelled = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, updated_at = now()
         WHERE id = $1 AND status = ANY($3)
         RETURNING *",
    )
    .bind(order.id)
    .bind(OrderStatus::Cancelled.as_str())
    .bind(OrderStatus::transition_sources(OrderStatus::Cancelled))
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| {
        AppError::ValidationError("Only pending orders can be cancelled".to_string())
    })?;

    crate::services::payments::release_order_reservations(&mut tx, order_id).await?;

    tx.commit().await?;

    tracing::info!(%order_id, "Order cancelled");
    Ok(cancelled)
}
