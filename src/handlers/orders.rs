use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::services::orders::{self, OrderItemRequest};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    pub total: Decimal,
}

/// `POST /orders`
pub async fn create_order(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<CreateOrderRequest>,
) -> Result<Response, AppError> {
    let order = orders::create_order(&state.pool, &auth, &body.items, body.total).await?;
    Ok(created(order, "Order created").into_response())
}

/// `POST /orders/:id/cancel`
pub async fn cancel_order(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let order = orders::cancel_order(&state.pool, &auth, order_id).await?;
    Ok(success(order, "Order cancelled").into_response())
}
