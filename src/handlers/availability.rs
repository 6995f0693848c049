use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::services::inventory;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

/// `GET /events/:id/availability`
pub async fn get_availability(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let categories = inventory::get_available_tickets(&state.pool, event_id).await?;
    Ok(success(categories, "Ticket availability").into_response())
}
