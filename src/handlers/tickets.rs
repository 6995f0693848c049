use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::services::checkin;
use crate::services::credentials::verify_ticket_qr;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct VerifyQrRequest {
    pub qr_payload: String,
}

/// `POST /tickets/verify-qr`
pub async fn verify_qr(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(body): Json<VerifyQrRequest>,
) -> Result<Response, AppError> {
    let result = verify_ticket_qr(&body.qr_payload, &state.ticket_secret);
    Ok(success(result, "Credential verification").into_response())
}

/// `POST /tickets/:id/validate`
pub async fn validate_ticket(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let outcome = checkin::validate_ticket(&state.pool, &auth, ticket_id).await?;
    Ok(success(outcome, "Ticket validation").into_response())
}

/// `POST /tickets/:id/check-in`
pub async fn check_in_ticket(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let outcome = checkin::check_in_ticket(&state.pool, &auth, ticket_id).await?;
    Ok(success(outcome, "Ticket check-in").into_response())
}
