use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::mpesa::{poll_stk_status, MpesaCallbackBody, DEFAULT_POLL_ATTEMPTS, POLL_INTERVAL};
use crate::services::payments;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct PayOrderRequest {
    pub phone: String,
}

/// `POST /orders/:id/pay`
///
/// Submits the STK push, then spawns the polling fallback so the payment
/// settles even if the webhook never arrives.
pub async fn pay_order(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(order_id): Path<Uuid>,
    Json(body): Json<PayOrderRequest>,
) -> Result<Response, AppError> {
    let push = payments::send_stk_push(
        &state.pool,
        state.gateway.as_ref(),
        &auth,
        order_id,
        &body.phone,
    )
    .await?;

    let poll_state = state.clone();
    let checkout_request_id = push.checkout_request_id.clone();
    tokio::spawn(async move {
        let outcome = poll_stk_status(
            poll_state.gateway.as_ref(),
            &checkout_request_id,
            DEFAULT_POLL_ATTEMPTS,
            POLL_INTERVAL,
        )
        .await;

        if let Err(e) = payments::apply_poll_outcome(
            poll_state.settlement.as_ref(),
            &checkout_request_id,
            &outcome,
        )
        .await
        {
            tracing::error!(
                checkout_request_id = %checkout_request_id,
                error = %e,
                "Failed to apply polling outcome"
            );
        }
    });

    let data = json!({
        "checkout_request_id": push.checkout_request_id,
        "merchant_request_id": push.merchant_request_id,
        "customer_message": push.customer_message,
    });
    Ok(success(data, "Payment prompt sent to your phone").into_response())
}

/// `GET /orders/:id/payment-status`
pub async fn payment_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let view = payments::check_payment_status(&state.pool, &auth, order_id).await?;
    Ok(success(view, "Payment status").into_response())
}

/// `POST /payments/mpesa/callback`
///
/// Gateway-facing webhook; answers in the acknowledgement shape Daraja
/// expects. Unknown correlation ids surface as errors without touching any
/// existing state.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Response, AppError> {
    let body: MpesaCallbackBody = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::ValidationError(format!("Malformed callback body: {e}")))?;

    let callback = body.body.stk_callback;
    tracing::info!(
        checkout_request_id = %callback.checkout_request_id,
        result_code = callback.result_code,
        "M-Pesa callback received"
    );

    payments::process_mpesa_callback(state.settlement.as_ref(), &callback, raw).await?;

    Ok(Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })).into_response())
}
