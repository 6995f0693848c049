use axum::{
    routing::{get, post},
    Router,
};

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{self, availability, orders, payments, tickets};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/events/:id/availability", get(availability::get_availability))
        .route("/orders", post(orders::create_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/pay", post(payments::pay_order))
        .route("/orders/:id/payment-status", get(payments::payment_status))
        .route("/payments/mpesa/callback", post(payments::mpesa_callback))
        .route("/tickets/verify-qr", post(tickets::verify_qr))
        .route("/tickets/:id/validate", post(tickets::validate_ticket))
        .route("/tickets/:id/check-in", post(tickets::check_in_ticket))
        .layer(create_security_headers_layer())
        .layer(create_cors_layer())
        .with_state(state)
}
