//! The order/payment state machine.
//!
//! Settlement has two racing triggers, the gateway webhook and the polling
//! fallback. Both funnel into [`apply_settlement`], which runs against a
//! [`SettlementStore`]: the store's guarded transition makes whichever
//! trigger arrives second a no-op, and the trait seam lets the replay and
//! receipt-backfill behavior run against an in-memory double in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::models::{Order, OrderStatus, Payment, PaymentStatus, TicketStatus};
use crate::mpesa::{PollOutcome, StkCallback, StkGateway, StkPushResponse};
use crate::services::credentials::finalize_tickets_after_payment;
use crate::services::orders::authorize_order;
use crate::utils::error::AppError;

/// What a settlement attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementDisposition {
    Completed,
    Failed,
    /// The payment was already terminal; nothing changed.
    AlreadySettled,
}

/// A terminal gateway verdict plus whatever detail came with it. The polling
/// path carries no receipt or payload; the webhook carries both.
#[derive(Debug, Clone)]
pub struct SettlementUpdate {
    pub success: bool,
    pub result_code: String,
    pub result_desc: String,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub raw_payload: Option<Value>,
}

impl SettlementUpdate {
    pub fn next_status(&self) -> PaymentStatus {
        if self.success {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        }
    }
}

/// What [`apply_settlement`] needs to know about a payment row.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentSnapshot {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub receipt_number: Option<String>,
}

/// Storage seam for payment settlement.
///
/// `settle` must be atomic: the payment's guarded status transition and its
/// order/ticket consequences land together or not at all, and of two
/// concurrent calls for the same payment at most one observes `Some`.
pub trait SettlementStore: Send + Sync {
    /// Moves the payment to the update's terminal status if its current
    /// status permits the transition, applying the order and ticket
    /// consequences in the same atomic step. Returns the settled payment,
    /// or `None` when the guard did not match.
    fn settle<'a>(
        &'a self,
        checkout_request_id: &'a str,
        update: &'a SettlementUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentSnapshot>, AppError>> + Send + 'a>>;

    fn find_payment<'a>(
        &'a self,
        checkout_request_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentSnapshot>, AppError>> + Send + 'a>>;

    /// Backfills receipt details onto a payment that settled without them.
    fn attach_receipt<'a>(
        &'a self,
        payment_id: Uuid,
        update: &'a SettlementUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusView {
    pub order_id: Uuid,
    pub order_status: String,
    pub payment_status: Option<String>,
    pub receipt_number: Option<String>,
    pub result_desc: Option<String>,
}

/// Initiates an STK push for a pending order and records the attempt.
///
/// The Payment row is inserted only after the gateway accepts the push, so a
/// gateway failure leaves nothing behind and the caller may simply retry.
pub async fn send_stk_push(
    pool: &PgPool,
    gateway: &dyn StkGateway,
    auth: &AuthContext,
    order_id: Uuid,
    phone: &str,
) -> Result<StkPushResponse, AppError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    let order = authorize_order(auth, order, order_id)?;

    match OrderStatus::parse(&order.status) {
        Some(status) if !status.is_terminal() => {}
        _ => {
            return Err(AppError::ValidationError(format!(
                "Order {} is not awaiting payment",
                order.order_number
            )))
        }
    }

    // Daraja takes whole shillings.
    let amount = order
        .total
        .round()
        .to_u64()
        .filter(|a| *a > 0)
        .ok_or_else(|| {
            AppError::ValidationError("Order total is not a payable amount".to_string())
        })?;

    let push = gateway
        .stk_push(phone, amount, &order.order_number, "Ticket purchase")
        .await?;

    sqlx::query(
        "INSERT INTO payments
             (order_id, amount, currency, status, checkout_request_id, merchant_request_id)
         VALUES ($1, $2, 'KES', $3, $4, $5)",
    )
    .bind(order_id)
    .bind(order.total)
    .bind(PaymentStatus::Pending.as_str())
    .bind(&push.checkout_request_id)
    .bind(&push.merchant_request_id)
    .execute(pool)
    .await?;

    // The push reached the handset; the order is now in-flight.
    sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 AND status = $3")
        .bind(order_id)
        .bind(OrderStatus::Processing.as_str())
        .bind(OrderStatus::Pending.as_str())
        .execute(pool)
        .await?;

    tracing::info!(
        %order_id,
        checkout_request_id = %push.checkout_request_id,
        amount,
        "STK push submitted"
    );

    Ok(push)
}

/// Applies the inbound webhook callback. Idempotent under gateway retries.
pub async fn process_mpesa_callback(
    store: &dyn SettlementStore,
    callback: &StkCallback,
    raw_payload: Value,
) -> Result<SettlementDisposition, AppError> {
    let update = SettlementUpdate {
        success: callback.is_success(),
        result_code: callback.result_code.to_string(),
        result_desc: callback.result_desc.clone(),
        receipt_number: callback.receipt_number(),
        transaction_date: callback.transaction_date(),
        raw_payload: Some(raw_payload),
    };
    apply_settlement(store, &callback.checkout_request_id, &update).await
}

/// Applies a terminal polling outcome. A timeout changes nothing.
pub async fn apply_poll_outcome(
    store: &dyn SettlementStore,
    checkout_request_id: &str,
    outcome: &PollOutcome,
) -> Result<SettlementDisposition, AppError> {
    let update = match outcome {
        PollOutcome::Completed { result_desc } => SettlementUpdate {
            success: true,
            result_code: "0".to_string(),
            result_desc: result_desc.clone(),
            receipt_number: None,
            transaction_date: None,
            raw_payload: None,
        },
        PollOutcome::Failed {
            result_code,
            result_desc,
        } => SettlementUpdate {
            success: false,
            result_code: result_code.clone(),
            result_desc: result_desc.clone(),
            receipt_number: None,
            transaction_date: None,
            raw_payload: None,
        },
        PollOutcome::TimedOut => return Ok(SettlementDisposition::AlreadySettled),
    };
    apply_settlement(store, checkout_request_id, &update).await
}

/// The single settlement path shared by webhook and polling.
///
/// The store's guarded transition settles the payment at most once; a
/// notification for an already-terminal payment is reported as
/// [`SettlementDisposition::AlreadySettled`], except that a webhook arriving
/// after the polling path completed still contributes the receipt details the
/// poll could not supply.
pub async fn apply_settlement(
    store: &dyn SettlementStore,
    checkout_request_id: &str,
    update: &SettlementUpdate,
) -> Result<SettlementDisposition, AppError> {
    if let Some(payment) = store.settle(checkout_request_id, update).await? {
        let disposition = if update.success {
            SettlementDisposition::Completed
        } else {
            SettlementDisposition::Failed
        };
        tracing::info!(
            checkout_request_id,
            order_id = %payment.order_id,
            result_code = %update.result_code,
            outcome = ?disposition,
            "Payment settled"
        );
        return Ok(disposition);
    }

    // Either an unknown correlation id or a replayed notification for an
    // already-settled payment.
    match store.find_payment(checkout_request_id).await? {
        Some(payment) => {
            if payment.status == PaymentStatus::Completed.as_str()
                && payment.receipt_number.is_none()
                && update.receipt_number.is_some()
            {
                store.attach_receipt(payment.id, update).await?;
            }
            tracing::info!(
                checkout_request_id,
                status = %payment.status,
                "Ignoring gateway notification for settled payment"
            );
            Ok(SettlementDisposition::AlreadySettled)
        }
        None => Err(AppError::NotFound(format!(
            "No payment for checkout request {checkout_request_id}"
        ))),
    }
}

/// Postgres-backed settlement store used in production.
pub struct PgSettlementStore {
    pool: PgPool,
    ticket_secret: Arc<String>,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool, ticket_secret: Arc<String>) -> Self {
        Self {
            pool,
            ticket_secret,
        }
    }

    async fn do_settle(
        &self,
        checkout_request_id: &str,
        update: &SettlementUpdate,
    ) -> Result<Option<PaymentSnapshot>, AppError> {
        let mut tx = self.pool.begin().await?;

        let next_status = update.next_status();
        let settled = sqlx::query_as::<_, Payment>(
            "UPDATE payments
             SET status = $2,
                 result_code = $3,
                 result_desc = $4,
                 receipt_number = COALESCE($5, receipt_number),
                 transaction_date = COALESCE($6, transaction_date),
                 callback_payload = COALESCE($7, callback_payload),
                 updated_at = now()
             WHERE checkout_request_id = $1 AND status = ANY($8)
             RETURNING *",
        )
        .bind(checkout_request_id)
        .bind(next_status.as_str())
        .bind(&update.result_code)
        .bind(&update.result_desc)
        .bind(&update.receipt_number)
        .bind(&update.transaction_date)
        .bind(&update.raw_payload)
        .bind(PaymentStatus::transition_sources(next_status))
        .fetch_optional(&mut *tx)
        .await?;

        // Guard missed: the transaction holds no writes and is dropped.
        let Some(payment) = settled else {
            return Ok(None);
        };

        if update.success {
            finalize_tickets_after_payment(&mut tx, payment.order_id, &self.ticket_secret).await?;
        } else {
            sqlx::query(
                "UPDATE orders SET status = $2, updated_at = now()
                 WHERE id = $1 AND status = ANY($3)",
            )
            .bind(payment.order_id)
            .bind(OrderStatus::Failed.as_str())
            .bind(OrderStatus::transition_sources(OrderStatus::Failed))
            .execute(&mut *tx)
            .await?;

            release_order_reservations(&mut tx, payment.order_id).await?;
        }

        tx.commit().await?;

        Ok(Some(PaymentSnapshot {
            id: payment.id,
            order_id: payment.order_id,
            status: payment.status,
            receipt_number: payment.receipt_number,
        }))
    }
}

impl SettlementStore for PgSettlementStore {
    fn settle<'a>(
        &'a self,
        checkout_request_id: &'a str,
        update: &'a SettlementUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentSnapshot>, AppError>> + Send + 'a>> {
        Box::pin(self.do_settle(checkout_request_id, update))
    }

    fn find_payment<'a>(
        &'a self,
        checkout_request_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentSnapshot>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let snapshot = sqlx::query_as::<_, PaymentSnapshot>(
                "SELECT id, order_id, status, receipt_number
                 FROM payments WHERE checkout_request_id = $1",
            )
            .bind(checkout_request_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(snapshot)
        })
    }

    fn attach_receipt<'a>(
        &'a self,
        payment_id: Uuid,
        update: &'a SettlementUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE payments
                 SET receipt_number = $2,
                     transaction_date = COALESCE($3, transaction_date),
                     callback_payload = COALESCE($4, callback_payload),
                     updated_at = now()
                 WHERE id = $1 AND receipt_number IS NULL",
            )
            .bind(payment_id)
            .bind(&update.receipt_number)
            .bind(&update.transaction_date)
            .bind(&update.raw_payload)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }
}

/// Returns an order's reserved tickets to the pool: ticket rows become
/// `cancelled` and category counters are decremented accordingly.
pub(crate) async fn release_order_reservations(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<(), AppError> {
    let released: Vec<(Option<Uuid>,)> = sqlx::query_as(
        "UPDATE tickets SET status = $2, updated_at = now()
         WHERE order_id = $1 AND status = $3
         RETURNING ticket_category_id",
    )
    .bind(order_id)
    .bind(TicketStatus::Cancelled.as_str())
    .bind(TicketStatus::Reserved.as_str())
    .fetch_all(&mut **tx)
    .await?;

    for (category_id,) in released {
        let Some(category_id) = category_id else {
            continue;
        };
        sqlx::query(
            "UPDATE ticket_categories
             SET reserved = GREATEST(reserved - 1, 0), updated_at = now()
             WHERE id = $1",
        )
        .bind(category_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Read-only projection for buyer/staff UI polling.
pub async fn check_payment_status(
    pool: &PgPool,
    auth: &AuthContext,
    order_id: Uuid,
) -> Result<PaymentStatusView, AppError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    let order = authorize_order(auth, order, order_id)?;

    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;

    Ok(PaymentStatusView {
        order_id,
        order_status: order.status,
        payment_status: payment.as_ref().map(|p| p.status.clone()),
        receipt_number: payment.as_ref().and_then(|p| p.receipt_number.clone()),
        result_desc: payment.and_then(|p| p.result_desc),
    })
}
