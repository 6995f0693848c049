//! Settlement idempotency against an in-memory store double.
//!
//! The webhook and the polling fallback race for the same payment; these
//! tests pin down that whichever lands second is a no-op, and that a webhook
//! losing the race still contributes the receipt the poll could not supply.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use serde_json::{json, Value};
use uuid::Uuid;

use tiketi_server::models::PaymentStatus;
use tiketi_server::mpesa::{MpesaCallbackBody, PollOutcome, StkCallback};
use tiketi_server::services::payments::{
    apply_poll_outcome, process_mpesa_callback, PaymentSnapshot, SettlementDisposition,
    SettlementStore, SettlementUpdate,
};
use tiketi_server::utils::error::AppError;

/// Hash-map-backed stand-in for the Postgres store. Mirrors the same
/// contract: `settle` flips the payment only when the transition table
/// permits it, and applies the order consequence in the same step.
#[derive(Default)]
struct InMemorySettlementStore {
    payments: Mutex<HashMap<String, PaymentSnapshot>>,
    order_statuses: Mutex<HashMap<Uuid, String>>,
    finalize_counts: Mutex<HashMap<Uuid, u32>>,
}

impl InMemorySettlementStore {
    fn with_pending_payment(checkout_request_id: &str) -> (Self, Uuid) {
        let store = Self::default();
        let order_id = Uuid::new_v4();
        store.payments.lock().unwrap().insert(
            checkout_request_id.to_string(),
            PaymentSnapshot {
                id: Uuid::new_v4(),
                order_id,
                status: PaymentStatus::Pending.as_str().to_string(),
                receipt_number: None,
            },
        );
        store
            .order_statuses
            .lock()
            .unwrap()
            .insert(order_id, "processing".to_string());
        (store, order_id)
    }

    fn payment(&self, checkout_request_id: &str) -> PaymentSnapshot {
        self.payments.lock().unwrap()[checkout_request_id].clone()
    }

    fn order_status(&self, order_id: Uuid) -> String {
        self.order_statuses.lock().unwrap()[&order_id].clone()
    }

    fn finalize_count(&self, order_id: Uuid) -> u32 {
        *self
            .finalize_counts
            .lock()
            .unwrap()
            .get(&order_id)
            .unwrap_or(&0)
    }
}

impl SettlementStore for InMemorySettlementStore {
    fn settle<'a>(
        &'a self,
        checkout_request_id: &'a str,
        update: &'a SettlementUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentSnapshot>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut payments = self.payments.lock().unwrap();
            let Some(payment) = payments.get_mut(checkout_request_id) else {
                return Ok(None);
            };

            let next = update.next_status();
            if !PaymentStatus::transition_sources(next).contains(&payment.status) {
                return Ok(None);
            }

            payment.status = next.as_str().to_string();
            if update.receipt_number.is_some() {
                payment.receipt_number = update.receipt_number.clone();
            }
            let snapshot = payment.clone();
            drop(payments);

            let order_status = if update.success { "completed" } else { "failed" };
            self.order_statuses
                .lock()
                .unwrap()
                .insert(snapshot.order_id, order_status.to_string());
            if update.success {
                *self
                    .finalize_counts
                    .lock()
                    .unwrap()
                    .entry(snapshot.order_id)
                    .or_insert(0) += 1;
            }

            Ok(Some(snapshot))
        })
    }

    fn find_payment<'a>(
        &'a self,
        checkout_request_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentSnapshot>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .payments
                .lock()
                .unwrap()
                .get(checkout_request_id)
                .cloned())
        })
    }

    fn attach_receipt<'a>(
        &'a self,
        payment_id: Uuid,
        update: &'a SettlementUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut payments = self.payments.lock().unwrap();
            if let Some(payment) = payments.values_mut().find(|p| p.id == payment_id) {
                if payment.receipt_number.is_none() {
                    payment.receipt_number = update.receipt_number.clone();
                }
            }
            Ok(())
        })
    }
}

const CHECKOUT_ID: &str = "ws_CO_191220191020363925";

fn success_callback() -> (StkCallback, Value) {
    let raw = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": CHECKOUT_ID,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": 500.0 },
                        { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                        { "Name": "TransactionDate", "Value": 20191219102115_u64 }
                    ]
                }
            }
        }
    });
    let body: MpesaCallbackBody = serde_json::from_value(raw.clone()).unwrap();
    (body.body.stk_callback, raw)
}

fn cancelled_callback() -> (StkCallback, Value) {
    let raw = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": CHECKOUT_ID,
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }
        }
    });
    let body: MpesaCallbackBody = serde_json::from_value(raw.clone()).unwrap();
    (body.body.stk_callback, raw)
}

#[tokio::test]
async fn replayed_success_callback_is_a_noop() {
    let (store, order_id) = InMemorySettlementStore::with_pending_payment(CHECKOUT_ID);
    let (callback, raw) = success_callback();

    let first = process_mpesa_callback(&store, &callback, raw.clone())
        .await
        .unwrap();
    assert_eq!(first, SettlementDisposition::Completed);
    assert_eq!(store.finalize_count(order_id), 1);
    assert_eq!(store.order_status(order_id), "completed");

    // The gateway retries the webhook; nothing may settle twice.
    let second = process_mpesa_callback(&store, &callback, raw).await.unwrap();
    assert_eq!(second, SettlementDisposition::AlreadySettled);
    assert_eq!(store.finalize_count(order_id), 1);
    assert_eq!(
        store.payment(CHECKOUT_ID).receipt_number.as_deref(),
        Some("NLJ7RT61SV")
    );
}

#[tokio::test]
async fn late_webhook_backfills_receipt_after_poll_settles() {
    let (store, order_id) = InMemorySettlementStore::with_pending_payment(CHECKOUT_ID);

    // The polling fallback wins the race; it has no receipt to record.
    let outcome = PollOutcome::Completed {
        result_desc: "The service request is processed successfully.".to_string(),
    };
    let polled = apply_poll_outcome(&store, CHECKOUT_ID, &outcome).await.unwrap();
    assert_eq!(polled, SettlementDisposition::Completed);
    assert_eq!(store.payment(CHECKOUT_ID).receipt_number, None);

    // The webhook lands second: no re-settlement, but the receipt sticks.
    let (callback, raw) = success_callback();
    let webhook = process_mpesa_callback(&store, &callback, raw).await.unwrap();
    assert_eq!(webhook, SettlementDisposition::AlreadySettled);
    assert_eq!(store.finalize_count(order_id), 1);
    assert_eq!(
        store.payment(CHECKOUT_ID).receipt_number.as_deref(),
        Some("NLJ7RT61SV")
    );
}

#[tokio::test]
async fn poll_after_webhook_is_a_noop() {
    let (store, order_id) = InMemorySettlementStore::with_pending_payment(CHECKOUT_ID);
    let (callback, raw) = success_callback();
    process_mpesa_callback(&store, &callback, raw).await.unwrap();

    let outcome = PollOutcome::Completed {
        result_desc: "The service request is processed successfully.".to_string(),
    };
    let polled = apply_poll_outcome(&store, CHECKOUT_ID, &outcome).await.unwrap();
    assert_eq!(polled, SettlementDisposition::AlreadySettled);
    assert_eq!(store.finalize_count(order_id), 1);
    // The poll carries no receipt and must not clobber the webhook's.
    assert_eq!(
        store.payment(CHECKOUT_ID).receipt_number.as_deref(),
        Some("NLJ7RT61SV")
    );
}

#[tokio::test]
async fn cancelled_payment_fails_the_order() {
    let (store, order_id) = InMemorySettlementStore::with_pending_payment(CHECKOUT_ID);
    let (callback, raw) = cancelled_callback();

    let disposition = process_mpesa_callback(&store, &callback, raw).await.unwrap();
    assert_eq!(disposition, SettlementDisposition::Failed);
    assert_eq!(store.order_status(order_id), "failed");
    assert_eq!(store.finalize_count(order_id), 0);
}

#[tokio::test]
async fn unknown_checkout_id_is_rejected() {
    let store = InMemorySettlementStore::default();
    let (callback, raw) = success_callback();

    let err = process_mpesa_callback(&store, &callback, raw)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn poll_timeout_touches_nothing() {
    let (store, order_id) = InMemorySettlementStore::with_pending_payment(CHECKOUT_ID);

    let disposition = apply_poll_outcome(&store, CHECKOUT_ID, &PollOutcome::TimedOut)
        .await
        .unwrap();
    assert_eq!(disposition, SettlementDisposition::AlreadySettled);
    assert_eq!(
        store.payment(CHECKOUT_ID).status,
        PaymentStatus::Pending.as_str()
    );
    assert_eq!(store.order_status(order_id), "processing");
}
