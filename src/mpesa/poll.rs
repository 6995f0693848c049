//! Polling fallback for push-payment confirmation.
//!
//! The webhook is the primary confirmation path, but Daraja does not promise
//! delivery in bounded time. This loop races the webhook; whichever observes
//! the terminal outcome first applies it (the guarded transition in
//! `services::payments` makes the second observer a no-op).

use std::time::Duration;

use crate::mpesa::client::StkGateway;
use crate::mpesa::types::StkQueryOutcome;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed {
        result_desc: String,
    },
    Failed {
        result_code: String,
        result_desc: String,
    },
    /// Attempts exhausted without a terminal answer. Not a failure: the
    /// webhook may still settle the payment later.
    TimedOut,
}

pub async fn poll_stk_status(
    gateway: &dyn StkGateway,
    checkout_request_id: &str,
    attempts: u32,
    interval: Duration,
) -> PollOutcome {
    for attempt in 1..=attempts {
        tokio::time::sleep(interval).await;

        match gateway.stk_query(checkout_request_id).await {
            Ok(StkQueryOutcome::Paid { result_desc }) => {
                tracing::info!(checkout_request_id, attempt, "STK poll: payment confirmed");
                return PollOutcome::Completed { result_desc };
            }
            Ok(StkQueryOutcome::Failed {
                result_code,
                result_desc,
            }) => {
                tracing::info!(
                    checkout_request_id,
                    attempt,
                    result_code = %result_code,
                    "STK poll: payment failed"
                );
                return PollOutcome::Failed {
                    result_code,
                    result_desc,
                };
            }
            Ok(StkQueryOutcome::StillProcessing) => {
                tracing::debug!(checkout_request_id, attempt, "STK poll: still processing");
            }
            // Transient gateway errors consume an attempt but do not decide
            // the payment either way.
            Err(e) => {
                tracing::warn!(checkout_request_id, attempt, error = %e, "STK poll: query error");
            }
        }
    }

    tracing::info!(checkout_request_id, "STK poll: attempts exhausted");
    PollOutcome::TimedOut
}
