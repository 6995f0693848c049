//! Polling fallback behavior against a scripted gateway double.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tiketi_server::mpesa::{
    poll_stk_status, PollOutcome, StkGateway, StkPushResponse, StkQueryOutcome,
};
use tiketi_server::utils::error::AppError;

/// Replays a fixed sequence of query outcomes, then keeps answering
/// "still processing".
struct ScriptedGateway {
    script: Mutex<VecDeque<Result<StkQueryOutcome, AppError>>>,
    queries: AtomicU32,
}

impl ScriptedGateway {
    fn new(script: Vec<Result<StkQueryOutcome, AppError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            queries: AtomicU32::new(0),
        }
    }

    fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

impl StkGateway for ScriptedGateway {
    fn stk_push<'a>(
        &'a self,
        _phone: &'a str,
        _amount: u64,
        _account_reference: &'a str,
        _description: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StkPushResponse, AppError>> + Send + 'a>> {
        Box::pin(async { Err(AppError::GatewayError("not scripted".to_string())) })
    }

    fn stk_query<'a>(
        &'a self,
        _checkout_request_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StkQueryOutcome, AppError>> + Send + 'a>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(StkQueryOutcome::StillProcessing));
        Box::pin(async move { next })
    }
}

const INTERVAL: Duration = Duration::from_secs(5);

#[tokio::test(start_paused = true)]
async fn success_on_first_attempt_stops_polling() {
    let gateway = ScriptedGateway::new(vec![Ok(StkQueryOutcome::Paid {
        result_desc: "The service request is processed successfully.".to_string(),
    })]);

    let outcome = poll_stk_status(&gateway, "ws_CO_1", 10, INTERVAL).await;

    assert_eq!(
        outcome,
        PollOutcome::Completed {
            result_desc: "The service request is processed successfully.".to_string()
        }
    );
    assert_eq!(gateway.query_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn still_processing_retries_until_terminal_answer() {
    let gateway = ScriptedGateway::new(vec![
        Ok(StkQueryOutcome::StillProcessing),
        Ok(StkQueryOutcome::StillProcessing),
        Ok(StkQueryOutcome::Failed {
            result_code: "1032".to_string(),
            result_desc: "Request cancelled by user".to_string(),
        }),
    ]);

    let outcome = poll_stk_status(&gateway, "ws_CO_2", 10, INTERVAL).await;

    assert_eq!(
        outcome,
        PollOutcome::Failed {
            result_code: "1032".to_string(),
            result_desc: "Request cancelled by user".to_string()
        }
    );
    assert_eq!(gateway.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_gateway_errors_consume_attempts_without_failing() {
    let gateway = ScriptedGateway::new(vec![
        Err(AppError::GatewayError("connection reset".to_string())),
        Err(AppError::GatewayError("connection reset".to_string())),
        Ok(StkQueryOutcome::Paid {
            result_desc: "ok".to_string(),
        }),
    ]);

    let outcome = poll_stk_status(&gateway, "ws_CO_3", 10, INTERVAL).await;

    assert!(matches!(outcome, PollOutcome::Completed { .. }));
    assert_eq!(gateway.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_time_out_instead_of_failing() {
    // Script is empty: every query answers "still processing".
    let gateway = ScriptedGateway::new(vec![]);

    let outcome = poll_stk_status(&gateway, "ws_CO_4", 10, INTERVAL).await;

    assert_eq!(outcome, PollOutcome::TimedOut);
    assert_eq!(gateway.query_count(), 10);
}
