//! M-Pesa Daraja STK push integration.

pub mod client;
pub mod poll;
pub mod types;

pub use client::{MpesaClient, StkGateway};
pub use poll::{poll_stk_status, PollOutcome, DEFAULT_POLL_ATTEMPTS, POLL_INTERVAL};
pub use types::{MpesaCallbackBody, StkCallback, StkPushResponse, StkQueryOutcome};
