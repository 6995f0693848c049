//! Ticket and payment lifecycle engine: inventory reservation, M-Pesa STK
//! push settlement, credential issuance, and door check-in.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod models;
pub mod mpesa;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
