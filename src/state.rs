use std::sync::Arc;

use sqlx::PgPool;

use crate::mpesa::StkGateway;
use crate::services::payments::{PgSettlementStore, SettlementStore};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub gateway: Arc<dyn StkGateway>,
    pub settlement: Arc<dyn SettlementStore>,
    pub ticket_secret: Arc<String>,
}

impl AppState {
    pub fn new(pool: PgPool, gateway: Arc<dyn StkGateway>, ticket_secret: String) -> Self {
        let ticket_secret = Arc::new(ticket_secret);
        let settlement = Arc::new(PgSettlementStore::new(pool.clone(), ticket_secret.clone()));
        Self {
            pool,
            gateway,
            settlement,
            ticket_secret,
        }
    }
}
