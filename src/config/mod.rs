use std::env;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

/// M-Pesa Daraja gateway settings.
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Shared secret mixed into ticket QR integrity tags.
    pub ticket_secret: String,
    pub mpesa: MpesaConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            ticket_secret: require("TICKET_SECRET")?,
            mpesa: MpesaConfig {
                base_url: env::var("MPESA_BASE_URL")
                    .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
                consumer_key: require("MPESA_CONSUMER_KEY")?,
                consumer_secret: require("MPESA_CONSUMER_SECRET")?,
                shortcode: require("MPESA_SHORTCODE")?,
                passkey: require("MPESA_PASSKEY")?,
                callback_url: require("MPESA_CALLBACK_URL")?,
            },
        })
    }
}

fn require(name: &str) -> Result<String, String> {
    env::var(name).map_err(|_| format!("{name} must be set"))
}
