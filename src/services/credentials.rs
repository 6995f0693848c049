//! Ticket credential issuance and verification.
//!
//! A credential is the base64url-encoded JSON payload of the ticket's
//! identifying fields plus a truncated SHA-256 integrity tag computed over
//! the payload JSON concatenated with a shared secret. Verification must
//! reproduce the exact same canonicalization, so both directions go through
//! the same serde structs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Order, OrderStatus, Ticket, TicketStatus};
use crate::utils::error::AppError;
use crate::utils::{random_suffix, to_base36};

/// Truncated tag length in hex characters (32 bits). Deliberately short to
/// keep QR payloads small; revisit if credential forgery becomes a concern.
const TAG_HEX_LEN: usize = 8;

const BARCODE_SUFFIX_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQrPayload {
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub ticket_category_id: Option<Uuid>,
    pub seat_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
}

/// Wire form of the credential: the payload fields with the tag appended.
/// Field order matters, it is the canonical serialization both sides hash.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TicketQrCredential {
    ticket_id: Uuid,
    event_id: Uuid,
    order_id: Uuid,
    ticket_category_id: Option<Uuid>,
    seat_id: Option<Uuid>,
    issued_at: DateTime<Utc>,
    hash: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_data: Option<TicketQrPayload>,
}

fn integrity_tag(payload_json: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload_json.as_bytes());
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..TAG_HEX_LEN].to_string()
}

pub fn generate_ticket_qr(payload: &TicketQrPayload, secret: &str) -> Result<String, AppError> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|e| AppError::InternalServerError(format!("payload serialization: {e}")))?;
    let hash = integrity_tag(&payload_json, secret);

    let credential = TicketQrCredential {
        ticket_id: payload.ticket_id,
        event_id: payload.event_id,
        order_id: payload.order_id,
        ticket_category_id: payload.ticket_category_id,
        seat_id: payload.seat_id,
        issued_at: payload.issued_at,
        hash,
    };
    let credential_json = serde_json::to_string(&credential)
        .map_err(|e| AppError::InternalServerError(format!("credential serialization: {e}")))?;

    Ok(URL_SAFE_NO_PAD.encode(credential_json))
}

/// Decodes and verifies a scanned credential. Fails closed: any decode,
/// parse, or tag mismatch yields `is_valid: false` with no payload exposed.
pub fn verify_ticket_qr(credential: &str, secret: &str) -> VerifyResult {
    let invalid = VerifyResult {
        is_valid: false,
        ticket_data: None,
    };

    let Ok(decoded) = URL_SAFE_NO_PAD.decode(credential.trim()) else {
        return invalid;
    };
    let Ok(parsed) = serde_json::from_slice::<TicketQrCredential>(&decoded) else {
        return invalid;
    };

    let payload = TicketQrPayload {
        ticket_id: parsed.ticket_id,
        event_id: parsed.event_id,
        order_id: parsed.order_id,
        ticket_category_id: parsed.ticket_category_id,
        seat_id: parsed.seat_id,
        issued_at: parsed.issued_at,
    };
    let Ok(payload_json) = serde_json::to_string(&payload) else {
        return invalid;
    };

    if integrity_tag(&payload_json, secret) != parsed.hash {
        return invalid;
    }

    VerifyResult {
        is_valid: true,
        ticket_data: Some(payload),
    }
}

/// `TIX-<base36 timestamp>-<random alphanumeric>`, uppercased, globally
/// unique (the random suffix plus a unique index on the column).
pub fn generate_barcode(now: DateTime<Utc>) -> String {
    format!(
        "TIX-{}-{}",
        to_base36(now.timestamp_millis().max(0) as u64).to_uppercase(),
        random_suffix(BARCODE_SUFFIX_LEN)
    )
}

/// Converts every reserved ticket of a paid order into a sold credential and
/// completes the order. Runs inside the payment-settlement transaction, so
/// it executes at most once per order; the unique indexes on `qr_code` and
/// `barcode` reject any duplicate issuance that slips past the guard.
pub async fn finalize_tickets_after_payment(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    secret: &str,
) -> Result<Vec<Ticket>, AppError> {
    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE order_id = $1 FOR UPDATE",
    )
    .bind(order_id)
    .fetch_all(&mut **tx)
    .await?;

    if tickets.is_empty() {
        return Err(AppError::NotFound(format!(
            "No tickets found for order {order_id}"
        )));
    }

    let issued_at = Utc::now();
    let mut issued = Vec::with_capacity(tickets.len());

    for ticket in &tickets {
        if TicketStatus::parse(&ticket.status) != Some(TicketStatus::Reserved) {
            tracing::warn!(
                ticket_id = %ticket.id,
                status = %ticket.status,
                "Skipping finalization of non-reserved ticket"
            );
            continue;
        }

        let payload = TicketQrPayload {
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            order_id,
            ticket_category_id: ticket.ticket_category_id,
            seat_id: ticket.seat_id,
            issued_at,
        };
        let qr_code = generate_ticket_qr(&payload, secret)?;
        let barcode = generate_barcode(issued_at);

        let updated = sqlx::query_as::<_, Ticket>(
            "UPDATE tickets
             SET qr_code = $2, barcode = $3, status = $4, updated_at = now()
             WHERE id = $1 AND status = $5
             RETURNING *",
        )
        .bind(ticket.id)
        .bind(&qr_code)
        .bind(&barcode)
        .bind(TicketStatus::Sold.as_str())
        .bind(TicketStatus::Reserved.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(t) = updated {
            // Move the category's committed units from reserved to sold.
            if let Some(category_id) = t.ticket_category_id {
                sqlx::query(
                    "UPDATE ticket_categories
                     SET reserved = reserved - 1, sold = sold + 1, updated_at = now()
                     WHERE id = $1",
                )
                .bind(category_id)
                .execute(&mut **tx)
                .await?;
            }
            issued.push(t);
        }
    }

    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders
         SET status = $2, updated_at = now()
         WHERE id = $1 AND status = ANY($3)
         RETURNING *",
    )
    .bind(order_id)
    .bind(OrderStatus::Completed.as_str())
    .bind(OrderStatus::transition_sources(OrderStatus::Completed))
    .fetch_optional(&mut **tx)
    .await?;

    if order.is_none() {
        tracing::warn!(%order_id, "Order was already terminal during ticket finalization");
    }

    tracing::info!(%order_id, count = issued.len(), "Issued ticket credentials");
    Ok(issued)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn sample_payload() -> TicketQrPayload {
        TicketQrPayload {
            ticket_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            ticket_category_id: Some(Uuid::new_v4()),
            seat_id: None,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn qr_round_trip_preserves_payload() {
        let payload = sample_payload();
        let credential = generate_ticket_qr(&payload, SECRET).unwrap();
        let result = verify_ticket_qr(&credential, SECRET);
        assert!(result.is_valid);
        assert_eq!(result.ticket_data.unwrap(), payload);
    }

    #[test]
    fn single_byte_mutation_invalidates_credential() {
        let credential = generate_ticket_qr(&sample_payload(), SECRET).unwrap();
        let mut bytes = credential.into_bytes();
        // Flip one character somewhere in the middle of the encoding.
        let i = bytes.len() / 2;
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        let result = verify_ticket_qr(&tampered, SECRET);
        assert!(!result.is_valid);
        assert!(result.ticket_data.is_none());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let credential = generate_ticket_qr(&sample_payload(), SECRET).unwrap();
        assert!(!verify_ticket_qr(&credential, "other-secret").is_valid);
    }

    #[test]
    fn garbage_input_fails_closed() {
        for input in ["", "not base64url!!", "aGVsbG8", "eyJmb28iOiJiYXIifQ"] {
            let result = verify_ticket_qr(input, SECRET);
            assert!(!result.is_valid);
            assert!(result.ticket_data.is_none());
        }
    }

    #[test]
    fn tag_is_a_short_hex_prefix() {
        let tag = integrity_tag("{\"a\":1}", SECRET);
        assert_eq!(tag.len(), TAG_HEX_LEN);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn barcode_has_expected_shape() {
        let barcode = generate_barcode(Utc::now());
        let parts: Vec<&str> = barcode.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TIX");
        assert!(!parts[1].is_empty());
        assert_eq!(parts[2].len(), BARCODE_SUFFIX_LEN);
        assert!(barcode
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-'));
    }
}
