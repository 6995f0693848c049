use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::AppError;

/// Daraja treats `errorCode 500.001.1001` on a status query as "the push is
/// still on the customer's handset", not a failure.
pub const STILL_PROCESSING_CODE: &str = "500.001.1001";

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub call_back_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

/// Outcome of one status query against the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StkQueryOutcome {
    Paid {
        result_desc: String,
    },
    /// Customer has not yet confirmed or cancelled on the handset.
    StillProcessing,
    Failed {
        result_code: String,
        result_desc: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct OauthTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpesaCallbackBody {
    #[serde(rename = "Body")]
    pub body: CallbackEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub item: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<Value>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }

    /// Metadata items arrive as a name/value list; values are numbers or
    /// strings depending on the field.
    pub fn metadata_value(&self, name: &str) -> Option<String> {
        let items = &self.callback_metadata.as_ref()?.item;
        let value = items.iter().find(|i| i.name == name)?.value.as_ref()?;
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value("MpesaReceiptNumber")
    }

    pub fn transaction_date(&self) -> Option<String> {
        self.metadata_value("TransactionDate")
    }
}

/// `YYYYMMDDHHmmss`, as the gateway expects.
pub fn stk_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// `base64(ShortCode + Passkey + Timestamp)`.
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

/// Normalizes a Kenyan MSISDN into the `2547XXXXXXXX` form the gateway
/// requires. Accepts `07...`, `01...`, `+254...`, `254...` and bare `7...`.
pub fn normalize_phone(input: &str) -> Result<String, AppError> {
    let digits: String = input
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    let normalized = if let Some(rest) = digits.strip_prefix("254") {
        format!("254{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else if digits.starts_with('7') || digits.starts_with('1') {
        format!("254{digits}")
    } else {
        return Err(AppError::ValidationError(format!(
            "Unrecognized phone number format: {input}"
        )));
    };

    if normalized.len() != 12 {
        return Err(AppError::ValidationError(format!(
            "Phone number must have 9 digits after the country code: {input}"
        )));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn phone_normalization_accepts_common_forms() {
        for input in [
            "0712345678",
            "+254712345678",
            "254712345678",
            "712345678",
            " 0712 345 678 ",
        ] {
            assert_eq!(normalize_phone(input).unwrap(), "254712345678", "{input}");
        }
    }

    #[test]
    fn phone_normalization_rejects_garbage() {
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("44712345678").is_err());
        assert!(normalize_phone("07123456789012").is_err());
    }

    #[test]
    fn timestamp_has_gateway_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 9, 7, 2).unwrap();
        assert_eq!(stk_timestamp(ts), "20240305090702");
    }

    #[test]
    fn password_is_base64_of_concatenation() {
        let password = stk_password("174379", "passkey", "20240305090702");
        let decoded = STANDARD.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240305090702");
    }

    #[test]
    fn callback_metadata_extraction_by_name() {
        let body: MpesaCallbackBody = serde_json::from_value(serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 500.0 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "TransactionDate", "Value": 20191219102115_u64 },
                            { "Name": "PhoneNumber", "Value": 254708374149_u64 }
                        ]
                    }
                }
            }
        }))
        .unwrap();

        let cb = body.body.stk_callback;
        assert!(cb.is_success());
        assert_eq!(cb.receipt_number().unwrap(), "NLJ7RT61SV");
        assert_eq!(cb.transaction_date().unwrap(), "20191219102115");
        assert_eq!(cb.metadata_value("PhoneNumber").unwrap(), "254708374149");
        assert_eq!(cb.metadata_value("NoSuchItem"), None);
    }

    #[test]
    fn failure_callback_has_no_metadata() {
        let body: MpesaCallbackBody = serde_json::from_value(serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }))
        .unwrap();

        let cb = body.body.stk_callback;
        assert!(!cb.is_success());
        assert_eq!(cb.receipt_number(), None);
    }
}
