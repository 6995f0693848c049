use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use serde_json::Value;

use crate::config::MpesaConfig;
use crate::mpesa::types::{
    normalize_phone, stk_password, stk_timestamp, OauthTokenResponse, StkPushRequest,
    StkPushResponse, StkQueryOutcome, StkQueryRequest, STILL_PROCESSING_CODE,
};
use crate::utils::error::AppError;

/// Gateway abstraction so the payment flow can be exercised against a
/// scripted double in tests.
pub trait StkGateway: Send + Sync {
    /// Prompts the customer's handset for payment of `amount` whole shillings.
    fn stk_push<'a>(
        &'a self,
        phone: &'a str,
        amount: u64,
        account_reference: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StkPushResponse, AppError>> + Send + 'a>>;

    /// Queries the outcome of a previously submitted push.
    fn stk_query<'a>(
        &'a self,
        checkout_request_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StkQueryOutcome, AppError>> + Send + 'a>>;
}

/// HTTP client for the Daraja STK push API.
pub struct MpesaClient {
    http: reqwest::Client,
    config: MpesaConfig,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Short-lived bearer token via client-credentials grant.
    async fn access_token(&self) -> Result<String, AppError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| AppError::GatewayError(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::GatewayError(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: OauthTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::GatewayError(format!("malformed token response: {e}")))?;

        Ok(token.access_token)
    }

    fn credentials(&self) -> (String, String) {
        let timestamp = stk_timestamp(Utc::now());
        let password = stk_password(&self.config.shortcode, &self.config.passkey, &timestamp);
        (password, timestamp)
    }

    async fn do_stk_push(
        &self,
        phone: &str,
        amount: u64,
        account_reference: &str,
        description: &str,
    ) -> Result<StkPushResponse, AppError> {
        let phone = normalize_phone(phone)?;
        let token = self.access_token().await?;
        let (password, timestamp) = self.credentials();

        let request = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount,
            party_a: phone.clone(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone,
            call_back_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: description.to_string(),
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GatewayError(format!("stk push request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GatewayError(format!(
                "stk push returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GatewayError(format!("malformed stk push response: {e}")))
    }

    async fn do_stk_query(&self, checkout_request_id: &str) -> Result<StkQueryOutcome, AppError> {
        let token = self.access_token().await?;
        let (password, timestamp) = self.credentials();

        let request = StkQueryRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let url = format!("{}/mpesa/stkpushquery/v1/query", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GatewayError(format!("stk query request failed: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::GatewayError(format!("malformed stk query response: {e}")))?;

        // While the push is pending the query endpoint answers with an error
        // envelope rather than a result code.
        if let Some(error_code) = body.get("errorCode").and_then(Value::as_str) {
            if error_code == STILL_PROCESSING_CODE {
                return Ok(StkQueryOutcome::StillProcessing);
            }
            let message = body
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown gateway error");
            return Err(AppError::GatewayError(format!("{error_code}: {message}")));
        }

        if !status.is_success() {
            return Err(AppError::GatewayError(format!(
                "stk query returned {status}"
            )));
        }

        // ResultCode is documented as a string but shows up numeric on some
        // sandbox responses.
        let result_code = match body.get("ResultCode") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(AppError::GatewayError(
                    "stk query response missing ResultCode".to_string(),
                ))
            }
        };
        let result_desc = body
            .get("ResultDesc")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        if result_code == "0" {
            Ok(StkQueryOutcome::Paid { result_desc })
        } else {
            Ok(StkQueryOutcome::Failed {
                result_code,
                result_desc,
            })
        }
    }
}

impl StkGateway for MpesaClient {
    fn stk_push<'a>(
        &'a self,
        phone: &'a str,
        amount: u64,
        account_reference: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StkPushResponse, AppError>> + Send + 'a>> {
        Box::pin(self.do_stk_push(phone, amount, account_reference, description))
    }

    fn stk_query<'a>(
        &'a self,
        checkout_request_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StkQueryOutcome, AppError>> + Send + 'a>> {
        Box::pin(self.do_stk_query(checkout_request_id))
    }
}
