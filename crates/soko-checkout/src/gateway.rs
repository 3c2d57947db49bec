//! # Mobile-Money Gateway
//!
//! The push-payment rail: ask the gateway to prompt the customer's phone,
//! then ask it how that prompt went.
//!
//! ## HTTP Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST {base}/v1/push-payments                                          │
//! │       {"phone","amount","reference","till"}                            │
//! │       200 → {"request_id"}          non-2xx → {"message"}              │
//! │                                                                         │
//! │  GET  {base}/v1/push-payments/{request_id}?expected_amount=N           │
//! │       200 → {"status": pending|success|cancelled|failed,               │
//! │              "settled_amount"?, "receipt_ref"?, "message"?}            │
//! │                                                                         │
//! │  Authorization: Bearer {api_key}   (when configured)                   │
//! │  Amounts on the wire are whole currency units.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use soko_core::{GatewayStatus, Money};

use crate::config::GatewaySettings;
use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// Gateway Trait
// =============================================================================

/// An accepted push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub request_id: String,
}

/// The external mobile-money service.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Sends a payment prompt to `phone` for `amount` (whole units).
    async fn initiate(&self, phone: &str, amount: Money, reference: &str)
        -> GatewayResult<PushRequest>;

    /// Reports the state of a push request.
    async fn query_status(
        &self,
        request_id: &str,
        expected_amount: Money,
    ) -> GatewayResult<GatewayStatus>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct InitiateBody<'a> {
    phone: &'a str,
    amount: i64,
    reference: &'a str,
    till: &'a str,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    settled_amount: Option<serde_json::Number>,
    #[serde(default)]
    receipt_ref: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Whole units on the wire; fractional values are accepted and rounded to
/// the nearest cent.
fn money_from_wire(value: &serde_json::Number) -> Option<Money> {
    if let Some(units) = value.as_i64() {
        return Some(Money::from_major(units));
    }
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .map(|v| Money::from_cents((v * 100.0).round() as i64))
}

fn parse_status(body: StatusResponse) -> GatewayResult<GatewayStatus> {
    match body.status.to_lowercase().as_str() {
        "pending" => Ok(GatewayStatus::Pending),
        "success" => Ok(GatewayStatus::Success {
            settled_amount: body.settled_amount.as_ref().and_then(money_from_wire),
            receipt_ref: body.receipt_ref,
        }),
        "cancelled" => Ok(GatewayStatus::Cancelled {
            message: body.message,
        }),
        "failed" => Ok(GatewayStatus::Failed {
            message: body
                .message
                .unwrap_or_else(|| "Payment failed".to_string()),
        }),
        other => Err(GatewayError::InvalidResponse(format!(
            "unknown payment status '{}'",
            other
        ))),
    }
}

// =============================================================================
// HTTP Gateway
// =============================================================================

/// `MobileMoneyGateway` over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpMobileMoneyGateway {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    till_id: String,
}

impl HttpMobileMoneyGateway {
    /// Builds a client from the `[gateway]` settings.
    pub fn new(settings: &GatewaySettings, till_id: impl Into<String>) -> GatewayResult<Self> {
        let base = settings
            .base_url
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidConfig("gateway.base_url is not set".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(HttpMobileMoneyGateway {
            client,
            base_url: Url::parse(base)?,
            api_key: settings.api_key.clone(),
            till_id: till_id.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidConfig(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

        warn!(status = status.as_u16(), message = %message, "Gateway returned an error");
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MobileMoneyGateway for HttpMobileMoneyGateway {
    async fn initiate(
        &self,
        phone: &str,
        amount: Money,
        reference: &str,
    ) -> GatewayResult<PushRequest> {
        let url = self.endpoint(&["v1", "push-payments"])?;
        let body = InitiateBody {
            phone,
            amount: amount.ceil_to_major().major(),
            reference,
            till: &self.till_id,
        };

        debug!(reference = %reference, amount = body.amount, "Sending push payment request");

        let response = self
            .authorize(self.client.post(url).json(&body))
            .send()
            .await?;
        let accepted: InitiateResponse = Self::check(response).await?.json().await?;

        Ok(PushRequest {
            request_id: accepted.request_id,
        })
    }

    async fn query_status(
        &self,
        request_id: &str,
        expected_amount: Money,
    ) -> GatewayResult<GatewayStatus> {
        let mut url = self.endpoint(&["v1", "push-payments", request_id])?;
        url.query_pairs_mut().append_pair(
            "expected_amount",
            &expected_amount.ceil_to_major().major().to_string(),
        );

        let response = self.authorize(self.client.get(url)).send().await?;
        let body: StatusResponse = Self::check(response).await?.json().await?;

        parse_status(body)
    }
}
