//! JSON-over-HTTP submission venue.
//!
//! POSTs one JSON body per submission:
//! `{timeframe, epoch_index, direction, amount, request_id}`.
//! The venue answers `{"accepted": bool, "reason": string?}`.
//! Auth: optional `Authorization: Bearer {key}` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::SubmissionGateway;
use crate::types::{AttemptOutcome, Direction, EpochId, Timeframe};

#[derive(Debug, Serialize)]
struct SubmitRequest {
    timeframe: Timeframe,
    epoch_index: i64,
    direction: Direction,
    amount: Decimal,
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    accepted: bool,
    #[serde(default)]
    reason: Option<String>,
}

pub struct HttpGateway {
    http: Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpGateway {
    /// `timeout` bounds each request; the scheduler applies its own bound too.
    pub fn new(url: &str, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("PREDICTOOR/0.1.0")
            .build()
            .context("Failed to build HTTP client for submission gateway")?;

        Ok(Self {
            http,
            url: url.to_string(),
            api_key,
        })
    }

    fn request_body(epoch_id: EpochId, direction: Direction, amount: Decimal) -> SubmitRequest {
        SubmitRequest {
            timeframe: epoch_id.timeframe,
            epoch_index: epoch_id.index,
            direction,
            amount,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl SubmissionGateway for HttpGateway {
    async fn submit(
        &self,
        epoch_id: EpochId,
        direction: Direction,
        amount: Decimal,
    ) -> AttemptOutcome {
        let body = Self::request_body(epoch_id, direction, amount);
        let mut req = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                warn!(epoch = %epoch_id, %direction, "Submission timed out");
                return AttemptOutcome::TimedOut;
            }
            Err(e) => {
                warn!(epoch = %epoch_id, %direction, error = %e, "Submission request failed");
                return AttemptOutcome::Rejected {
                    reason: format!("transport: {e}"),
                };
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return AttemptOutcome::Rejected {
                reason: format!("HTTP {status}: {}", text.trim()),
            };
        }

        match resp.json::<SubmitResponse>().await {
            Ok(SubmitResponse { accepted: true, .. }) => {
                debug!(epoch = %epoch_id, %direction, request_id = %body.request_id, "Submission accepted");
                AttemptOutcome::Accepted
            }
            Ok(SubmitResponse { reason, .. }) => AttemptOutcome::Rejected {
                reason: reason.unwrap_or_else(|| "rejected by venue".to_string()),
            },
            Err(e) if e.is_timeout() => AttemptOutcome::TimedOut,
            Err(e) => AttemptOutcome::Rejected {
                reason: format!("malformed response: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_body_shape() {
        let id = EpochId { timeframe: Timeframe::H1, index: 472_222 };
        let body = HttpGateway::request_body(id, Direction::Down, dec!(12.5));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["timeframe"], "1h");
        assert_eq!(json["epoch_index"], 472_222);
        assert_eq!(json["direction"], "down");
        assert_eq!(json["amount"], 12.5);
        assert_eq!(json["request_id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_response_reason_optional() {
        let r: SubmitResponse = serde_json::from_str(r#"{"accepted": false}"#).unwrap();
        assert!(!r.accepted);
        assert!(r.reason.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_venue_is_not_accepted() {
        let gw = HttpGateway::new(
            "http://127.0.0.1:9/submit",
            Some(SecretString::new("k".to_string())),
            Duration::from_millis(500),
        )
        .unwrap();
        let id = EpochId { timeframe: Timeframe::M5, index: 1 };
        let outcome = gw.submit(id, Direction::Up, dec!(1)).await;
        assert!(!outcome.is_accepted());
    }
}
