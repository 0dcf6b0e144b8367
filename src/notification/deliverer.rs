//! The retry driver shared by all backends.

use super::{Backend, Notifier, NotifyError};
use crate::config::ProviderConfig;
use crate::core::DeliveryOutcome;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Reason reported once every attempt for an envelope has failed.
pub const RETRIES_EXHAUSTED: &str = "retries exhausted";

/// Delay inserted after failed attempt number `attempt` (1-based).
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit * attempt
}

/// Why a single attempt was classified as failed.
#[derive(Error, Debug)]
enum AttemptError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("response body is not JSON: {0}")]
    Body(#[from] serde_json::Error),

    #[error("backend reported an error: {0}")]
    Rejected(Value),
}

/// Delivers envelopes for one backend with bounded retries and linear backoff.
pub struct Deliverer<B> {
    backend: B,
    client: reqwest::Client,
    backoff_unit: Duration,
}

impl<B: Backend> Deliverer<B> {
    /// Creates a new `Deliverer`.
    ///
    /// `backoff_unit` is the sleep after the first failed attempt; the n-th
    /// failure waits `n * backoff_unit`.
    pub fn new(backend: B, client: reqwest::Client, backoff_unit: Duration) -> Self {
        Self {
            backend,
            client,
            backoff_unit,
        }
    }

    async fn deliver_envelope(
        &self,
        config: &ProviderConfig,
        envelope: &Value,
        index: usize,
        total: usize,
    ) -> DeliveryOutcome {
        let provider = self.backend.kind().name();
        let attempts = config.retry_count.max(1);

        for attempt in 1..=attempts {
            metrics::counter!("webhook_delivery_attempts_total", "provider" => provider)
                .increment(1);
            let url = self.backend.prepare_url(config);

            match self.attempt(&url, envelope, config.timeout).await {
                Ok(()) => {
                    info!(
                        provider,
                        envelope = index + 1,
                        total,
                        attempt,
                        destination = destination(&url),
                        "Message delivered"
                    );
                    return DeliveryOutcome::Delivered;
                }
                Err(e) => {
                    warn!(
                        provider,
                        envelope = index + 1,
                        total,
                        attempt,
                        attempts,
                        destination = destination(&url),
                        error = %e,
                        "Delivery attempt failed"
                    );
                }
            }

            if attempt < attempts {
                let delay = backoff_delay(attempt, self.backoff_unit);
                debug!(delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                sleep(delay).await;
            }
        }

        error!(
            provider,
            envelope = index + 1,
            total,
            attempts,
            destination = destination(&config.webhook_url),
            "Giving up on message after exhausting retries"
        );
        DeliveryOutcome::Failed {
            reason: RETRIES_EXHAUSTED.to_string(),
            attempts_made: attempts,
        }
    }

    async fn attempt(
        &self,
        url: &str,
        envelope: &Value,
        timeout: Duration,
    ) -> Result<(), AttemptError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(AttemptError::Status { status, body });
        }

        let parsed: Value = serde_json::from_str(&body)?;
        if self.backend.is_success(&parsed) {
            Ok(())
        } else {
            Err(AttemptError::Rejected(parsed))
        }
    }
}

#[async_trait]
impl<B: Backend> Notifier for Deliverer<B> {
    #[instrument(skip_all, fields(provider = %self.backend.kind()))]
    async fn deliver(
        &self,
        config: &ProviderConfig,
        rendered: &str,
    ) -> Result<DeliveryOutcome, NotifyError> {
        let envelopes = self.backend.envelopes(rendered)?;
        let total = envelopes.len();
        let provider = self.backend.kind().name();
        if total == 0 {
            warn!("Template rendered no messages, nothing to deliver");
        }

        let mut failed = 0;
        for (index, envelope) in envelopes.iter().enumerate() {
            let outcome = self.deliver_envelope(config, envelope, index, total).await;
            if !outcome.is_delivered() {
                if !self.backend.fan_out() {
                    metrics::counter!("webhook_deliveries_total", "provider" => provider, "outcome" => "failed")
                        .increment(1);
                    return Ok(outcome);
                }
                failed += 1;
            }
        }

        if failed > 0 {
            // Fan-out batches still report success; per-card failures only show up here.
            error!(failed, total, "Some messages in the batch were not delivered");
            metrics::counter!("webhook_deliveries_total", "provider" => provider, "outcome" => "partial")
                .increment(1);
        } else {
            metrics::counter!("webhook_deliveries_total", "provider" => provider, "outcome" => "delivered")
                .increment(1);
        }
        Ok(DeliveryOutcome::Delivered)
    }
}

/// The destination without its query string, which carries tokens and signatures.
fn destination(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProviderKind;
    use crate::notification::Weixin;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UNIT: Duration = Duration::from_millis(20);

    fn config(server: &MockServer, retry_count: u32) -> ProviderConfig {
        ProviderConfig {
            enable: true,
            webhook_url: format!("{}/webhook", server.uri()),
            retry_count,
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn deliverer() -> Deliverer<Weixin> {
        Deliverer::new(Weixin, reqwest::Client::new(), UNIT)
    }

    #[test]
    fn test_backoff_is_linear() {
        let unit = Duration::from_secs(1);
        let schedule: Vec<_> = (1..3).map(|attempt| backoff_delay(attempt, unit)).collect();
        assert_eq!(schedule, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_destination_strips_query() {
        assert_eq!(
            destination("https://oapi.dingtalk.com/robot/send?access_token=secret"),
            "https://oapi.dingtalk.com/robot/send"
        );
        assert_eq!(destination("http://localhost/hook"), "http://localhost/hook");
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let server = MockServer::start().await;
        let message = json!({"msgtype": "text", "text": {"content": "hi"}});
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .and(body_json(&message))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = deliverer()
            .deliver(&config(&server, 3), &message.to_string())
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_with_backoff_until_exhausted() {
        let unit = Duration::from_millis(60);
        let server = MockServer::start().await;
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let recorder = arrivals.clone();
        Mock::given(method("POST"))
            .and(move |_: &wiremock::Request| {
                recorder.lock().unwrap().push(Instant::now());
                true
            })
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = Deliverer::new(Weixin, reqwest::Client::new(), unit)
            .deliver(&config(&server, 3), r#"{"msgtype":"text"}"#)
            .await
            .unwrap();
        let finished = Instant::now();

        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                reason: RETRIES_EXHAUSTED.to_string(),
                attempts_made: 3
            }
        );
        server.verify().await;

        // 1 unit after the first failure, 2 after the second, none after the last.
        let arrivals = arrivals.lock().unwrap();
        assert_eq!(arrivals.len(), 3);
        let first_gap = arrivals[1] - arrivals[0];
        let second_gap = arrivals[2] - arrivals[1];
        assert!(first_gap >= unit && first_gap < unit * 2, "first gap {first_gap:?}");
        assert!(second_gap >= unit * 2 && second_gap < unit * 3, "second gap {second_gap:?}");
        assert!(finished - arrivals[2] < unit, "slept after the final attempt");
    }

    #[tokio::test]
    async fn test_business_error_is_retried_like_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"errcode": 93000, "errmsg": "invalid webhook url"})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let outcome = deliverer()
            .deliver(&config(&server, 2), r#"{"msgtype":"text"}"#)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                reason: RETRIES_EXHAUSTED.to_string(),
                attempts_made: 2
            }
        );
    }

    #[tokio::test]
    async fn test_unparsable_body_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = deliverer()
            .deliver(&config(&server, 3), r#"{"msgtype":"text"}"#)
            .await
            .unwrap();
        assert!(outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errcode": 0}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let mut config = config(&server, 2);
        config.timeout = Duration::from_millis(100);
        let outcome = deliverer()
            .deliver(&config, r#"{"msgtype":"text"}"#)
            .await
            .unwrap();
        assert!(!outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = deliverer()
            .deliver(&config(&server, 3), "not json at all")
            .await;
        assert!(matches!(
            result,
            Err(NotifyError::InvalidEnvelope {
                provider: ProviderKind::Weixin,
                ..
            })
        ));
    }
}
