//! Delivers rendered messages to chat backends.
//!
//! Every backend goes through the same retry driver, [`Deliverer`]. What
//! differs per backend is captured by the small [`Backend`] strategy: how the
//! rendered text splits into envelopes, how the destination URL is prepared
//! for each attempt, and where the business error code lives in a response.
pub mod deliverer;
pub mod dingding;
pub mod feishu;
pub mod signing;
pub mod weixin;

use crate::config::ProviderConfig;
use crate::core::{DeliveryOutcome, ProviderKind};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use deliverer::{backoff_delay, Deliverer};
pub use dingding::Dingding;
pub use feishu::Feishu;
pub use weixin::Weixin;

#[derive(Error, Debug)]
pub enum NotifyError {
    /// The rendered template is not a valid envelope for the backend.
    #[error("rendered message is not a valid {provider} envelope: {reason}")]
    InvalidEnvelope {
        provider: ProviderKind,
        reason: String,
    },
}

/// Backend-specific pieces of the delivery algorithm.
pub trait Backend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Splits rendered template output into independently deliverable envelopes.
    fn envelopes(&self, rendered: &str) -> Result<Vec<Value>, NotifyError>;

    /// Destination URL for one attempt. Called again before every attempt.
    fn prepare_url(&self, config: &ProviderConfig) -> String {
        config.webhook_url.clone()
    }

    /// Whether a 200 response body reports zero business errors.
    fn is_success(&self, response: &Value) -> bool;

    /// When true, a failed envelope does not fail the overall delivery.
    fn fan_out(&self) -> bool {
        false
    }
}

/// Sends rendered template output to a backend.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        config: &ProviderConfig,
        rendered: &str,
    ) -> Result<DeliveryOutcome, NotifyError>;
}

/// Builds the notifier for `kind` on top of a shared HTTP client.
pub fn notifier_for(
    kind: ProviderKind,
    client: reqwest::Client,
    backoff_unit: Duration,
) -> Arc<dyn Notifier> {
    match kind {
        ProviderKind::Feishu => Arc::new(Deliverer::new(Feishu, client, backoff_unit)),
        ProviderKind::Dingding => Arc::new(Deliverer::new(Dingding, client, backoff_unit)),
        ProviderKind::Weixin => Arc::new(Deliverer::new(Weixin, client, backoff_unit)),
    }
}

/// Parses rendered output that must be exactly one JSON object.
pub(crate) fn single_object(kind: ProviderKind, rendered: &str) -> Result<Vec<Value>, NotifyError> {
    match serde_json::from_str::<Value>(rendered) {
        Ok(value @ Value::Object(_)) => Ok(vec![value]),
        Ok(other) => Err(NotifyError::InvalidEnvelope {
            provider: kind,
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(NotifyError::InvalidEnvelope {
            provider: kind,
            reason: e.to_string(),
        }),
    }
}

/// True when `response[field]` is the number zero.
pub(crate) fn zero_code(response: &Value, field: &str) -> bool {
    response.get(field).and_then(Value::as_f64) == Some(0.0)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
