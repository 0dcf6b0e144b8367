//! Dingding (钉钉) custom robot.

use super::{signing, single_object, zero_code, Backend, NotifyError};
use crate::config::ProviderConfig;
use crate::core::ProviderKind;
use chrono::Utc;
use serde_json::Value;

/// One message per delivery; success is `errcode == 0`.
///
/// With a secret configured, every attempt is signed with its own
/// millisecond timestamp.
pub struct Dingding;

impl Backend for Dingding {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Dingding
    }

    fn envelopes(&self, rendered: &str) -> Result<Vec<Value>, NotifyError> {
        single_object(self.kind(), rendered)
    }

    fn prepare_url(&self, config: &ProviderConfig) -> String {
        match config.signing_secret() {
            Some(secret) => {
                signing::signed_url(&config.webhook_url, secret, Utc::now().timestamp_millis())
            }
            None => config.webhook_url.clone(),
        }
    }

    fn is_success(&self, response: &Value) -> bool {
        zero_code(response, "errcode")
    }
}
