//! Feishu (飞书) custom bot.
//!
//! A template may render either one card or a JSON array of cards. Each card
//! is posted separately and retried on its own; a card that exhausts its
//! retries is logged and the remaining cards are still sent.

use super::{json_kind, Backend, NotifyError};
use crate::core::ProviderKind;
use serde_json::Value;

/// Fan-out backend; success is `code == 0`.
pub struct Feishu;

impl Backend for Feishu {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Feishu
    }

    fn envelopes(&self, rendered: &str) -> Result<Vec<Value>, NotifyError> {
        let parsed: Value =
            serde_json::from_str(rendered).map_err(|e| NotifyError::InvalidEnvelope {
                provider: self.kind(),
                reason: e.to_string(),
            })?;

        let cards = match parsed {
            Value::Array(cards) => cards,
            card @ Value::Object(_) => vec![card],
            other => {
                return Err(NotifyError::InvalidEnvelope {
                    provider: self.kind(),
                    reason: format!("expected a card or an array of cards, got {}", json_kind(&other)),
                })
            }
        };

        if let Some(position) = cards.iter().position(|card| !card.is_object()) {
            return Err(NotifyError::InvalidEnvelope {
                provider: self.kind(),
                reason: format!("card {} is not a JSON object", position + 1),
            });
        }
        Ok(cards)
    }

    fn is_success(&self, response: &Value) -> bool {
        super::zero_code(response, "code")
    }

    fn fan_out(&self) -> bool {
        true
    }
}
