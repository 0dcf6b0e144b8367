//! WeChat Work (企业微信) group robot.

use super::{single_object, zero_code, Backend, NotifyError};
use crate::core::ProviderKind;
use serde_json::Value;

/// One message per delivery; success is `errcode == 0`.
pub struct Weixin;

impl Backend for Weixin {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Weixin
    }

    fn envelopes(&self, rendered: &str) -> Result<Vec<Value>, NotifyError> {
        single_object(self.kind(), rendered)
    }

    fn is_success(&self, response: &Value) -> bool {
        zero_code(response, "errcode")
    }
}
