//! Core domain types for AlertRelay
//!
//! This module defines the inbound alert payload as sent by Alertmanager,
//! the set of supported notification backends, and the terminal result of a
//! delivery.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The state of a single alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

/// A single alert inside an Alertmanager webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Alertmanager sends `0001-01-01T00:00:00Z` for "unset"; that maps to `None`.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// The body of an Alertmanager webhook notification.
///
/// Every field is optional; a body without `alerts` is an empty batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default, rename = "externalURL")]
    pub external_url: Option<String>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

impl AlertPayload {
    /// Returns the payload-level status, falling back to the first alert's
    /// status, or an empty string when neither is available.
    pub fn overall_status(&self) -> String {
        match self.status.as_deref() {
            Some(status) if !status.is_empty() => status.to_string(),
            _ => self
                .alerts
                .first()
                .map(|alert| alert.status.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|ts| ts.year() > 1))
}

/// The notification backends an alert can be relayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Feishu,
    Dingding,
    Weixin,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Feishu,
        ProviderKind::Dingding,
        ProviderKind::Weixin,
    ];

    /// The route segment, health key and log label for this backend.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Feishu => "feishu",
            ProviderKind::Dingding => "dingding",
            ProviderKind::Weixin => "weixin",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The terminal result of delivering a rendered message to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed { reason: String, attempts_made: u32 },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}
