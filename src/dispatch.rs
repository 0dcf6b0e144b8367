//! Turns an inbound alert payload into a delivered message.
//!
//! The orchestrator resolves the provider's template, projects the alerts
//! into a display-oriented context, renders it, and hands the raw output to
//! the provider's [`Notifier`]. It knows nothing about envelope shapes.

use crate::config::ProviderConfig;
use crate::core::{Alert, AlertPayload, AlertStatus, DeliveryOutcome, ProviderKind};
use crate::notification::{Notifier, NotifyError};
use crate::templates::{TemplateCache, TemplateError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tera::Context;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

/// Label keys surfaced as display fields, in display order, with captions.
pub const FIELD_CAPTIONS: [(&str, &str); 6] = [
    ("namespace", "🏷️ **命名空间:**"),
    ("pod", "🐳 **Pod名称:**"),
    ("pod_ip", "🌐 **Pod IP:**"),
    ("node", "🖥️ **节点名称:**"),
    ("owner_kind", "🔄 **控制器类型:**"),
    ("owner_name", "🔧 **控制器名称:**"),
];

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("template load failed: {0}")]
    TemplateLoad(#[source] TemplateError),

    #[error("template render failed: {0}")]
    TemplateRender(#[source] TemplateError),

    #[error(transparent)]
    Envelope(#[from] NotifyError),
}

/// A caption/value pair shown on a card.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AlertField {
    pub key: &'static str,
    pub value: String,
}

/// Display projection of one alert, as seen by templates.
#[derive(Debug, Clone, Serialize)]
pub struct AlertView<'a> {
    pub status: AlertStatus,
    pub labels: &'a BTreeMap<String, String>,
    pub annotations: &'a BTreeMap<String, String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub generator_url: Option<&'a str>,
    pub fields: Vec<AlertField>,
}

impl<'a> From<&'a Alert> for AlertView<'a> {
    fn from(alert: &'a Alert) -> Self {
        Self {
            status: alert.status,
            labels: &alert.labels,
            annotations: &alert.annotations,
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
            generator_url: alert.generator_url.as_deref(),
            fields: alert_fields(alert),
        }
    }
}

/// Extracts the known label keys present on `alert`, in fixed order.
pub fn alert_fields(alert: &Alert) -> Vec<AlertField> {
    FIELD_CAPTIONS
        .iter()
        .filter_map(|&(label, caption)| {
            alert.labels.get(label).map(|value| AlertField {
                key: caption,
                value: value.clone(),
            })
        })
        .collect()
}

/// Builds the template context for a payload.
pub fn render_context(payload: &AlertPayload) -> Context {
    let alerts: Vec<AlertView<'_>> = payload.alerts.iter().map(AlertView::from).collect();

    let mut context = Context::new();
    context.insert("alerts", &alerts);
    context.insert("status", &payload.overall_status());
    context.insert("receiver", &payload.receiver);
    context.insert("group_labels", &payload.group_labels);
    context.insert("common_labels", &payload.common_labels);
    context.insert("common_annotations", &payload.common_annotations);
    context.insert("external_url", &payload.external_url);
    context
}

/// A configured backend: its settings and the notifier that delivers to it.
#[derive(Clone)]
pub struct Channel {
    pub kind: ProviderKind,
    pub config: ProviderConfig,
    pub notifier: Arc<dyn Notifier>,
}

/// The dispatch orchestrator.
#[derive(Clone)]
pub struct Dispatcher {
    templates: Arc<TemplateCache>,
}

impl Dispatcher {
    pub fn new(templates: Arc<TemplateCache>) -> Self {
        Self { templates }
    }

    /// Renders `payload` with the channel's template and delivers it.
    ///
    /// Template failures are returned before any delivery is attempted.
    #[instrument(skip_all, fields(provider = %channel.kind, alerts = payload.alerts.len()))]
    pub async fn dispatch(
        &self,
        payload: &AlertPayload,
        channel: &Channel,
    ) -> Result<DeliveryOutcome, DispatchError> {
        let status = payload.overall_status();
        info!(status = %status, "Dispatching alerts");

        let template = self
            .templates
            .resolve(&channel.config.template)
            .map_err(|e| {
                error!(template = %channel.config.template.display(), error = %e, "Failed to load template");
                DispatchError::TemplateLoad(e)
            })?;

        let rendered = template.render(&render_context(payload)).map_err(|e| {
            error!(error = %e, "Failed to render template");
            DispatchError::TemplateRender(e)
        })?;
        debug!(bytes = rendered.len(), "Template rendered");

        let outcome = channel.notifier.deliver(&channel.config, &rendered).await?;
        Ok(outcome)
    }
}
