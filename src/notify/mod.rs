pub mod engine;
pub mod rules;
pub mod sink;

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::config::{NotificationRulesConfig, NotificationsConfig};
use crate::notify::engine::{apply_rules, QueueEvent};
use crate::notify::sink::{QueueSink, StdoutSink, WebhookSink};

/// Fans queue events out to the configured sinks. Delivery failures are
/// logged and never returned.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn QueueSink>>,
    rules: NotificationRulesConfig,
}

impl Notifier {
    pub fn from_config(config: &NotificationsConfig) -> Result<Self> {
        let mut sinks: Vec<Arc<dyn QueueSink>> = Vec::new();
        if config.enable_stdout {
            sinks.push(Arc::new(StdoutSink));
        }
        if !config.webhook_url.trim().is_empty() {
            sinks.push(Arc::new(WebhookSink::new(config.webhook_url.trim())?));
        }
        Ok(Self {
            sinks,
            rules: config.rules.clone(),
        })
    }

    pub fn with_sinks(sinks: Vec<Arc<dyn QueueSink>>, rules: NotificationRulesConfig) -> Self {
        Self { sinks, rules }
    }

    pub async fn publish(&self, events: Vec<QueueEvent>) {
        for event in apply_rules(events, &self.rules) {
            for sink in &self.sinks {
                if let Err(err) = sink.send(&event).await {
                    warn!(kind = event.kind.as_slug(), "failed sending notification: {err}");
                }
            }
        }
    }
}
