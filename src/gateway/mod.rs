//! Drafting oracle: turns a claimed queue item into a titled draft with a
//! quality score in 0..=100.

pub mod http;
pub mod template;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::gateway::http::HttpOracle;
use crate::gateway::template::TemplateOracle;
use crate::queue::DemandQueueItem;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub payload: Value,
    pub quality_score: u8,
}

#[async_trait]
pub trait DraftOracle: Send + Sync {
    fn name(&self) -> &str;
    async fn draft(&self, item: &DemandQueueItem) -> Result<Draft>;
}

/// HTTP gateway when a url is configured, offline templates otherwise.
pub fn oracle_from_config(config: &Config) -> Result<Arc<dyn DraftOracle>> {
    if config.gateway.url.trim().is_empty() {
        return Ok(Arc::new(TemplateOracle));
    }
    let oracle = HttpOracle::new(
        config.gateway.url.trim(),
        &config.gateway.api_key,
        &config.gateway.model,
        config.gateway_timeout(),
    )?;
    Ok(Arc::new(oracle))
}
