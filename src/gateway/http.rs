use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::gateway::{Draft, DraftOracle};
use crate::plan::EntityKind;
use crate::queue::{validate_quality_score, DemandQueueItem};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6;

#[derive(Debug, Serialize)]
struct DraftRequest<'a> {
    model: &'a str,
    entity_type: EntityKind,
    prefilled_spec: &'a Value,
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    payload: Value,
    quality_score: i64,
}

/// Posts the prefilled spec to an external drafting gateway.
pub struct HttpOracle {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

impl HttpOracle {
    pub fn new(url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cascade-planner/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS).min(timeout))
            .build()
            .context("failed to build gateway HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl DraftOracle for HttpOracle {
    fn name(&self) -> &str {
        "http"
    }

    async fn draft(&self, item: &DemandQueueItem) -> Result<Draft> {
        let body = DraftRequest {
            model: &self.model,
            entity_type: item.entity_type,
            prefilled_spec: &item.prefilled_spec,
        };
        let mut request = self.client.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        debug!(item = %item.id, url = %self.url, "requesting draft");

        let response = request
            .send()
            .await
            .with_context(|| format!("failed POST request: {}", self.url))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed reading response body: {}", self.url))?;
        if !status.is_success() {
            let preview: String = text.chars().take(180).collect();
            return Err(anyhow!("POST {} returned {status}: {preview}", self.url));
        }
        parse_draft(&text).with_context(|| format!("invalid draft from {}", self.url))
    }
}

fn parse_draft(body: &str) -> Result<Draft> {
    let parsed: DraftResponse = serde_json::from_str(body)?;
    if parsed.title.trim().is_empty() {
        return Err(anyhow!("draft has an empty title"));
    }
    let quality_score = validate_quality_score(parsed.quality_score)?;
    Ok(Draft {
        title: parsed.title.trim().to_string(),
        description: parsed.description,
        payload: parsed.payload,
        quality_score,
    })
}
