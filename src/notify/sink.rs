use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::notify::engine::QueueEvent;

#[async_trait]
pub trait QueueSink: Send + Sync {
    async fn send(&self, event: &QueueEvent) -> Result<()>;
}

pub struct StdoutSink;

#[async_trait]
impl QueueSink for StdoutSink {
    async fn send(&self, event: &QueueEvent) -> Result<()> {
        println!("[{}] {} - {}", event.kind.as_slug(), event.title, event.body);
        Ok(())
    }
}

pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cascade-planner/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl QueueSink for WebhookSink {
    async fn send(&self, event: &QueueEvent) -> Result<()> {
        let req = if self.url.contains("discord.com/api/webhooks")
            || self.url.contains("discordapp.com/api/webhooks")
        {
            let content = format!("[{}] {}\n{}", event.kind.as_slug(), event.title, event.body);
            self.client
                .post(&self.url)
                .json(&serde_json::json!({ "content": content }))
        } else {
            self.client.post(&self.url).json(event)
        };

        req.send().await?.error_for_status()?;
        Ok(())
    }
}
