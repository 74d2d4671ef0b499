use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cascade::RemainderPolicy;
use crate::plan::CascadeConfig;
use crate::queue::DEFAULT_ACCEPTANCE_THRESHOLD;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cascade: CascadeDefaults,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

/// Ratios applied to newly created plans, plus the remainder attribution rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeDefaults {
    #[serde(flatten)]
    pub ratios: CascadeConfig,
    #[serde(default)]
    pub remainder_policy: RemainderPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: u8,
    #[serde(default = "default_stale_claim_minutes")]
    pub stale_claim_minutes: u64,
    #[serde(default = "default_drain_limit")]
    pub drain_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_gateway_model")]
    pub model: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
    #[serde(default)]
    pub rules: NotificationRulesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRulesConfig {
    #[serde(default = "default_true")]
    pub item_accepted: bool,
    #[serde(default = "default_true")]
    pub item_needs_review: bool,
    #[serde(default = "default_true")]
    pub item_skipped: bool,
    #[serde(default = "default_true")]
    pub item_rejected: bool,
    #[serde(default = "default_true")]
    pub queue_drained: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub gateway_url: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/cascade-planner/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path.to_string_lossy().into_owned();
        }
        if let Some(url) = overrides.gateway_url {
            self.gateway.url = url;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs.max(1))
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
db_path = "~/.local/share/cascade-planner/planner.db"

# Ratios applied to new plans. remainder_policy is "round_robin" or "drop".
[cascade]
challenges_per_objective = 5
pilots_per_challenge = 2
campaigns_per_objective = 2
events_per_objective = 3
remainder_policy = "round_robin"

[queue]
acceptance_threshold = 70
stale_claim_minutes = 30
drain_limit = 25

# Leave url empty to draft offline from the prefilled spec.
[gateway]
url = ""
api_key = ""
model = "default"
timeout_secs = 20

[server]
host = "127.0.0.1"
port = 3001

[notifications]
webhook_url = ""
enable_stdout = true

[notifications.rules]
item_accepted = true
item_needs_review = true
item_skipped = true
item_rejected = true
queue_drained = true
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            stale_claim_minutes: default_stale_claim_minutes(),
            drain_limit: default_drain_limit(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            model: default_gateway_model(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            enable_stdout: default_enable_stdout(),
            rules: NotificationRulesConfig::default(),
        }
    }
}

impl Default for NotificationRulesConfig {
    fn default() -> Self {
        Self {
            item_accepted: true,
            item_needs_review: true,
            item_skipped: true,
            item_rejected: true,
            queue_drained: true,
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/cascade-planner/planner.db".to_string()
}

fn default_acceptance_threshold() -> u8 {
    DEFAULT_ACCEPTANCE_THRESHOLD
}

fn default_stale_claim_minutes() -> u64 {
    30
}

fn default_drain_limit() -> usize {
    25
}

fn default_gateway_model() -> String {
    "default".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    20
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3001
}

fn default_enable_stdout() -> bool {
    true
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("template");
        assert_eq!(parsed.cascade.ratios, CascadeConfig::default());
        assert_eq!(parsed.cascade.remainder_policy, RemainderPolicy::RoundRobin);
        assert_eq!(parsed.queue.acceptance_threshold, 70);
        assert_eq!(parsed.queue.stale_claim_minutes, 30);
        assert_eq!(parsed.server.port, 3001);
        assert!(parsed.gateway.url.is_empty());
        assert!(parsed.notifications.rules.queue_drained);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let parsed: Config = toml::from_str(
            r#"
[cascade]
challenges_per_objective = 8
remainder_policy = "drop"

[queue]
acceptance_threshold = 80
"#,
        )
        .expect("partial config");
        assert_eq!(parsed.cascade.ratios.challenges_per_objective, 8);
        assert_eq!(parsed.cascade.ratios.events_per_objective, 3);
        assert_eq!(parsed.cascade.remainder_policy, RemainderPolicy::Drop);
        assert_eq!(parsed.queue.acceptance_threshold, 80);
        assert_eq!(parsed.queue.drain_limit, 25);
        assert_eq!(parsed.storage.db_path, default_db_path());
    }

    #[test]
    fn overrides_replace_db_path_and_gateway() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            db_path: Some(PathBuf::from("/tmp/planner.db")),
            gateway_url: Some("http://localhost:8080/draft".to_string()),
        });
        assert_eq!(config.resolved_db_path(), PathBuf::from("/tmp/planner.db"));
        assert_eq!(config.gateway.url, "http://localhost:8080/draft");
    }

    #[test]
    fn api_key_is_not_echoed() {
        let mut config = Config::default();
        config.gateway.api_key = "secret".to_string();
        let rendered = serde_json::to_string(&config).expect("json");
        assert!(!rendered.contains("secret"));
    }
}
