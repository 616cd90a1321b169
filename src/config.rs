use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::custody::{ConfirmationPolicy, RetryPolicy};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// PostgreSQL connection URL for the history store; in-memory when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// HS256 secret for Bearer tokens
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    Memory,
    Rpc,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub mode: LedgerMode,
    #[serde(default)]
    pub rpc_url: Option<String>,
    pub request_timeout_ms: u64,
    pub required_confirmations: u32,
    pub confirmation_poll_ms: u64,
    pub confirmation_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mode: LedgerMode::Memory,
            rpc_url: None,
            request_timeout_ms: 30_000,
            required_confirmations: 1,
            confirmation_poll_ms: 500,
            confirmation_timeout_ms: 60_000,
        }
    }
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            required_confirmations: self.required_confirmations,
            poll_interval: Duration::from_millis(self.confirmation_poll_ms),
            timeout: Duration::from_millis(self.confirmation_timeout_ms),
        }
    }
}

/// Ledger call retry settings (3 attempts, 1500 ms apart by default)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1500,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        if config.ledger.mode == LedgerMode::Rpc && config.ledger.rpc_url.is_none() {
            anyhow::bail!("ledger.rpc_url is required when ledger.mode is rpc");
        }
        Ok(config)
    }
}
