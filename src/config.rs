use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::transport::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub provider: Provider,
    pub api_key: String,
    /// Base URL override. Required for on-prem Momentum installs.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: Provider::Sparkpost,
            api_key: String::new(),
            endpoint: None,
            timeout_seconds: default_timeout_seconds(),
            max_attempts: default_max_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            bail!("api_key must be set");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.provider == Provider::Momentum && self.endpoint.is_none() {
            bail!("momentum requires an endpoint (base URL of the on-prem install)");
        }

        Ok(())
    }
}
