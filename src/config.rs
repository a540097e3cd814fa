//! Configuration for saga orchestrator deployments

use serde::{Deserialize, Serialize};

/// Main configuration for an orchestrator process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Queue the orchestrator consumes reply tasks from; step handlers
    /// publish their responses here
    pub response_queue: String,

    /// Broker connection settings
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Worker-side retry settings
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker URL ("memory://local" selects the in-process broker)
    pub url: String,
}

/// Retry policy applied by worker-side handlers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            response_queue: "saga.responses".to_string(),
            broker: BrokerConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "memory://local".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 100,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.response_queue.is_empty() {
            return Err(anyhow::anyhow!("Response queue name cannot be empty"));
        }

        if self.broker.url.is_empty() {
            return Err(anyhow::anyhow!("Broker URL cannot be empty"));
        }

        if self.worker.retry_base_delay_ms == 0 {
            return Err(anyhow::anyhow!(
                "Retry base delay must be greater than 0"
            ));
        }

        Ok(())
    }
}
