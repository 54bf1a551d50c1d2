use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::dual_write::DualWriteConfig;
use crate::facade::StatusUpdateConfig;
use crate::service::TransactionServiceConfig;
use crate::worker::ConsistencyWorkerConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Emit the financial audit target
    #[serde(default = "default_true")]
    pub enable_tracing: bool,
    #[serde(default)]
    pub dual_write: DualWriteConfig,
    #[serde(default)]
    pub status_update: StatusUpdateConfig,
    #[serde(default)]
    pub transaction_service: TransactionServiceConfig,
    #[serde(default)]
    pub consistency_worker: ConsistencyWorkerConfig,
    /// PostgreSQL connection URL; in-memory store when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
