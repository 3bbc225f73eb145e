use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::engine::dispatch::DispatchConfig;
use crate::engine::runner::RetryConfig;

/// Configuration loaded from `chainflow.yaml`.
/// All fields are optional; missing fields fall back to CLI/env/defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ChainflowConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// `sqlite://...` url, or `memory` for a throwaway in-process store.
    pub database_url: Option<String>,
    pub db_pool_size: Option<usize>,
    pub reserved_connections: Option<usize>,
    pub queue_capacity: Option<usize>,
    /// Base url that relative task endpoints are resolved against.
    pub task_service_url: Option<String>,
    pub max_retries: Option<u32>,
    pub backoff_s: Option<f64>,
    pub request_timeout_s: Option<u64>,
}

impl ChainflowConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `chainflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("chainflow.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yml::from_str(contents)?)
    }

    /// Worker pool sizing, with unset fields at their defaults.
    pub fn dispatch(&self) -> DispatchConfig {
        let defaults = DispatchConfig::default();
        DispatchConfig {
            db_pool_size: self.db_pool_size.unwrap_or(defaults.db_pool_size),
            reserved_connections: self
                .reserved_connections
                .unwrap_or(defaults.reserved_connections),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
        }
    }

    /// Task retry policy, with unset fields at their defaults.
    pub fn retry(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            backoff_s: self.backoff_s.unwrap_or(defaults.backoff_s),
        }
    }
}
