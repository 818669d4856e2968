//! Daemon configuration: optional TOML file overlaid by JOBSTORE_* variables

use anyhow::{Context, Result};
use jobstore_core::application::SchedulerConfig;
use jobstore_core::port::FlowBindingRule;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "JOBSTORE";
const CONFIG_ENV: &str = "JOBSTORE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "~/.jobstore/jobstore.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// SQLite file path, or `sqlite::memory:`
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    /// Data files of job specifications are resolved below this directory
    pub data_dir: String,
    pub log_format: LogFormat,
    /// Daily rolling log files are written here when set
    pub log_dir: Option<String>,
    pub scheduler: SchedulerConfig,
    pub bindings: Vec<FlowBindingRule>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.jobstore/jobstore.db".to_string(),
            rpc_host: "127.0.0.1".to_string(),
            rpc_port: 9627,
            data_dir: "~/.jobstore/data".to_string(),
            log_format: LogFormat::Pretty,
            log_dir: None,
            scheduler: SchedulerConfig::default(),
            bindings: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load from `JOBSTORE_CONFIG` (or the default path) and the process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(shellexpand::tilde(&path).into_owned());
        Self::from_sources(Some(&path), None)
    }

    /// `env` replaces the process environment when given
    pub fn from_sources(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: DaemonConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.max_chunk_size == 0 {
            anyhow::bail!("scheduler.max_chunk_size must be positive");
        }
        if self.scheduler.queue_capacity == 0 {
            anyhow::bail!("scheduler.queue_capacity must be positive");
        }
        Ok(())
    }

    /// sqlx connection URL for the configured database
    pub fn database_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}", shellexpand::tilde(&self.db_path))
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).into_owned()))
    }
}
