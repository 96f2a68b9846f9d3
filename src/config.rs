//! Server configuration, loaded from an optional YAML file with defaults
//! for every field.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub database_path: String,
    pub export_directory: String,
    pub export_page_size: usize,
    pub job_timeout_secs: u64,
    pub download_token_ttl_secs: u64,
    pub cors_origin: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_path: "entigraph.db".to_string(),
            export_directory: std::env::temp_dir()
                .join("entigraph-exports")
                .to_string_lossy()
                .into_owned(),
            export_page_size: 1000,
            job_timeout_secs: 30 * 60,
            download_token_ttl_secs: 5 * 60,
            cors_origin: None,
        }
    }
}

impl AppConfig {
    /// Loads the config file when a path is given; a missing path falls back
    /// to the defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("read config file {}", path))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("parse config file {}", path))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn download_token_ttl(&self) -> Duration {
        Duration::from_secs(self.download_token_ttl_secs)
    }
}
