//! Optional settings file and the resolved session configuration.
//!
//! Values are layered: CLI flag, then environment (both handled by clap), then
//! `<config_dir>/bulkrun/settings.json`, then built-in defaults.

use crate::api::ApiConfig;
use crate::orchestrator::WorkflowSettings;
use crate::poller::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of the settings file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FileSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    pub poll_retries: Option<u32>,
    pub parallel: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    pub auto_save: Option<bool>,
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bulkrun").join("settings.json"))
}

/// Read settings from `path`. A missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<FileSettings> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileSettings::default()),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

/// Fully resolved configuration for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_url: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub poll_retries: u32,
    pub parallel: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub force: bool,
    pub batch_title: Option<String>,
    pub auto_save: bool,
    pub export_json: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub user_agent: String,
}

impl SessionConfig {
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Some(self.request_timeout),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Poll retries back off from the poll interval.
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            parallel: self.parallel,
            poll_interval: self.poll_interval,
            retry: RetryPolicy {
                max_retries: self.poll_retries,
                base_delay: self.poll_interval,
            },
            force_override: self.force,
            title_override: self.batch_title.clone(),
        }
    }
}
