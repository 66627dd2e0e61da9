//! Configuration for the collector.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI)
//! 2. Environment variables (SPECIFY_OUTPUT, SPECIFY_UPLOAD_ORIGIN,
//!    SPECIFY_LOCAL_ONLY)
//! 3. Config file (.specify/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches the current directory and parents for .specify/config.yaml
//! - Falls back to <config dir>/specify/config.yaml
//! - A relative `output` path is resolved against the directory holding
//!   .specify/

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::upload::{DEFAULT_ENDPOINT, DEFAULT_ORIGIN};
use crate::core::delivery::DEFAULT_OUTPUT;
use crate::core::redaction::RedactionRule;
use crate::core::scheduler::SchedulerSettings;

pub const ENV_OUTPUT: &str = "SPECIFY_OUTPUT";
pub const ENV_UPLOAD_ORIGIN: &str = "SPECIFY_UPLOAD_ORIGIN";
pub const ENV_LOCAL_ONLY: &str = "SPECIFY_LOCAL_ONLY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub output: Option<String>,
    pub local_only: Option<bool>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadConfig {
    pub origin: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedactionConfig {
    pub username: Option<bool>,
    pub onedrive_commercial: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    pub unit_timeout_seconds: Option<u64>,
    pub run_timeout_seconds: Option<u64>,
    pub max_concurrency: Option<usize>,
}

/// Resolved settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// Where the report is saved in local-only mode or after a failed upload
    pub output: PathBuf,
    pub local_only: bool,
    pub upload: UploadSettings,
    pub redaction: RedactionSettings,
    pub scheduler: SchedulerLimits,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSettings {
    pub origin: String,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RedactionSettings {
    pub username: bool,
    pub onedrive_commercial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerLimits {
    pub unit_timeout_seconds: Option<u64>,
    pub run_timeout_seconds: Option<u64>,
    pub max_concurrency: Option<usize>,
}

fn default_upload_timeout() -> u64 {
    30
}

fn default_run_timeout() -> Option<u64> {
    Some(600)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            local_only: false,
            upload: UploadSettings {
                origin: DEFAULT_ORIGIN.to_string(),
                endpoint: DEFAULT_ENDPOINT.to_string(),
                timeout_seconds: default_upload_timeout(),
            },
            redaction: RedactionSettings::default(),
            scheduler: SchedulerLimits {
                unit_timeout_seconds: None,
                run_timeout_seconds: default_run_timeout(),
                max_concurrency: None,
            },
            config_file: None,
        }
    }
}

impl Settings {
    /// Load from the current directory and process environment
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let fallback = dirs::config_dir().map(|dir| dir.join("specify").join("config.yaml"));
        load_settings(&cwd, fallback.as_deref(), |key| std::env::var(key).ok())
    }

    /// Redaction rules switched on by these settings
    pub fn redaction_rules(&self) -> Vec<RedactionRule> {
        let mut rules = Vec::new();
        if self.redaction.username {
            rules.push(RedactionRule::RemoveUsername);
        }
        if self.redaction.onedrive_commercial {
            rules.push(RedactionRule::RemoveOneDriveCommercial);
        }
        rules
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            unit_timeout: self.scheduler.unit_timeout_seconds.map(Duration::from_secs),
            run_deadline: self.scheduler.run_timeout_seconds.map(Duration::from_secs),
            max_concurrency: self.scheduler.max_concurrency,
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.timeout_seconds)
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".specify").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid, empty config
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Load settings from all sources below the CLI
fn load_settings<E>(start: &Path, fallback: Option<&Path>, env: E) -> Result<Settings>
where
    E: Fn(&str) -> Option<String>,
{
    let mut settings = Settings::default();

    let config_file = find_config_file(start).or_else(|| fallback.filter(|p| p.exists()).map(Path::to_path_buf));

    if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Project root is the parent of .specify/
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        if let Some(ref output) = config.output {
            settings.output = resolve_path(base_dir, output);
        }
        if let Some(local_only) = config.local_only {
            settings.local_only = local_only;
        }

        if let Some(origin) = config.upload.origin {
            settings.upload.origin = origin;
        }
        if let Some(endpoint) = config.upload.endpoint {
            settings.upload.endpoint = endpoint;
        }
        if let Some(timeout) = config.upload.timeout_seconds {
            settings.upload.timeout_seconds = timeout;
        }

        settings.redaction.username = config.redaction.username.unwrap_or(false);
        settings.redaction.onedrive_commercial =
            config.redaction.onedrive_commercial.unwrap_or(false);

        if config.scheduler.unit_timeout_seconds.is_some() {
            settings.scheduler.unit_timeout_seconds = config.scheduler.unit_timeout_seconds;
        }
        if config.scheduler.run_timeout_seconds.is_some() {
            settings.scheduler.run_timeout_seconds = config.scheduler.run_timeout_seconds;
        }
        settings.scheduler.max_concurrency = config.scheduler.max_concurrency;
    }

    if let Some(output) = env(ENV_OUTPUT).filter(|v| !v.is_empty()) {
        settings.output = PathBuf::from(output);
    }
    if let Some(origin) = env(ENV_UPLOAD_ORIGIN).filter(|v| !v.is_empty()) {
        settings.upload.origin = origin;
    }
    if let Some(raw) = env(ENV_LOCAL_ONLY) {
        settings.local_only = parse_flag(&raw)
            .with_context(|| format!("Invalid boolean in {}: {}", ENV_LOCAL_ONLY, raw))?;
    }

    settings.config_file = config_file;
    Ok(settings)
}
