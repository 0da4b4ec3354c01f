//! Configuration for the mock server.
//!
//! Read once at startup from a YAML file. Every field is optional; a missing
//! file yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Port used when neither the file nor the command line sets one.
pub const DEFAULT_HTTP_PORT: u16 = 3456;

/// Header carrying the per-request scenario override.
pub const DEFAULT_SCENARIO_HEADER: &str = "X-MockMate-Scenario";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockMateConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Snapshot location
    #[serde(default)]
    pub storage: StorageSettings,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl MockMateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        // An empty file deserializes to null
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
                .map_err(|e| anyhow::anyhow!("Invalid configuration {}: {}", path.display(), e))
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.trim().is_empty() {
            anyhow::bail!("server.host cannot be empty");
        }
        if self.storage.path.as_os_str().is_empty() {
            anyhow::bail!("storage.path cannot be empty");
        }
        axum::http::HeaderName::from_bytes(self.settings.scenario_header.as_bytes()).map_err(
            |e| {
                anyhow::anyhow!(
                    "Invalid scenario_header {:?}: {}",
                    self.settings.scenario_header,
                    e
                )
            },
        )?;
        axum::http::HeaderValue::from_str(&self.settings.default_content_type)
            .map_err(|e| anyhow::anyhow!("Invalid default_content_type: {}", e))?;
        if self.settings.max_body_bytes == 0 {
            anyhow::bail!("settings.max_body_bytes must be greater than zero");
        }
        Ok(())
    }

    /// Address the HTTP listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

/// Snapshot file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSettings {
    /// JSON snapshot rewritten on every mutation
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("mockmate-data.json")
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched definitions
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Content type for responses without a body or explicit header
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Header selecting the scenario for one request
    #[serde(default = "default_scenario_header")]
    pub scenario_header: String,

    /// Largest request body read by the mock handler
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
            scenario_header: default_scenario_header(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_scenario_header() -> String {
    DEFAULT_SCENARIO_HEADER.to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}
