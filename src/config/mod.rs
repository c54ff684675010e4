//! Configuration management for the loader
//!
//! Handles configuration loading, environment overrides and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Overrides `sources.root`
pub const ENV_ROOT: &str = "MODLOADER_ROOT";
/// Overrides `sources.extension`
pub const ENV_EXTENSION: &str = "MODLOADER_EXTENSION";
/// Overrides `logging.filter`
pub const ENV_LOG: &str = "MODLOADER_LOG";
/// Forces `logging.json_format` on
pub const ENV_LOG_JSON: &str = "MODLOADER_LOG_JSON";

/// Value of an override variable; unset and blank count as absent
fn env_override(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// "1", "true", "yes" and "on", in any case
fn is_enabled(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Where module sources live on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory canonical names are resolved under
    #[serde(default = "default_root")]
    pub root: String,

    /// Extension appended to names that have none (empty = never append)
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_root() -> String {
    "modules".to_string()
}

fn default_extension() -> String {
    "js".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            extension: default_extension(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "modloader::loader=trace")
    ///
    /// `RUST_LOG` still takes precedence when set.
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (needs the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Loader configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub sources: SourceConfig,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl LoaderConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: LoaderConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `MODLOADER_*` environment variables on top of the file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = env_override(ENV_ROOT) {
            self.sources.root = root;
        }
        if let Some(extension) = env_override(ENV_EXTENSION) {
            self.sources.extension = extension;
        }
        if let Some(filter) = env_override(ENV_LOG) {
            self.logging.get_or_insert_with(LoggingConfig::default).filter = Some(filter);
        }
        if env_override(ENV_LOG_JSON).is_some_and(|value| is_enabled(&value)) {
            self.logging.get_or_insert_with(LoggingConfig::default).json_format = true;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sources.root.trim().is_empty() {
            return Err(anyhow::anyhow!("sources.root must not be empty"));
        }

        let extension = self.sources.extension.trim_start_matches('.');
        if extension.contains(['/', '\\']) || extension.contains(char::is_whitespace) {
            return Err(anyhow::anyhow!(
                "sources.extension '{}' must be a bare file extension",
                self.sources.extension
            ));
        }

        if let Some(ref logging) = self.logging {
            if let Some(ref filter) = logging.filter {
                if filter.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "logging.filter must not be empty when set; omit it to use the default"
                    ));
                }
            }
        }

        Ok(())
    }
}
