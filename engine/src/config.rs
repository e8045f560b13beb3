//! Configuration management for the procmon engine
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files, with defaults matching the behavior of a fresh
//! deployment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Main configuration structure for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logical site key this process reports under
    pub site_id: String,

    /// Retention configuration
    pub retention: RetentionConfig,

    /// Request capture configuration
    pub capture: CaptureConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Retention policy for process records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Delete the oldest-updated process records beyond this count
    pub max_process_records: usize,
}

/// Which responses get measured, and how the measurement is surfaced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture only these mime types; `None` captures everything
    pub only_mime_types: Option<Vec<String>>,

    /// Paths excluded from capture
    pub exclude_paths: Vec<PathFilter>,

    /// Count database queries per request (debug instrumentation)
    pub count_db_queries: bool,

    /// Insert the "time cost" annotation into HTML responses
    pub annotate_html: bool,

    /// Substring the annotation is spliced in front of
    pub annotation_marker: String,

    /// Annotation template with `{own}`, `{total}` and `{perc}`
    /// placeholders (milliseconds, milliseconds, percent)
    pub annotation_template: String,
}

/// A single path exclusion rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathFilter {
    /// Path to exclude
    pub path: String,

    /// Exclude everything under the path, not just an exact match
    pub recursive: bool,
}

/// Storage configuration for the JSON file store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for persisted records
    pub base_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format ("text" or "json")
    pub format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            site_id: "default".to_string(),
            retention: RetentionConfig::default(),
            capture: CaptureConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_process_records: 100,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            only_mime_types: None,
            exclude_paths: Vec::new(),
            count_db_queries: false,
            annotate_html: true,
            annotation_marker: "</body>".to_string(),
            annotation_template: concat!(
                r#"<p class="procmon"><small>"#,
                "procmon: {own} ms of {total} ms ({perc}%)",
                "</small></p></body>"
            )
            .to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/var/lib/procmon"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;

        let config: EngineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                reason: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.site_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "site_id".to_string(),
                value: "<empty>".to_string(),
            });
        }

        if self.retention.max_process_records == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retention.max_process_records".to_string(),
                value: "0".to_string(),
            });
        }

        if self.capture.annotate_html && self.capture.annotation_marker.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "capture.annotation_marker".to_string(),
                value: "<empty>".to_string(),
            });
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.format".to_string(),
                    value: other.to_string(),
                });
            }
        }

        Ok(())
    }
}
