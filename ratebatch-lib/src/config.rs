//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `RB_*`
//! environment variables, merging them with proper precedence rules, and
//! folding the result into a `BatchConfig`.

use crate::error::BatchError;
use crate::types::BatchConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration loaded from TOML files.
///
/// ```toml
/// [defaults]
/// concurrency = 50
/// rate_limit = 500
/// window = "60s"
/// progress_interval = "30s"
/// timeout = "20s"
///
/// [output]
/// default_format = "json"
/// json_pretty = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    /// Default scheduling limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Output formatting preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

/// Default values for the processor limits.
///
/// Durations are strings such as "500ms", "5s" or "2m".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DefaultsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_interval: Option<String>,

    /// Per-item timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Output formatting configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// Default output format ("text", "json" or "csv")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_format: Option<String>,

    /// Include CSV headers by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_headers: Option<bool>,

    /// Pretty-print JSON by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_pretty: Option<bool>,
}

impl FileConfig {
    /// Apply the `[defaults]` section on top of `config`.
    pub fn apply_to(&self, mut config: BatchConfig) -> Result<BatchConfig> {
        let Some(defaults) = &self.defaults else {
            return Ok(config);
        };

        if let Some(concurrency) = defaults.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(rate_limit) = defaults.rate_limit {
            config.rate_limit = rate_limit;
        }
        if let Some(window) = &defaults.window {
            config.window = require_duration("window", window)?;
        }
        if let Some(interval) = &defaults.progress_interval {
            config.progress_interval = require_duration("progress_interval", interval)?;
        }
        if let Some(timeout) = &defaults.timeout {
            config.item_timeout = Some(require_duration("timeout", timeout)?);
        }

        Ok(config)
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to log which config files were picked up
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// `FileError` if the file is missing or unreadable, `ConfigError` if it
    /// does not parse or holds invalid values.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BatchError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            BatchError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;

        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config is lowest, then `~/.ratebatch.toml`, then a file in the
    /// current directory. Files that fail to load are skipped with a warning.
    pub fn discover_and_load(&self) -> Result<FileConfig> {
        let mut merged_config = FileConfig::default();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    if self.verbose {
                        debug!(path = %path.display(), "Loaded config file");
                    }
                    merged_config = self.merge_configs(merged_config, config);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring config file"),
            }
        }

        Ok(merged_config)
    }

    fn get_local_config_path(&self) -> Option<PathBuf> {
        let candidates = ["./ratebatch.toml", "./.ratebatch.toml"];

        candidates
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        let candidates = [".ratebatch.toml", "ratebatch.toml"];

        candidates
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Follows the XDG Base Directory Specification.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("ratebatch").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations; values from `higher` win.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: match (lower.defaults, higher.defaults) {
                (Some(lower_defaults), Some(higher_defaults)) => Some(DefaultsConfig {
                    concurrency: higher_defaults.concurrency.or(lower_defaults.concurrency),
                    rate_limit: higher_defaults.rate_limit.or(lower_defaults.rate_limit),
                    window: higher_defaults.window.or(lower_defaults.window),
                    progress_interval: higher_defaults
                        .progress_interval
                        .or(lower_defaults.progress_interval),
                    timeout: higher_defaults.timeout.or(lower_defaults.timeout),
                }),
                (lower_defaults, higher_defaults) => higher_defaults.or(lower_defaults),
            },
            output: match (lower.output, higher.output) {
                (Some(lower_output), Some(higher_output)) => Some(OutputConfig {
                    default_format: higher_output
                        .default_format
                        .or(lower_output.default_format),
                    csv_headers: higher_output.csv_headers.or(lower_output.csv_headers),
                    json_pretty: higher_output.json_pretty.or(lower_output.json_pretty),
                }),
                (lower_output, higher_output) => higher_output.or(lower_output),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<()> {
        if let Some(defaults) = &config.defaults {
            if defaults.concurrency == Some(0) {
                return Err(BatchError::config("concurrency must be positive"));
            }
            if defaults.rate_limit == Some(0) {
                return Err(BatchError::config("rate_limit must be positive"));
            }

            let durations = [
                ("window", &defaults.window),
                ("progress_interval", &defaults.progress_interval),
                ("timeout", &defaults.timeout),
            ];
            for (name, value) in durations {
                if let Some(value) = value {
                    require_duration(name, value)?;
                }
            }
        }

        if let Some(output) = &config.output {
            if let Some(format) = &output.default_format {
                if !matches!(format.as_str(), "text" | "json" | "csv") {
                    return Err(BatchError::config(format!(
                        "Invalid output format '{}'. Use 'text', 'json' or 'csv'",
                        format
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Environment variable configuration that mirrors CLI options.
///
/// Values come from `RB_*` variables. Invalid values are skipped with a
/// warning rather than failing the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub concurrency: Option<usize>,
    pub rate_limit: Option<usize>,
    pub window: Option<Duration>,
    pub progress_interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub json: Option<bool>,
    pub csv: Option<bool>,
    pub file: Option<String>,
    pub config: Option<String>,
}

impl EnvConfig {
    /// Apply the scheduling values on top of `config`.
    pub fn apply_to(&self, mut config: BatchConfig) -> BatchConfig {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(rate_limit) = self.rate_limit {
            config.rate_limit = rate_limit;
        }
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(interval) = self.progress_interval {
            config.progress_interval = interval;
        }
        if let Some(timeout) = self.timeout {
            config.item_timeout = Some(timeout);
        }
        config
    }

    /// Check if output format conflicts exist (JSON and CSV both set).
    pub fn has_output_format_conflict(&self) -> bool {
        matches!((self.json, self.csv), (Some(true), Some(true)))
    }
}

/// Load configuration from `RB_*` environment variables.
///
/// Recognised variables: `RB_CONCURRENCY`, `RB_RATE_LIMIT`, `RB_WINDOW`,
/// `RB_PROGRESS_INTERVAL`, `RB_TIMEOUT`, `RB_JSON`, `RB_CSV`, `RB_FILE`,
/// `RB_CONFIG`.
pub fn load_env_config() -> EnvConfig {
    EnvConfig {
        concurrency: env_parse("RB_CONCURRENCY", parse_positive),
        rate_limit: env_parse("RB_RATE_LIMIT", parse_positive),
        window: env_parse("RB_WINDOW", parse_duration_string),
        progress_interval: env_parse("RB_PROGRESS_INTERVAL", parse_duration_string),
        timeout: env_parse("RB_TIMEOUT", parse_duration_string),
        json: env_parse("RB_JSON", parse_bool),
        csv: env_parse("RB_CSV", parse_bool),
        file: env_parse("RB_FILE", non_empty),
        config: env_parse("RB_CONFIG", non_empty),
    }
}

fn env_parse<T>(name: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    let raw = env::var(name).ok()?;
    match parse(&raw) {
        Some(value) => {
            debug!(variable = name, value = %raw, "Using environment override");
            Some(value)
        }
        None => {
            warn!(variable = name, value = %raw, "Ignoring invalid environment value");
            None
        }
    }
}

fn parse_positive(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn require_duration(name: &str, value: &str) -> Result<Duration> {
    parse_duration_string(value).ok_or_else(|| {
        BatchError::config(format!(
            "Invalid {} '{}'. Use a positive duration like '500ms', '5s', '2m'",
            name, value
        ))
    })
}

/// Parse a duration string like "500ms", "5s", "2m" or "1h".
///
/// A bare number is taken as seconds. Zero durations are rejected.
pub fn parse_duration_string(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();

    let duration = if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = value.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        value.parse::<u64>().ok().map(Duration::from_secs)
    }?;

    (!duration.is_zero()).then_some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_parse_duration_string() {
        assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration_string("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration_string("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration_string("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration_string("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_string("0s"), None);
        assert_eq!(parse_duration_string("-1s"), None);
        assert_eq!(parse_duration_string("soon"), None);
    }

    #[test]
    fn test_load_valid_config() {
        let temp_file = write_config(
            r#"
[defaults]
concurrency = 25
rate_limit = 500
window = "1m"

[output]
default_format = "json"
json_pretty = true
"#,
        );

        let manager = ConfigManager::new(false);
        let config = manager.load_file(temp_file.path()).unwrap();

        let defaults = config.defaults.clone().unwrap();
        assert_eq!(defaults.concurrency, Some(25));
        assert_eq!(defaults.rate_limit, Some(500));
        assert_eq!(defaults.window, Some("1m".to_string()));

        let output = config.output.clone().unwrap();
        assert_eq!(output.default_format, Some("json".to_string()));

        let batch = config.apply_to(BatchConfig::default()).unwrap();
        assert_eq!(batch.concurrency, 25);
        assert_eq!(batch.rate_limit, 500);
        assert_eq!(batch.window, Duration::from_secs(60));
        assert_eq!(batch.item_timeout, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let manager = ConfigManager::new(false);

        for content in [
            "[defaults]\nconcurrency = 0\n",
            "[defaults]\nrate_limit = 0\n",
            "[defaults]\nwindow = \"0s\"\n",
            "[defaults]\ntimeout = \"whenever\"\n",
            "[output]\ndefault_format = \"xml\"\n",
        ] {
            let temp_file = write_config(content);
            let result = manager.load_file(temp_file.path());
            assert!(
                matches!(result, Err(BatchError::ConfigError { .. })),
                "expected config error for {:?}",
                content
            );
        }
    }

    #[test]
    fn test_negative_rate_limit_does_not_parse() {
        let temp_file = write_config("[defaults]\nrate_limit = -1\n");
        let result = ConfigManager::new(false).load_file(temp_file.path());
        assert!(matches!(result, Err(BatchError::ConfigError { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigManager::new(false).load_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(BatchError::FileError { .. })));
    }

    #[test]
    fn test_merge_configs() {
        let manager = ConfigManager::new(false);

        let lower = FileConfig {
            defaults: Some(DefaultsConfig {
                concurrency: Some(10),
                window: Some("60s".to_string()),
                ..Default::default()
            }),
            output: Some(OutputConfig {
                csv_headers: Some(true),
                ..Default::default()
            }),
        };

        let higher = FileConfig {
            defaults: Some(DefaultsConfig {
                concurrency: Some(25),
                rate_limit: Some(100),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = manager.merge_configs(lower, higher);
        let defaults = merged.defaults.unwrap();

        assert_eq!(defaults.concurrency, Some(25)); // Higher wins
        assert_eq!(defaults.rate_limit, Some(100));
        assert_eq!(defaults.window, Some("60s".to_string())); // Lower preserved
        assert_eq!(merged.output.unwrap().csv_headers, Some(true));
    }

    #[test]
    fn test_env_config_apply() {
        let env_config = EnvConfig {
            concurrency: Some(3),
            timeout: Some(Duration::from_secs(9)),
            ..Default::default()
        };
        let config = env_config.apply_to(BatchConfig::default());
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.rate_limit, 500);
        assert_eq!(config.item_timeout, Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_load_env_config() {
        env::set_var("RB_RATE_LIMIT", "42");
        env::set_var("RB_WINDOW", "90s");
        env::set_var("RB_CONCURRENCY", "zero");
        env::set_var("RB_JSON", "yes");

        let env_config = load_env_config();

        env::remove_var("RB_RATE_LIMIT");
        env::remove_var("RB_WINDOW");
        env::remove_var("RB_CONCURRENCY");
        env::remove_var("RB_JSON");

        assert_eq!(env_config.rate_limit, Some(42));
        assert_eq!(env_config.window, Some(Duration::from_secs(90)));
        assert_eq!(env_config.concurrency, None);
        assert_eq!(env_config.json, Some(true));
        assert!(!env_config.has_output_format_conflict());
    }
}
