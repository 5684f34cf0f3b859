//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolsConfig {
    /// Path to ffmpeg (auto-resolved if None)
    #[serde(default)]
    pub ffmpeg_bin: Option<PathBuf>,
    /// Path to ffprobe (derived from the ffmpeg path if None)
    #[serde(default)]
    pub ffprobe_bin: Option<PathBuf>,
}

/// Post-conversion output verification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyConfig {
    /// Outputs at or below this size are treated as implausible (default 10 MiB)
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
}

fn default_min_output_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            min_output_bytes: default_min_output_bytes(),
        }
    }
}

/// Grace periods for stopping the encoder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutsConfig {
    /// Time between graceful termination and a forced kill on cancel
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Same, but used when the application is shutting down
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Sleep between checks while the encoder output is idle
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

fn default_cancel_grace_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_idle_poll_ms() -> u64 {
    100
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: default_cancel_grace_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

/// File locations, relative paths resolve against the working directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("mkv2mp4_state.json")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("mkv2mp4.log")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            log_file: default_log_file(),
        }
    }
}

/// Folder monitor tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Delay before the first scan after monitoring starts
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Re-check cadence while a batch runs or no directory is set
    #[serde(default = "default_busy_recheck_secs")]
    pub busy_recheck_secs: u64,
    /// Source extensions picked up by folder scans (without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_initial_delay_secs() -> u64 {
    2
}

fn default_busy_recheck_secs() -> u64 {
    60
}

fn default_extensions() -> Vec<String> {
    ["mkv", "avi", "mov", "flv", "wmv", "mpeg", "mpg", "ts", "m2ts"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            busy_recheck_secs: default_busy_recheck_secs(),
            extensions: default_extensions(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - MKV2MP4_FFMPEG -> tools.ffmpeg_bin
    /// - MKV2MP4_FFPROBE -> tools.ffprobe_bin
    /// - MKV2MP4_MIN_OUTPUT_BYTES -> verify.min_output_bytes
    /// - MKV2MP4_STATE_FILE -> paths.state_file
    /// - MKV2MP4_LOG_FILE -> paths.log_file
    pub fn apply_env_overrides(&mut self) {
        if let Some(val) = non_empty_var("MKV2MP4_FFMPEG") {
            self.tools.ffmpeg_bin = Some(PathBuf::from(val));
        }

        if let Some(val) = non_empty_var("MKV2MP4_FFPROBE") {
            self.tools.ffprobe_bin = Some(PathBuf::from(val));
        }

        if let Some(val) = non_empty_var("MKV2MP4_MIN_OUTPUT_BYTES") {
            if let Ok(bytes) = val.parse::<u64>() {
                self.verify.min_output_bytes = bytes;
            }
        }

        if let Some(val) = non_empty_var("MKV2MP4_STATE_FILE") {
            self.paths.state_file = PathBuf::from(val);
        }

        if let Some(val) = non_empty_var("MKV2MP4_LOG_FILE") {
            self.paths.log_file = PathBuf::from(val);
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if !path.as_ref().exists() {
            let mut config = Self::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        Self::load(path)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("MKV2MP4_FFMPEG");
        env::remove_var("MKV2MP4_FFPROBE");
        env::remove_var("MKV2MP4_MIN_OUTPUT_BYTES");
        env::remove_var("MKV2MP4_STATE_FILE");
        env::remove_var("MKV2MP4_LOG_FILE");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            min_bytes in 0u64..(1u64 << 40),
            cancel_ms in 0u64..60_000,
            shutdown_ms in 0u64..120_000,
            busy_secs in 1u64..3600,
            ffmpeg in "[a-z/]{1,20}",
        ) {
            let toml_str = format!(
                r#"
[tools]
ffmpeg_bin = "{}"

[verify]
min_output_bytes = {}

[timeouts]
cancel_grace_ms = {}
shutdown_grace_ms = {}

[monitor]
busy_recheck_secs = {}
"#,
                ffmpeg, min_bytes, cancel_ms, shutdown_ms, busy_secs
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.tools.ffmpeg_bin, Some(PathBuf::from(&ffmpeg)));
            prop_assert_eq!(config.tools.ffprobe_bin, None);
            prop_assert_eq!(config.verify.min_output_bytes, min_bytes);
            prop_assert_eq!(config.timeouts.cancel_grace_ms, cancel_ms);
            prop_assert_eq!(config.timeouts.shutdown_grace_ms, shutdown_ms);
            prop_assert_eq!(config.timeouts.idle_poll_ms, 100);
            prop_assert_eq!(config.monitor.busy_recheck_secs, busy_secs);
            prop_assert_eq!(config.monitor.initial_delay_secs, 2);
        }

        #[test]
        fn prop_env_overrides_min_output_bytes(
            initial in 0u64..1_000_000,
            override_bytes in 0u64..(1u64 << 40),
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[verify]\nmin_output_bytes = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("MKV2MP4_MIN_OUTPUT_BYTES", override_bytes.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.verify.min_output_bytes, override_bytes);
        }

        #[test]
        fn prop_env_overrides_state_file(name in "[a-z]{1,12}\\.json") {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::default();
            env::set_var("MKV2MP4_STATE_FILE", &name);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.paths.state_file, PathBuf::from(&name));
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.tools.ffmpeg_bin, None);
        assert_eq!(config.verify.min_output_bytes, 10 * 1024 * 1024);
        assert_eq!(config.timeouts.cancel_grace_ms, 1000);
        assert_eq!(config.timeouts.shutdown_grace_ms, 5000);
        assert_eq!(config.paths.state_file, PathBuf::from("mkv2mp4_state.json"));
        assert_eq!(config.paths.log_file, PathBuf::from("mkv2mp4.log"));
        assert!(config.monitor.extensions.iter().any(|e| e == "mkv"));
        assert!(!config.monitor.extensions.iter().any(|e| e == "mp4"));
    }

    #[test]
    fn test_invalid_env_override_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("MKV2MP4_MIN_OUTPUT_BYTES", "lots");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.verify.min_output_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/mkv2mp4.toml").expect("defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Config::parse_toml("[verify\nmin_output_bytes = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
