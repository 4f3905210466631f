//! Bootstrap configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MELO_CONFIG`)
//! 3. Per-user config file (`<config_dir>/melo/config.toml`)
//! 4. Built-in defaults (fallback, no file)
//!
//! Every field carries a serde default, so a partial file only overrides
//! what it names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MELO_CONFIG";

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub interview: InterviewConfig,

    #[serde(default)]
    pub ambience: AmbienceConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub audio: AudioConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Turn-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// Speaker name used for interviewer lines in the transcript
    #[serde(default = "default_interviewer_name")]
    pub interviewer_name: String,

    /// Case-insensitive input that ends the interview
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    /// Consecutive answer-collection failures tolerated before ending the session
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            interviewer_name: default_interviewer_name(),
            sentinel: default_sentinel(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Background ambience settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbienceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 1-based participant answer that first triggers ambience selection
    #[serde(default = "default_trigger_answer")]
    pub trigger_answer: usize,

    /// Re-select ambience every N answers after the trigger (0 = once)
    #[serde(default)]
    pub refresh_every: usize,

    /// Preview URLs kept per detected keyword
    #[serde(default = "default_previews_per_keyword")]
    pub previews_per_keyword: usize,

    /// Minimum wait in `stop()` for the loop to observe cancellation
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// Upper bound on the drain before the loop task is aborted
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Pause between consecutive clips
    #[serde(default = "default_inter_clip_gap_ms")]
    pub inter_clip_gap_ms: u64,

    /// Pause after a clip fails before picking the next one
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
}

impl Default for AmbienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_answer: default_trigger_answer(),
            refresh_every: 0,
            previews_per_keyword: default_previews_per_keyword(),
            grace_ms: default_grace_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            inter_clip_gap_ms: default_inter_clip_gap_ms(),
            failure_backoff_ms: default_failure_backoff_ms(),
        }
    }
}

/// Similarity metric name as written in TOML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricName {
    #[default]
    Cosine,
    Euclidean,
}

/// Track matching settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub metric: MetricName,

    /// Restrict candidates to tracks tagged with the dominant emotion
    #[serde(default = "default_true")]
    pub filter_by_dominant: bool,

    /// JSON catalog file; built-in catalog when absent
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Play the overall best track's preview when the interview ends
    #[serde(default)]
    pub play_final_track: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            metric: MetricName::Cosine,
            filter_by_dominant: true,
            catalog_path: None,
            play_final_track: false,
        }
    }
}

/// Remote collaborator endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Emotion/NER analysis endpoint; neutral analysis when absent
    #[serde(default)]
    pub analysis_url: Option<String>,

    /// Memoir generation endpoint; no memoir is written when absent
    #[serde(default)]
    pub memoir_url: Option<String>,

    /// Speech-to-text endpoint; spoken answers are unavailable when absent
    #[serde(default)]
    pub transcription_url: Option<String>,

    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,

    /// Timeout applied to every outbound request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            analysis_url: None,
            memoir_url: None,
            transcription_url: None,
            search_base_url: default_search_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Sound device settings for playback and spoken answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Open the output device; decoded audio is discarded when false
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Output device name (None = system default)
    #[serde(default)]
    pub output_device: Option<String>,

    /// Microphone device name (None = system default)
    #[serde(default)]
    pub input_device: Option<String>,

    /// Master volume (0.0-1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Output ring buffer capacity
    #[serde(default = "default_output_buffer_ms")]
    pub output_buffer_ms: u64,

    /// Room noise sampled before listening to set the speech threshold
    #[serde(default = "default_calibration_ms")]
    pub calibration_ms: u64,

    /// Trailing silence that ends a spoken answer
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,

    /// Longest spoken answer recorded
    #[serde(default = "default_max_phrase_ms")]
    pub max_phrase_ms: u64,

    /// Give up when no speech starts within this window
    #[serde(default = "default_listen_timeout_ms")]
    pub listen_timeout_ms: u64,

    /// RMS floor for speech detection in a quiet room
    #[serde(default = "default_min_energy")]
    pub min_energy: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_device: None,
            input_device: None,
            volume: default_volume(),
            output_buffer_ms: default_output_buffer_ms(),
            calibration_ms: default_calibration_ms(),
            pause_ms: default_pause_ms(),
            max_phrase_ms: default_max_phrase_ms(),
            listen_timeout_ms: default_listen_timeout_ms(),
            min_energy: default_min_energy(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interviewer_name() -> String {
    "Melo".to_string()
}

fn default_sentinel() -> String {
    "DONE".to_string()
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_trigger_answer() -> usize {
    1
}

fn default_previews_per_keyword() -> usize {
    3
}

fn default_grace_ms() -> u64 {
    200
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

fn default_inter_clip_gap_ms() -> u64 {
    100
}

fn default_failure_backoff_ms() -> u64 {
    500
}

fn default_search_base_url() -> String {
    "https://api.deezer.com".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_volume() -> f32 {
    1.0
}

fn default_output_buffer_ms() -> u64 {
    2000
}

fn default_calibration_ms() -> u64 {
    1000
}

fn default_pause_ms() -> u64 {
    800
}

fn default_max_phrase_ms() -> u64 {
    30_000
}

fn default_listen_timeout_ms() -> u64 {
    10_000
}

fn default_min_energy() -> f32 {
    0.01
}

impl TomlConfig {
    /// Parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        let config = Self::parse(&content)?;
        info!("Loaded TOML configuration from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Resolve and load, falling back to built-in defaults when no file exists
    ///
    /// An explicitly named file (CLI or environment) that cannot be read is an
    /// error; a missing per-user file is not.
    pub fn load_resolved(cli_arg: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_arg {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::load(Path::new(&path));
            }
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Per-user configuration file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("melo").join("config.toml"))
}

/// Serialize configuration to TOML text
pub fn to_toml_string(config: &TomlConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize TOML: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.interview.sentinel, "DONE");
        assert_eq!(config.interview.interviewer_name, "Melo");
        assert_eq!(config.ambience.grace_ms, 200);
        assert_eq!(config.ambience.previews_per_keyword, 3);
        assert_eq!(config.ambience.trigger_answer, 1);
        assert_eq!(config.matching.metric, MetricName::Cosine);
        assert!(config.matching.filter_by_dominant);
        assert_eq!(config.services.search_base_url, "https://api.deezer.com");
        assert!(config.services.transcription_url.is_none());
        assert!(config.audio.enabled);
        assert_eq!(config.audio.volume, 1.0);
        assert_eq!(config.audio.pause_ms, 800);
    }

    #[test]
    fn test_audio_section() {
        let config = TomlConfig::parse(
            r#"
            [audio]
            output_device = "USB Speakers"
            volume = 0.5

            [services]
            transcription_url = "http://localhost:9000/transcribe"
            "#,
        )
        .unwrap();
        assert_eq!(config.audio.output_device.as_deref(), Some("USB Speakers"));
        assert_eq!(config.audio.volume, 0.5);
        assert!(config.audio.input_device.is_none());
        assert_eq!(config.audio.max_phrase_ms, 30_000);
        assert_eq!(
            config.services.transcription_url.as_deref(),
            Some("http://localhost:9000/transcribe")
        );
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = TomlConfig::parse("").unwrap();
        assert_eq!(config, TomlConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TomlConfig::parse(
            r#"
            [matching]
            metric = "euclidean"

            [ambience]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.metric, MetricName::Euclidean);
        assert!(config.matching.filter_by_dominant);
        assert!(!config.ambience.enabled);
        assert_eq!(config.ambience.drain_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::parse("[matching\nmetric = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
