//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Defaults applied to every composition run.
    pub composition: CompositionDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default composition parameters and engine pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionDefaults {
    /// Output frame rate for video sources.
    pub frame_rate: u32,

    /// Key-frame interval (seconds) for video sources.
    pub key_frame_interval_secs: u32,

    /// Audio bitrate used when audio is re-encoded.
    pub audio_bitrate: u32,

    /// AAC object type used when audio is re-encoded (2 = AAC-LC).
    pub aac_profile: u32,

    /// Sleep applied when no composer made progress in a loop iteration.
    pub idle_sleep_ms: u64,

    /// Loop iterations between two progress reports.
    pub progress_interval_steps: u32,

    /// Length of the clip generated from a still image.
    pub still_image_duration_ms: u64,

    /// Frame rate of the clip generated from a still image.
    pub still_image_frame_rate: u32,

    /// Encoder bitrate for still-image clips.
    pub still_image_bitrate: u32,

    /// Key-frame interval (seconds) for still-image clips.
    pub still_image_key_frame_interval_secs: u32,

    /// Output size used for still images when nothing else is known.
    pub fallback_width: u32,
    pub fallback_height: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "recompose_engine=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for CompositionDefaults {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            key_frame_interval_secs: 1,
            audio_bitrate: 128_000,
            aac_profile: 2,
            idle_sleep_ms: 10,
            progress_interval_steps: 10,
            still_image_duration_ms: 5_000,
            still_image_frame_rate: 20,
            still_image_bitrate: 2_000_000,
            still_image_key_frame_interval_secs: 5,
            fallback_width: 480,
            fallback_height: 720,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("recompose").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{ "composition": { "frame_rate": 25 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.composition.frame_rate, 25);
        assert_eq!(config.composition.idle_sleep_ms, 10);
        assert_eq!(config.composition.still_image_frame_rate, 20);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load_from(std::path::Path::new(
            "/nonexistent/recompose/config.json",
        ));
        assert_eq!(config.composition.progress_interval_steps, 10);
        assert_eq!(config.composition.still_image_duration_ms, 5_000);
    }
}
