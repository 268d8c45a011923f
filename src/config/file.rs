//! TOML configuration file loading
//!
//! Supports `~/.config/voxturn/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoxturnConfigFile {
    /// Remote service endpoints
    #[serde(default)]
    pub services: ServicesFileConfig,

    /// Microphone capture options
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Control API options
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Initial readiness gate
    pub start_ready: Option<bool>,
}

/// Remote service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServicesFileConfig {
    /// Speech-to-text endpoint
    pub transcription_url: Option<String>,

    /// Dialogue webhook endpoint
    pub dialogue_url: Option<String>,

    /// Text-to-speech endpoint
    pub synthesis_url: Option<String>,

    /// Sender identity passed to the dialogue service
    pub sender: Option<String>,

    /// Default synthesis language (e.g. "Hindi")
    pub language: Option<String>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Request echo cancellation
    pub echo_cancellation: Option<bool>,

    /// Request noise suppression
    pub noise_suppression: Option<bool>,

    /// Auto-stop ceiling in seconds
    pub max_duration_secs: Option<u64>,
}

/// Control API configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// Control API port
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoxturnConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoxturnConfigFile {
    config_file_path().map_or_else(VoxturnConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> VoxturnConfigFile {
    if !path.exists() {
        return VoxturnConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoxturnConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoxturnConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voxturn/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxturn").join("config.toml"))
}
