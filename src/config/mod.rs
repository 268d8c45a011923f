//! Configuration management for voxturn
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `VOXTURN_*`
//! environment variables. CLI flags are applied on top by the binary.

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::controller::ControllerSettings;
use crate::pipeline::PipelineSettings;
use crate::voice::{CaptureConstraints, DEFAULT_SAMPLE_RATE, MAX_CAPTURE_DURATION};
use crate::{Error, Result};

use file::VoxturnConfigFile;

/// Default control API port
pub const DEFAULT_PORT: u16 = 18800;

/// voxturn configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Remote service endpoints
    pub services: ServiceConfig,

    /// Microphone capture options
    pub capture: CaptureConfig,

    /// Control API configuration
    pub api: ApiServerConfig,

    /// Initial readiness gate
    pub start_ready: bool,
}

/// Remote service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Speech-to-text endpoint (multipart upload)
    pub transcription_url: String,

    /// Dialogue webhook endpoint
    pub dialogue_url: String,

    /// Text-to-speech endpoint
    pub synthesis_url: String,

    /// Sender identity passed to the dialogue service
    pub sender: String,

    /// Default synthesis language
    pub language: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            transcription_url: "http://localhost:3001/transcribe/".to_string(),
            dialogue_url: "http://localhost:5005/webhooks/rest/webhook".to_string(),
            synthesis_url: "http://localhost:5050/speak/".to_string(),
            sender: "test_user".to_string(),
            language: "Hindi".to_string(),
        }
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Request echo cancellation
    pub echo_cancellation: bool,

    /// Request noise suppression
    pub noise_suppression: bool,

    /// Auto-stop ceiling
    pub max_duration: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            echo_cancellation: true,
            noise_suppression: true,
            max_duration: MAX_CAPTURE_DURATION,
        }
    }
}

/// HTTP control API configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: ServiceConfig::default(),
            capture: CaptureConfig::default(),
            api: ApiServerConfig::default(),
            start_ready: true,
        }
    }
}

impl Config {
    /// Load configuration from the standard file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::from_lookup(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Load configuration from an explicit file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::from_lookup(file::load_config_from(path), |key| std::env::var(key).ok())
    }

    /// Merge defaults, a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or out of range
    pub fn from_lookup(
        file: VoxturnConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let services = ServiceConfig {
            transcription_url: env("VOXTURN_TRANSCRIPTION_URL")
                .or(file.services.transcription_url)
                .unwrap_or(defaults.services.transcription_url),
            dialogue_url: env("VOXTURN_DIALOGUE_URL")
                .or(file.services.dialogue_url)
                .unwrap_or(defaults.services.dialogue_url),
            synthesis_url: env("VOXTURN_SYNTHESIS_URL")
                .or(file.services.synthesis_url)
                .unwrap_or(defaults.services.synthesis_url),
            sender: env("VOXTURN_SENDER")
                .or(file.services.sender)
                .unwrap_or(defaults.services.sender),
            language: env("VOXTURN_LANGUAGE")
                .or(file.services.language)
                .unwrap_or(defaults.services.language),
        };

        let sample_rate = match env("VOXTURN_SAMPLE_RATE") {
            Some(raw) => parse_env("VOXTURN_SAMPLE_RATE", &raw)?,
            None => file.capture.sample_rate.unwrap_or(defaults.capture.sample_rate),
        };

        let max_duration = match env("VOXTURN_MAX_CAPTURE_SECS") {
            Some(raw) => Duration::from_secs(parse_env("VOXTURN_MAX_CAPTURE_SECS", &raw)?),
            None => file
                .capture
                .max_duration_secs
                .map_or(defaults.capture.max_duration, Duration::from_secs),
        };

        let capture = CaptureConfig {
            sample_rate,
            echo_cancellation: file
                .capture
                .echo_cancellation
                .unwrap_or(defaults.capture.echo_cancellation),
            noise_suppression: file
                .capture
                .noise_suppression
                .unwrap_or(defaults.capture.noise_suppression),
            max_duration,
        };

        let port = match env("VOXTURN_PORT") {
            Some(raw) => parse_env("VOXTURN_PORT", &raw)?,
            None => file.api.port.unwrap_or(defaults.api.port),
        };

        let start_ready = env("VOXTURN_START_READY").map_or_else(
            || file.start_ready.unwrap_or(defaults.start_ready),
            |v| v == "1" || v.eq_ignore_ascii_case("true"),
        );

        let config = Self {
            services,
            capture,
            api: ApiServerConfig { port },
            start_ready,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would only fail later at runtime
    ///
    /// # Errors
    ///
    /// Returns `Config` error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("transcription_url", &self.services.transcription_url),
            ("dialogue_url", &self.services.dialogue_url),
            ("synthesis_url", &self.services.synthesis_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!("{name} must be an http(s) URL, got {url:?}")));
            }
        }

        if self.services.sender.trim().is_empty() {
            return Err(Error::Config("sender must not be empty".to_string()));
        }
        if self.capture.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if self.capture.max_duration.is_zero() {
            return Err(Error::Config("max capture duration must be positive".to_string()));
        }

        Ok(())
    }

    /// Controller settings derived from this configuration
    #[must_use]
    pub const fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            constraints: CaptureConstraints {
                echo_cancellation: self.capture.echo_cancellation,
                noise_suppression: self.capture.noise_suppression,
                sample_rate: self.capture.sample_rate,
            },
            max_capture: self.capture.max_duration,
            start_ready: self.start_ready,
        }
    }

    /// Pipeline settings derived from this configuration
    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            sender: self.services.sender.clone(),
            language: self.services.language.clone(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has invalid value {raw:?}")))
}
