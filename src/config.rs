//! Application configuration
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty or missing file yields a working setup for local testing.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub synthesizer: SynthesizerConfig,
}

/// HTTP / media stream listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: String,
    /// Port for both the WebSocket endpoint and the control API
    pub http_port: u16,
    /// Path the telephony provider connects its media stream to
    pub media_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            media_path: "/media".to_string(),
        }
    }
}

/// Playback pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long an acknowledgment may wait for its in-flight chunk before
    /// the stream is declared out of sync
    pub ack_wait_timeout_ms: u64,
    /// Target size of each synthesized chunk in bytes
    pub chunk_size: usize,
    /// Optional greeting spoken when a stream starts
    pub greeting: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ack_wait_timeout_ms: DEFAULT_ACK_WAIT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            greeting: None,
        }
    }
}

/// ElevenLabs synthesizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// API key; falls back to `ELEVEN_LABS_API_KEY`
    pub api_key: Option<String>,
    pub voice_id: String,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: DEFAULT_VOICE_ID.to_string(),
            stability: None,
            similarity_boost: None,
            base_url: ELEVEN_LABS_BASE_URL.to_string(),
            timeout_secs: DEFAULT_SYNTHESIS_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "telephony-audio-out")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the platform default location.
    ///
    /// A missing default file is not an error; defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default().with_env()),
            },
        };

        if !explicit && !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default().with_env());
        }

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(Self::from_toml(&text)?.with_env())
    }

    /// Fill unset secrets from the environment
    pub fn with_env(mut self) -> Self {
        if self.synthesizer.api_key.is_none() {
            self.synthesizer.api_key = std::env::var("ELEVEN_LABS_API_KEY").ok();
        }
        self
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.ack_wait_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.ack_wait_timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.pipeline.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.chunk_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if !self.server.media_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "server.media_path",
                message: format!("'{}' must start with '/'", self.server.media_path),
            });
        }
        Ok(())
    }
}
