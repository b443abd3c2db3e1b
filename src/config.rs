//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment overrides (HOST, PORT, HOST_NAME)
//! 2. Environment variables (APP_SERVER_HOST, APP_AUDIO_ROOT_DIR, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub transcode: TranscodeConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to
/// - `port`: TCP port number to listen on
/// - `public_host`: externally reachable base URL, used to build the
///   `eventUrl` embedded in NCCO documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_host: String,
}

/// Audio streaming configuration.
///
/// ## Fields:
/// - `root_dir`: the audio root - the single directory all streamable
///   resources are confined to
/// - `default_sample_rate`: transcode/pacing rate when the resource name
///   carries no rate hint (telephony narrowband, 8000 Hz)
/// - `chunk_duration_ms`: target wall-clock duration of one streamed chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub root_dir: String,
    pub default_sample_rate: u32,
    pub chunk_duration_ms: u64,
}

/// External encoder configuration.
///
/// ## Fields:
/// - `encoder_path`: the encoder binary invoked for compressed sources
/// - `timeout_secs`: hard wall-clock limit for one encoder run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    pub encoder_path: String,
    pub timeout_secs: u64,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of concurrent playback sessions before new
    /// connections are refused.
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                public_host: "http://localhost:8000".to_string(),
            },
            audio: AudioConfig {
                root_dir: "audio_files".to_string(),
                default_sample_rate: 8000,
                chunk_duration_ms: 20,
            },
            transcode: TranscodeConfig {
                encoder_path: "ffmpeg".to_string(),
                timeout_secs: 60,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: override server host
    /// - `APP_AUDIO_ROOT_DIR=/srv/audio`: override the audio root
    /// - `APP_TRANSCODE_TIMEOUT_SECS=30`: override the encoder limit
    /// - `HOST`/`PORT`/`HOST_NAME`: deployment-platform overrides that
    ///   don't follow the APP_ prefix convention
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(public_host) = env::var("HOST_NAME") {
            settings = settings.set_override("server.public_host", public_host)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching bad values here prevents a session from ever seeing a zero
    /// pacing rate or an unbounded encoder run.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.root_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Audio root directory cannot be empty"));
        }

        if self.audio.default_sample_rate == 0 {
            return Err(anyhow::anyhow!("Default sample rate must be greater than 0"));
        }

        if self.audio.chunk_duration_ms == 0 {
            return Err(anyhow::anyhow!("Chunk duration must be greater than 0"));
        }

        if self.transcode.encoder_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Encoder path cannot be empty"));
        }

        if self.transcode.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Transcode timeout must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config
    /// updates via the API).
    ///
    /// Only the fields present in the JSON are touched, e.g.
    /// `{"audio": {"root_dir": "/srv/audio"}}` changes nothing else. The
    /// updated configuration is re-validated before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
            if let Some(public_host) = server.get("public_host").and_then(|v| v.as_str()) {
                self.server.public_host = public_host.to_string();
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(root_dir) = audio.get("root_dir").and_then(|v| v.as_str()) {
                self.audio.root_dir = root_dir.to_string();
            }
            if let Some(rate) = audio.get("default_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.default_sample_rate = rate as u32;
            }
            if let Some(duration) = audio.get("chunk_duration_ms").and_then(|v| v.as_u64()) {
                self.audio.chunk_duration_ms = duration;
            }
        }

        if let Some(transcode) = partial_config.get("transcode") {
            if let Some(encoder) = transcode.get("encoder_path").and_then(|v| v.as_str()) {
                self.transcode.encoder_path = encoder.to_string();
            }
            if let Some(timeout) = transcode.get("timeout_secs").and_then(|v| v.as_u64()) {
                self.transcode.timeout_secs = timeout;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
