//! Configuration loading and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AttuneError, Result};

/// Default environment variable holding the Gemini API key.
const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Top-level Attune configuration, read from `~/.attune/config.json` (JSON5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,

    #[serde(default)]
    pub voice: VoiceConfig,
}

/// Gemini provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,
}

/// Tunables for the voice session, kept as explicit overridable
/// configuration rather than buried constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Seconds of detected silence before a wind-down nudge is sent.
    #[serde(default = "default_idle_nudge_secs")]
    pub idle_nudge_secs: u64,

    /// Peak amplitude above which a capture frame counts as voice activity.
    #[serde(default = "default_activity_threshold")]
    pub activity_threshold: f32,

    /// Samples per capture frame at 16 kHz (~256 ms at the default).
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
}

fn default_idle_nudge_secs() -> u64 {
    10
}

fn default_activity_threshold() -> f32 {
    0.05
}

fn default_frame_samples() -> usize {
    4096
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            idle_nudge_secs: default_idle_nudge_secs(),
            activity_threshold: default_activity_threshold(),
            frame_samples: default_frame_samples(),
        }
    }
}

impl Config {
    /// Default config file location: `~/.attune/config.json`.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Load configuration from the given path, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        json5::from_str(&data).map_err(|e| AttuneError::Config(format!("{}: {e}", path.display())))
    }

    /// Resolve the Gemini API key: explicit config field first, then the
    /// configured (or default) environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        let provider = self.provider.as_ref();
        if let Some(key) = provider.and_then(|p| p.api_key.clone()) {
            return Some(key);
        }
        let env_name = provider
            .and_then(|p| p.api_key_env.as_deref())
            .unwrap_or(API_KEY_ENV);
        std::env::var(env_name).ok()
    }

    pub fn base_url(&self) -> &str {
        self.provider
            .as_ref()
            .and_then(|p| p.base_url.as_deref())
            .unwrap_or("https://generativelanguage.googleapis.com")
    }

    pub fn chat_model(&self) -> &str {
        self.provider
            .as_ref()
            .and_then(|p| p.chat_model.as_deref())
            .unwrap_or("gemini-3-pro-preview")
    }

    pub fn live_model(&self) -> &str {
        self.provider
            .as_ref()
            .and_then(|p| p.live_model.as_deref())
            .unwrap_or("gemini-2.5-flash-native-audio-preview-09-2025")
    }

    pub fn tts_model(&self) -> &str {
        self.provider
            .as_ref()
            .and_then(|p| p.tts_model.as_deref())
            .unwrap_or("gemini-2.5-flash-preview-tts")
    }
}

/// Data directory: `~/.attune/`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".attune")
}
