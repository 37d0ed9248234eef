use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AttuneError, Result};

/// Lifecycle state of the (at most one) live voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Closing,
}

/// Role of a chat transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the text dialogue transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Counselling-style session note produced by the `write_session_note` tool.
///
/// Field names match the tool-call argument shape on the wire, so this
/// deserializes directly from the model's JSON arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNote {
    #[serde(rename = "dateTimeUTC", default)]
    pub date_time_utc: String,
    #[serde(default)]
    pub presenting_themes: Vec<String>,
    #[serde(default)]
    pub emotions_observed: Vec<String>,
    #[serde(default)]
    pub key_quotes: Vec<String>,
    #[serde(default)]
    pub skills_applied: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub goals_next_steps: Vec<String>,
}

impl SessionNote {
    /// Strict validation of the required fields before a note is stored.
    ///
    /// `dateTimeUTC`, `presentingThemes`, and `summary` are required; a note
    /// missing any of them is rejected rather than archived half-formed.
    pub fn validate(&self) -> Result<()> {
        if self.date_time_utc.trim().is_empty() {
            return Err(AttuneError::Tool("note missing dateTimeUTC".into()));
        }
        if self.presenting_themes.is_empty() {
            return Err(AttuneError::Tool("note missing presentingThemes".into()));
        }
        if self.summary.trim().is_empty() {
            return Err(AttuneError::Tool("note missing summary".into()));
        }
        Ok(())
    }
}

/// Gender category of a synthesis persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Feminine,
    Masculine,
    Neutral,
}

/// Regional accent of a synthesis persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accent {
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "UK")]
    Uk,
}

/// Selected synthesis persona, persisted and read at session-start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSettings {
    pub voice_name: String,
    pub gender: Gender,
    pub accent: Accent,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_name: "Kore".into(),
            gender: Gender::Feminine,
            accent: Accent::Us,
        }
    }
}

/// Static catalog entry for a specialist attunement module.
#[derive(Debug, Clone, Serialize)]
pub struct SpecialistModule {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub instruction: &'static str,
}

/// Static catalog entry for an ambient atmosphere track.
#[derive(Debug, Clone, Serialize)]
pub struct AmbientTrack {
    pub id: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub url: &'static str,
    pub description: &'static str,
}
