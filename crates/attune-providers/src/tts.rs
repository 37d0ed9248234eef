//! Single-shot speech synthesis, used for the voice preview in settings.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use attune_audio::codec::decode_base64_pcm;
use attune_core::error::{AttuneError, Result};

pub struct TtsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    #[serde(default)]
    candidates: Vec<TtsCandidate>,
}

#[derive(Debug, Deserialize)]
struct TtsCandidate {
    #[serde(default)]
    content: Option<TtsContent>,
}

#[derive(Debug, Deserialize)]
struct TtsContent {
    #[serde(default)]
    parts: Vec<TtsPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TtsPart {
    #[serde(default)]
    inline_data: Option<TtsInlineData>,
}

#[derive(Debug, Deserialize)]
struct TtsInlineData {
    #[serde(default)]
    data: String,
}

impl TtsClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Synthesize `text` in the given persona voice, returning 24 kHz mono
    /// samples ready for the playback scheduler.
    pub async fn synthesize(&self, text: &str, voice_name: &str) -> Result<Vec<f32>> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice_name }
                    }
                },
            },
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        debug!(model = %self.model, voice = voice_name, "synthesizing preview");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AttuneError::Provider(format!("tts request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AttuneError::Provider(format!("tts API {status}: {body}")));
        }

        let parsed: TtsResponse = response
            .json()
            .await
            .map_err(|e| AttuneError::Provider(format!("tts response: {e}")))?;

        extract_audio(parsed)
    }
}

fn extract_audio(response: TtsResponse) -> Result<Vec<f32>> {
    let data = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().find_map(|p| p.inline_data))
        .map(|d| d.data)
        .ok_or_else(|| AttuneError::Provider("tts response held no audio".into()))?;
    decode_base64_pcm(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attune_audio::codec::samples_to_pcm16;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;

    #[test]
    fn test_extract_audio() {
        let data = BASE64.encode(samples_to_pcm16(&[0.25; 8]));
        let json = format!(
            r#"{{"candidates":[{{"content":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{data}"}}}}]}}}}]}}"#
        );
        let response: TtsResponse = serde_json::from_str(&json).unwrap();
        let samples = extract_audio(response).unwrap();
        assert_eq!(samples.len(), 8);
    }

    #[test]
    fn test_extract_audio_missing() {
        let response: TtsResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(extract_audio(response).is_err());
    }
}
