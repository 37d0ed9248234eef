//! Gemini live dialogue — bidirectional audio over WebSocket.
//!
//! The socket speaks `BidiGenerateContent`: one setup frame, then realtime
//! input (PCM chunks, facilitator text) upstream and server content (audio,
//! transcription, turn markers, tool calls) downstream. Malformed inbound
//! frames are logged and dropped; the dialogue survives them.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use attune_audio::codec::{MediaChunk, decode_base64_pcm};
use attune_core::error::{AttuneError, Result};

const BIDI_PATH: &str = "/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Everything needed to open a live dialogue.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_instruction: String,
    pub voice_name: String,
}

/// Decoded downstream traffic, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Setup acknowledged; the model is listening.
    Ready,
    /// One chunk of 24 kHz mono synthesis audio.
    Audio(Vec<f32>),
    /// Incremental transcription of the model's speech.
    Transcription(String),
    /// The model finished its spoken turn.
    TurnComplete,
    /// The user barged in; queued playback must be dropped.
    Interrupted,
    /// The model invoked a tool.
    ToolCall {
        id: Option<String>,
        name: String,
        args: Value,
    },
    /// The socket closed, cleanly or not.
    Closed { reason: Option<String> },
}

/// Upstream half of a live dialogue.
///
/// The trait exists so the session loop can be driven against a recording
/// double; [`LiveHandle`] is the socket-backed implementation.
pub trait LiveLink: Send + Sync {
    /// Stream one capture frame to the model.
    fn send_audio(&self, chunk: MediaChunk) -> Result<()>;

    /// Inject out-of-band text (facilitator nudges) into the dialogue.
    fn send_text(&self, text: &str) -> Result<()>;

    /// Answer a tool call.
    fn send_tool_response(&self, id: Option<&str>, name: &str, result: &str) -> Result<()>;

    /// Request a clean shutdown of the socket.
    fn close(&self) -> Result<()>;
}

enum Outbound {
    Frame(String),
    Close,
}

/// Socket-backed [`LiveLink`]. Cheap to clone; all clones feed one socket.
#[derive(Clone)]
pub struct LiveHandle {
    out_tx: mpsc::UnboundedSender<Outbound>,
}

impl LiveHandle {
    fn send(&self, frame: Value) -> Result<()> {
        self.out_tx
            .send(Outbound::Frame(frame.to_string()))
            .map_err(|_| AttuneError::Live("live socket is gone".into()))
    }
}

impl LiveLink for LiveHandle {
    fn send_audio(&self, chunk: MediaChunk) -> Result<()> {
        self.send(json!({ "realtimeInput": { "mediaChunks": [chunk] } }))
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.send(json!({ "realtimeInput": { "text": text } }))
    }

    fn send_tool_response(&self, id: Option<&str>, name: &str, result: &str) -> Result<()> {
        self.send(json!({
            "toolResponse": {
                "functionResponses": [{
                    "id": id,
                    "name": name,
                    "response": { "result": result },
                }]
            }
        }))
    }

    fn close(&self) -> Result<()> {
        self.out_tx
            .send(Outbound::Close)
            .map_err(|_| AttuneError::Live("live socket is gone".into()))
    }
}

/// Open the socket, send setup, and spawn the pump task.
///
/// Downstream events arrive on the returned receiver, ending with
/// [`ServerEvent::Closed`].
pub async fn connect(
    config: &LiveConfig,
) -> Result<(LiveHandle, mpsc::UnboundedReceiver<ServerEvent>)> {
    let url = ws_url(&config.base_url, &config.api_key);
    let redacted = url.split("?key=").next().unwrap_or(&url);
    info!(model = %config.model, url = redacted, "opening live dialogue");

    let (mut ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| AttuneError::Live(format!("connect: {e}")))?;

    let setup = build_setup(config);
    ws.send(Message::text(setup.to_string()))
        .await
        .map_err(|e| AttuneError::Live(format!("setup: {e}")))?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        let close_reason = loop {
            tokio::select! {
                outbound = out_rx.recv() => match outbound {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = ws.send(Message::text(text)).await {
                            break Some(format!("send failed: {e}"));
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws.close(None).await;
                        break None;
                    }
                },
                inbound = ws.next() => match inbound {
                    Some(Ok(message)) => {
                        let text = match message {
                            Message::Text(text) => text.to_string(),
                            Message::Binary(bytes) => {
                                match String::from_utf8(bytes.to_vec()) {
                                    Ok(text) => text,
                                    Err(_) => {
                                        warn!("dropping non-UTF8 binary frame");
                                        continue;
                                    }
                                }
                            }
                            Message::Close(frame) => {
                                break frame.map(|f| f.reason.to_string());
                            }
                            _ => continue,
                        };
                        for event in decode_server_frame(&text) {
                            if event_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                },
            }
        };
        debug!(reason = ?close_reason, "live socket closed");
        let _ = event_tx.send(ServerEvent::Closed {
            reason: close_reason,
        });
    });

    Ok((LiveHandle { out_tx }, event_rx))
}

fn ws_url(base_url: &str, api_key: &str) -> String {
    let host = base_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{host}{BIDI_PATH}?key={api_key}")
}

/// The one-time setup frame: audio responses, the selected persona voice,
/// both tools, and output transcription enabled.
fn build_setup(config: &LiveConfig) -> Value {
    json!({
        "setup": {
            "model": format!("models/{}", config.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name }
                    }
                },
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_instruction }]
            },
            "tools": crate::tools::declarations(),
            "outputAudioTranscription": {},
        }
    })
}

// --- Downstream wire types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    tool_call: Option<ToolCallMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    output_transcription: Option<OutputTranscription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<TurnPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurnPart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct OutputTranscription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallMessage {
    #[serde(default)]
    function_calls: Vec<ServerFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct ServerFunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

/// Decode one downstream frame into events. Frames that fail to parse, and
/// audio payloads that fail to decode, are dropped with a warning.
fn decode_server_frame(text: &str) -> Vec<ServerEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "dropping malformed live frame");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(ServerEvent::Ready);
    }

    if let Some(tool_call) = message.tool_call {
        for fc in tool_call.function_calls {
            events.push(ServerEvent::ToolCall {
                id: fc.id,
                name: fc.name,
                args: fc.args,
            });
        }
    }

    if let Some(content) = message.server_content {
        if let Some(transcription) = content.output_transcription {
            if !transcription.text.is_empty() {
                events.push(ServerEvent::Transcription(transcription.text));
            }
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(inline) = part.inline_data else {
                    continue;
                };
                match decode_base64_pcm(&inline.data) {
                    Ok(samples) if !samples.is_empty() => {
                        events.push(ServerEvent::Audio(samples));
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "dropping undecodable audio chunk"),
                }
            }
        }
        // Interruption first so playback is flushed before the turn marker
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use attune_audio::codec::samples_to_pcm16;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;

    fn config() -> LiveConfig {
        LiveConfig {
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: "k-test".into(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            system_instruction: "Hold space.".into(),
            voice_name: "Kore".into(),
        }
    }

    #[test]
    fn test_ws_url() {
        let url = ws_url("https://generativelanguage.googleapis.com/", "k-test");
        assert_eq!(
            url,
            "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key=k-test"
        );
    }

    #[test]
    fn test_setup_frame_shape() {
        let setup = build_setup(&config());
        let inner = &setup["setup"];
        assert_eq!(
            inner["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(inner["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            inner["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert!(inner["tools"][0]["functionDeclarations"].is_array());
        assert!(inner["outputAudioTranscription"].is_object());
    }

    #[test]
    fn test_decode_setup_complete() {
        let events = decode_server_frame(r#"{"setupComplete":{}}"#);
        assert_eq!(events, vec![ServerEvent::Ready]);
    }

    #[test]
    fn test_decode_audio_and_turn_markers() {
        let data = BASE64.encode(samples_to_pcm16(&[0.5, -0.5]));
        let frame = format!(
            r#"{{"serverContent":{{
                "modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{data}"}}}}]}},
                "outputTranscription":{{"text":"hello"}},
                "turnComplete":true
            }}}}"#
        );
        let events = decode_server_frame(&frame);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ServerEvent::Transcription("hello".into()));
        match &events[1] {
            ServerEvent::Audio(samples) => assert_eq!(samples.len(), 2),
            other => panic!("expected audio, got {other:?}"),
        }
        assert_eq!(events[2], ServerEvent::TurnComplete);
    }

    #[test]
    fn test_decode_interrupted_precedes_turn_complete() {
        let events =
            decode_server_frame(r#"{"serverContent":{"interrupted":true,"turnComplete":true}}"#);
        assert_eq!(
            events,
            vec![ServerEvent::Interrupted, ServerEvent::TurnComplete]
        );
    }

    #[test]
    fn test_decode_tool_call() {
        let frame = r#"{"toolCall":{"functionCalls":[
            {"id":"fc-1","name":"play_bell","args":{}}
        ]}}"#;
        let events = decode_server_frame(frame);
        assert_eq!(
            events,
            vec![ServerEvent::ToolCall {
                id: Some("fc-1".into()),
                name: "play_bell".into(),
                args: json!({}),
            }]
        );
    }

    #[test]
    fn test_malformed_frame_dropped() {
        assert!(decode_server_frame("{not json").is_empty());
        // Well-formed JSON with nothing recognizable also yields no events
        assert!(decode_server_frame(r#"{"unexpected":1}"#).is_empty());
    }

    #[test]
    fn test_corrupt_audio_dropped_but_markers_survive() {
        let frame = r#"{"serverContent":{
            "modelTurn":{"parts":[{"inlineData":{"data":"!!!"}}]},
            "turnComplete":true
        }}"#;
        let events = decode_server_frame(frame);
        assert_eq!(events, vec![ServerEvent::TurnComplete]);
    }
}
