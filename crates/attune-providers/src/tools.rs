//! Tool declarations and tool-call resolution.
//!
//! Both pipelines expose the same two tools: `writesessionnote` archives a
//! counselling-style note, `play_bell` rings the meditation bell. Resolution
//! happens at the message boundary so malformed arguments are rejected before
//! they reach the session loop.

use serde_json::{Value, json};

use attune_core::error::{AttuneError, Result};
use attune_core::types::SessionNote;

pub const WRITE_NOTE_TOOL: &str = "writesessionnote";
pub const RING_BELL_TOOL: &str = "play_bell";

/// A tool call decoded and validated into its domain action.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolKind {
    WriteNote(SessionNote),
    RingBell,
}

/// Resolve a raw function call into a [`ToolKind`].
///
/// Unknown tool names and note payloads failing validation are errors; the
/// caller reports failure back to the model instead of acting.
pub fn resolve(name: &str, args: &Value) -> Result<ToolKind> {
    match name {
        WRITE_NOTE_TOOL => {
            let payload = args
                .get("json")
                .ok_or_else(|| AttuneError::Tool("note call missing `json` argument".into()))?;
            let note: SessionNote = serde_json::from_value(payload.clone())
                .map_err(|e| AttuneError::Tool(format!("malformed note payload: {e}")))?;
            note.validate()?;
            Ok(ToolKind::WriteNote(note))
        }
        RING_BELL_TOOL => Ok(ToolKind::RingBell),
        other => Err(AttuneError::Tool(format!("unknown tool: {other}"))),
    }
}

/// Declarations for the text pipeline: notes only, the bell is a voice-room
/// gesture.
pub fn chat_declarations() -> Value {
    let mut all = declarations();
    let fns = &mut all[0]["functionDeclarations"];
    *fns = Value::Array(vec![fns[0].clone()]);
    all
}

/// Function declarations in Gemini's `functionDeclarations` shape, shared by
/// the chat endpoint and the live setup message.
pub fn declarations() -> Value {
    json!([{
        "functionDeclarations": [
            {
                "name": WRITE_NOTE_TOOL,
                "description": "Create a concise, counselling-style session note \
                                based on the last exchange.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "json": {
                            "type": "OBJECT",
                            "properties": {
                                "dateTimeUTC": { "type": "STRING" },
                                "presentingThemes": { "type": "ARRAY", "items": { "type": "STRING" } },
                                "emotionsObserved": { "type": "ARRAY", "items": { "type": "STRING" } },
                                "keyQuotes": { "type": "ARRAY", "items": { "type": "STRING" } },
                                "skillsApplied": { "type": "ARRAY", "items": { "type": "STRING" } },
                                "summary": { "type": "STRING" },
                                "goalsNextSteps": { "type": "ARRAY", "items": { "type": "STRING" } }
                            },
                            "required": ["dateTimeUTC", "presentingThemes", "summary"]
                        }
                    },
                    "required": ["json"]
                }
            },
            {
                "name": RING_BELL_TOOL,
                "description": "Rings the meditation bell to signify the end of a \
                                share duration.",
                "parameters": { "type": "OBJECT", "properties": {} }
            }
        ]
    }])
}
