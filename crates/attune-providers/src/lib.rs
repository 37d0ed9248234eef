//! Gemini clients for Attune: unary chat, the bidirectional live dialogue,
//! single-shot speech synthesis, and the shared tool surface.

pub mod chat;
pub mod live;
pub mod tools;
pub mod tts;

pub use chat::{ChatClient, ChatTurn, FunctionCall};
pub use live::{LiveConfig, LiveHandle, LiveLink, ServerEvent};
pub use tools::ToolKind;
pub use tts::TtsClient;
