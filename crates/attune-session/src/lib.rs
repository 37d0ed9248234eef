//! Session orchestration for Attune: the live voice state machine and the
//! text dialogue pipeline, both sharing the tool surface and profile store.

pub mod chat;
pub mod voice;

pub use chat::{ChatProvider, ChatReply, ChatSession};
pub use voice::{IDLE_NUDGE_TEXT, IdleMonitor, SessionEvent, VoiceController};
