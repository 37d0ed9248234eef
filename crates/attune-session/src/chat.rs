//! Text dialogue pipeline — transcript, provider round-trip, and note
//! archival.

use async_trait::async_trait;
use tracing::{info, warn};

use attune_core::error::Result;
use attune_core::modules::compose_system_instruction;
use attune_core::store::ProfileStore;
use attune_core::types::{ChatMessage, SessionNote};
use attune_providers::chat::{ChatClient, ChatTurn};
use attune_providers::tools::{self, ToolKind};

/// Seam over the chat endpoint so the pipeline can be exercised without a
/// network.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn send(&self, history: &[ChatMessage], system_instruction: &str) -> Result<ChatTurn>;
}

#[async_trait]
impl ChatProvider for ChatClient {
    async fn send(&self, history: &[ChatMessage], system_instruction: &str) -> Result<ChatTurn> {
        ChatClient::send(self, history, system_instruction).await
    }
}

/// What one exchange produced, for the UI to render.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub text: Option<String>,
    pub archived_notes: Vec<SessionNote>,
}

/// An in-memory text conversation. The transcript lives for the life of the
/// session; only notes are persisted.
pub struct ChatSession<P> {
    provider: P,
    store: ProfileStore,
    history: Vec<ChatMessage>,
    system_instruction: String,
}

impl<P: ChatProvider> ChatSession<P> {
    /// Build a session with the instruction composed from the stored profile.
    pub async fn open(provider: P, store: ProfileStore) -> Self {
        let active_modules = store.load_active_modules().await;
        let display_name = store.load_display_name().await;
        let system_instruction =
            compose_system_instruction(&active_modules, display_name.as_deref());
        Self {
            provider,
            store,
            history: Vec::new(),
            system_instruction,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Send one user message and fold the model's turn into the transcript.
    ///
    /// A provider error leaves the user's message in the transcript so a
    /// retry reads naturally.
    pub async fn send(&mut self, text: &str) -> Result<ChatReply> {
        self.history.push(ChatMessage::user(text));
        let turn = self
            .provider
            .send(&self.history, &self.system_instruction)
            .await?;

        let mut reply = ChatReply::default();

        if let Some(text) = turn.text {
            self.history.push(ChatMessage::assistant(text.as_str()));
            reply.text = Some(text);
        }

        for call in turn.tool_calls {
            match tools::resolve(&call.name, &call.args) {
                Ok(ToolKind::WriteNote(note)) => {
                    self.store.add_note(note.clone()).await?;
                    info!(themes = ?note.presenting_themes, "session note archived from chat");
                    reply.archived_notes.push(note);
                }
                Ok(ToolKind::RingBell) => {
                    // The bell is a voice-room gesture; text chat has no room
                    warn!("ignoring bell tool call in text chat");
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "rejected tool call in chat");
                }
            }
        }

        Ok(reply)
    }
}
