use serde::{Deserialize, Serialize};

/// Inbound chat-network event, as produced by a transport adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    /// The server accepted our registration; channels can be joined now.
    Registered,
    /// We joined `channel`.
    Joined { channel: String },
    Message {
        channel: String,
        sender: Option<String>,
        text: String,
    },
    Disconnected { reason: String },
}

/// One turn of a structured conversation (`{"role": ..., "content": ...}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Only user and assistant turns are forwarded to the chat channel.
    pub fn is_relayed(&self) -> bool {
        matches!(self.role.as_str(), "user" | "assistant")
    }

    pub fn to_chat_line(&self) -> String {
        format!("[{}] {}", self.role, self.content)
    }
}

/// Conversation payload as posted by chat front-ends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

/// Outcome of relaying one conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub sent: usize,
    /// Turns with a role that is not relayed (system, tool, ...).
    pub skipped: usize,
    /// Turns dropped because the chat connection was not established.
    pub dropped: usize,
}
