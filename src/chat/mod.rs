//! Chat side of the bridge.
//!
//! The gateway client for the chat service lives outside this crate. It
//! attaches to [`socket`] and exchanges the normalized events and commands
//! defined here as JSON lines.

pub mod socket;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a chat-service user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerId(pub u64);

impl SpeakerId {
    /// How the chat service spells a highlight of this user.
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a mention token in chat text refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionKind {
    User,
    Channel,
    Role,
    /// `@everyone` / `@here`.
    Everyone,
    /// Custom emoji.
    Emoji,
}

/// A mention token in [`ChatMessage::raw_text`] and what it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Literal token as it appears in the text, e.g. `<@1234>`.
    pub token: String,
    pub kind: MentionKind,
    /// Speaker behind a user mention.
    #[serde(default)]
    pub speaker_id: Option<SpeakerId>,
    /// Human-readable name of the user, channel, role, or emoji.
    pub name: String,
}

/// One message posted in the bridged chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub speaker_id: SpeakerId,
    pub display_name: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub reply_target_display_name: Option<String>,
    pub raw_text: String,
    /// Presence of the speaker as the chat service reports it.
    #[serde(default)]
    pub is_offline: bool,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

/// Inbound: what the chat client tells the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Message(ChatMessage),
    Presence { speaker_id: SpeakerId, is_offline: bool },
    /// Someone asked for the bridge status; answered with [`ChatCommand::Status`].
    Status,
    /// The configured chat channel does not exist or is not accessible.
    ChannelUnreachable {
        #[serde(default)]
        reason: String,
    },
}

/// Outbound: what the bridge asks the chat client to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatCommand {
    /// Post `text` under the IRC user's name.
    SendAs { nick: String, text: String },
    /// Post an action (`/me`) under the IRC user's name.
    SendAction { nick: String, text: String },
    /// Post as the bridge itself.
    SendSystem { text: String },
    /// Update the bridge's presence line.
    SetPresence { status: String },
    /// Reply to [`ChatEvent::Status`].
    Status { text: String },
}
