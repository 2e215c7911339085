//! Handoff between the IRC context and the chat context.
//!
//! Each context owns an unbounded queue. The other side holds a cheap
//! cloneable handle and schedules work on it without waiting for the result;
//! the only exchange with a reply is the status query. A context that has
//! gone away makes scheduling fail, which is logged and otherwise ignored.

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::chat::{ChatCommand, ChatMessage, SpeakerId};

/// Work for the IRC context.
#[derive(Debug)]
pub enum IrcCommand {
    Relay(ChatMessage),
    Presence { speaker_id: SpeakerId, is_offline: bool },
    Status { reply: oneshot::Sender<String> },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct IrcHandle {
    tx: mpsc::UnboundedSender<IrcCommand>,
}

impl IrcHandle {
    fn schedule(&self, command: IrcCommand) {
        if let Err(e) = self.tx.send(command) {
            warn!(command = ?e.0, "bridge: IRC context is gone, dropping work");
        }
    }

    pub fn relay(&self, message: ChatMessage) {
        self.schedule(IrcCommand::Relay(message));
    }

    pub fn presence(&self, speaker_id: SpeakerId, is_offline: bool) {
        self.schedule(IrcCommand::Presence { speaker_id, is_offline });
    }

    pub fn shutdown(&self) {
        self.schedule(IrcCommand::Shutdown);
    }

    /// Ask the IRC context for its status line; `None` if it is gone.
    pub async fn status(&self) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.schedule(IrcCommand::Status { reply });
        rx.await.ok()
    }
}

/// Work for the chat context.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    tx: mpsc::UnboundedSender<ChatCommand>,
}

impl ChatHandle {
    fn schedule(&self, command: ChatCommand) {
        if let Err(e) = self.tx.send(command) {
            warn!(command = ?e.0, "bridge: chat context is gone, dropping work");
        }
    }

    pub fn send_as(&self, nick: &str, text: &str) {
        self.schedule(ChatCommand::SendAs {
            nick: nick.to_owned(),
            text: text.to_owned(),
        });
    }

    pub fn send_action(&self, nick: &str, text: &str) {
        self.schedule(ChatCommand::SendAction {
            nick: nick.to_owned(),
            text: text.to_owned(),
        });
    }

    pub fn send_system(&self, text: &str) {
        self.schedule(ChatCommand::SendSystem { text: text.to_owned() });
    }

    pub fn set_presence(&self, status: &str) {
        self.schedule(ChatCommand::SetPresence { status: status.to_owned() });
    }
}

pub fn irc_queue() -> (IrcHandle, mpsc::UnboundedReceiver<IrcCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IrcHandle { tx }, rx)
}

pub fn chat_queue() -> (ChatHandle, mpsc::UnboundedReceiver<ChatCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChatHandle { tx }, rx)
}
