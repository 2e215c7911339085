//! Relay core: translating text between the chat model and IRC lines.
//!
//! Pure logic, owned by the IRC context. Knows nothing about sockets or
//! puppets beyond the nickname list handed to it per call.

pub mod mention;
pub mod segment;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::chat::SpeakerId;
use crate::irc::message::{strip_formatting, OutboundLine};

/// Longest IRC line produced from chat text, in characters.
pub const DEFAULT_LINE_LIMIT: usize = 400;

/// A member leaving this soon after speaking gets a "left" notice.
pub const LEFT_NOTICE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Text relayed for an IRC user who left mid-conversation.
pub const LEFT_NOTICE: &str = "_left the IRC channel_";

/// What an IRC line turns into on the chat side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub nick: String,
    pub text: String,
    pub is_action: bool,
}

pub struct Relay {
    line_limit: usize,
    /// Lowercased.
    ignore: HashSet<String>,
    spoken: HashMap<String, Instant>,
}

impl Relay {
    pub fn new<I, S>(line_limit: usize, ignore: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            line_limit,
            ignore: ignore.into_iter().map(|n| n.as_ref().to_lowercase()).collect(),
            spoken: HashMap::new(),
        }
    }

    pub fn is_ignored(&self, nick: &str) -> bool {
        self.ignore.contains(&nick.to_lowercase())
    }

    /// Chat text to IRC lines.
    ///
    /// `attribution` is set when the bridge's own nick speaks for the
    /// speaker, so each line carries the speaker's name.
    pub fn to_line_protocol(
        &self,
        attribution: Option<&str>,
        raw_text: &str,
        is_action: bool,
    ) -> Vec<OutboundLine> {
        let lines = segment::segment(raw_text, self.line_limit, is_action);
        let Some(name) = attribution else {
            return lines;
        };
        lines
            .into_iter()
            .map(|line| match line {
                OutboundLine::Message(text) => OutboundLine::Message(format!("<{name}>: {text}")),
                OutboundLine::Action(text) => OutboundLine::Message(format!("<{name}>: /me {text}")),
            })
            .collect()
    }

    /// An IRC line to chat text, or `None` when it must not be relayed.
    ///
    /// Drops ignored nicks and anything said by one of our own puppets.
    /// Records when `nick` last spoke.
    pub fn to_chat(
        &mut self,
        nick: &str,
        raw_text: &str,
        is_action: bool,
        puppets: &[(&str, SpeakerId)],
    ) -> Option<ChatLine> {
        if self.is_ignored(nick) || puppets.iter().any(|(puppet, _)| *puppet == nick) {
            return None;
        }

        let text = strip_formatting(raw_text);
        let text = mention::highlight_puppets(&text, puppets);
        self.record_spoken(nick);

        Some(ChatLine {
            nick: nick.to_owned(),
            text,
            is_action,
        })
    }

    fn record_spoken(&mut self, nick: &str) {
        self.spoken.retain(|_, at| at.elapsed() < LEFT_NOTICE_WINDOW);
        self.spoken.insert(nick.to_owned(), Instant::now());
    }

    /// `nick` left the channel. Returns the notice to relay if they spoke
    /// recently; their record is cleared either way.
    pub fn member_left(&mut self, nick: &str) -> Option<ChatLine> {
        let spoke_at = self.spoken.remove(nick)?;
        if spoke_at.elapsed() >= LEFT_NOTICE_WINDOW || self.is_ignored(nick) {
            return None;
        }
        Some(ChatLine {
            nick: nick.to_owned(),
            text: LEFT_NOTICE.to_owned(),
            is_action: false,
        })
    }
}
