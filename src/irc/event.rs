//! Inbound IRC events.
//!
//! Every line a session receives is classified once into an [`IrcEvent`];
//! sessions then dispatch with a single `match` instead of per-command
//! callbacks. `Disconnected` never comes off the wire, the connection task
//! synthesizes it when the stream ends.

use super::message::{parse_action, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcEvent {
    /// `001`: registration accepted under `nick`.
    Registered { nick: String },
    /// `433`: the nickname we asked for is taken.
    NicknameInUse { nick: String },
    Joined { nick: String, channel: String },
    Parted { nick: String, channel: String },
    Kicked { channel: String, nick: String, by: String },
    Quit { nick: String, reason: String },
    PublicMessage { nick: String, channel: String, text: String },
    Action { nick: String, channel: String, text: String },
    /// `NICK` from the server: `old` is now known as `new`.
    NickChanged { old: String, new: String },
    /// `KILL` aimed at us, or the `ERROR` line a kill produces.
    Killed { reason: String },
    Ping { token: String },
    /// `ERROR` that is not a kill; the server is about to close the link.
    Error { reason: String },
    Disconnected { reason: String },
    /// Anything the sessions have no use for.
    Other,
}

impl IrcEvent {
    /// Classify a line received by the session currently using `own_nick`.
    pub fn from_message(msg: &Message, own_nick: &str) -> Self {
        let nick = || msg.source_nick().unwrap_or_default().to_owned();
        let param = |i: usize| msg.params.get(i).cloned().unwrap_or_default();

        match msg.command.as_str() {
            "001" => IrcEvent::Registered { nick: param(0) },
            // ERR_NICKNAMEINUSE, plus ERR_NICKCOLLISION / ERR_UNAVAILRESOURCE.
            "433" | "436" | "437" => IrcEvent::NicknameInUse { nick: param(1) },
            "JOIN" => IrcEvent::Joined { nick: nick(), channel: param(0) },
            "PART" => IrcEvent::Parted { nick: nick(), channel: param(0) },
            "KICK" => IrcEvent::Kicked {
                channel: param(0),
                nick: param(1),
                by: nick(),
            },
            "QUIT" => IrcEvent::Quit { nick: nick(), reason: param(0) },
            "PRIVMSG" => {
                let channel = param(0);
                let text = param(1);
                match parse_action(&text) {
                    Some(action) => IrcEvent::Action {
                        nick: nick(),
                        channel,
                        text: action.to_owned(),
                    },
                    None if text.starts_with('\u{1}') => IrcEvent::Other,
                    None => IrcEvent::PublicMessage { nick: nick(), channel, text },
                }
            }
            "NICK" => IrcEvent::NickChanged { old: nick(), new: param(0) },
            "KILL" if msg.params.first().is_some_and(|t| t == own_nick) => {
                IrcEvent::Killed { reason: param(1) }
            }
            "ERROR" => {
                let reason = param(0);
                if reason.contains("Killed") || reason.contains("KILL") {
                    IrcEvent::Killed { reason }
                } else {
                    IrcEvent::Error { reason }
                }
            }
            "PING" => IrcEvent::Ping { token: param(0) },
            _ => IrcEvent::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> IrcEvent {
        IrcEvent::from_message(&Message::parse(line).unwrap(), "me")
    }

    #[test]
    fn registration_numerics() {
        assert_eq!(
            classify(":srv 001 me :Welcome"),
            IrcEvent::Registered { nick: "me".into() }
        );
        assert_eq!(
            classify(":srv 433 * me :Nickname is already in use"),
            IrcEvent::NicknameInUse { nick: "me".into() }
        );
    }

    #[test]
    fn membership_changes() {
        assert_eq!(
            classify(":me!u@h JOIN :#chan"),
            IrcEvent::Joined { nick: "me".into(), channel: "#chan".into() }
        );
        assert_eq!(
            classify(":op!u@h KICK #chan me :behave"),
            IrcEvent::Kicked { channel: "#chan".into(), nick: "me".into(), by: "op".into() }
        );
        assert_eq!(
            classify(":bob!u@h QUIT :Ping timeout"),
            IrcEvent::Quit { nick: "bob".into(), reason: "Ping timeout".into() }
        );
    }

    #[test]
    fn messages_and_actions() {
        assert_eq!(
            classify(":bob!u@h PRIVMSG #chan :hello"),
            IrcEvent::PublicMessage {
                nick: "bob".into(),
                channel: "#chan".into(),
                text: "hello".into()
            }
        );
        assert_eq!(
            classify(":bob!u@h PRIVMSG #chan :\u{1}ACTION waves\u{1}"),
            IrcEvent::Action { nick: "bob".into(), channel: "#chan".into(), text: "waves".into() }
        );
        assert_eq!(classify(":bob!u@h PRIVMSG me :\u{1}VERSION\u{1}"), IrcEvent::Other);
    }

    #[test]
    fn kill_only_when_aimed_at_us() {
        assert_eq!(
            classify(":oper KILL me :spamming"),
            IrcEvent::Killed { reason: "spamming".into() }
        );
        assert_eq!(classify(":oper KILL other :spamming"), IrcEvent::Other);
        assert_eq!(
            classify("ERROR :Closing Link: h (Killed (oper (spamming)))"),
            IrcEvent::Killed { reason: "Closing Link: h (Killed (oper (spamming)))".into() }
        );
        assert_eq!(
            classify("ERROR :Closing Link: h (Quit)"),
            IrcEvent::Error { reason: "Closing Link: h (Quit)".into() }
        );
    }

    #[test]
    fn nick_change_and_ping() {
        assert_eq!(
            classify(":me!u@h NICK :Guest123"),
            IrcEvent::NickChanged { old: "me".into(), new: "Guest123".into() }
        );
        assert_eq!(classify("PING :abc"), IrcEvent::Ping { token: "abc".into() });
    }
}
