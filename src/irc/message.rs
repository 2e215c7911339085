/// IRC message grammar.
///
/// RFC 2812 layout:
///   [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
///
/// The `\r\n` terminator belongs to the codec; everything here works on bare
/// lines. Also carries the CTCP ACTION helpers used for `/me` lines.
use std::fmt;

/// CTCP delimiter wrapped around `ACTION` payloads.
const CTCP_DELIM: char = '\u{1}';

/// A single IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Source of the line (`server.name` or `nick!user@host`).
    pub prefix: Option<String>,
    /// Command word or three-digit numeric.
    pub command: String,
    /// Parameters; a trailing parameter keeps its spaces.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    /// Build a prefix-less client line.
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: None,
            command: command.to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn nick(nick: &str) -> Self {
        Self::new("NICK", [nick])
    }

    /// `USER <username> 0 * :<realname>`
    pub fn user(username: &str, realname: &str) -> Self {
        Self::new("USER", [username, "0", "*", realname])
    }

    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", [channel])
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", [target, text])
    }

    /// CTCP ACTION, what clients send for `/me`.
    pub fn action(target: &str, text: &str) -> Self {
        Self::privmsg(target, &format!("{CTCP_DELIM}ACTION {text}{CTCP_DELIM}"))
    }

    pub fn ping(token: &str) -> Self {
        Self::new("PING", [token])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", [token])
    }

    pub fn quit(reason: &str) -> Self {
        Self::new("QUIT", [reason])
    }

    /// Nickname part of the prefix (`nick` in `nick!user@host`).
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }

    /// Parse a single line (a trailing `\r\n` is tolerated).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = if let Some(stripped) = input.strip_prefix(':') {
            match stripped.find(' ') {
                Some(idx) => (Some(stripped[..idx].to_owned()), stripped[idx + 1..].trim_start()),
                None => return Err(ParseError::MissingCommand),
            }
        } else {
            (None, input)
        };

        let (command, param_str) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        if let Some(mut remaining) = param_str {
            while !remaining.is_empty() {
                if let Some(trailing) = remaining.strip_prefix(':') {
                    params.push(trailing.to_owned());
                    break;
                }
                match remaining.find(' ') {
                    Some(idx) => {
                        if idx > 0 {
                            params.push(remaining[..idx].to_owned());
                        }
                        remaining = &remaining[idx + 1..];
                    }
                    None => {
                        params.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(Message {
            prefix,
            // Servers are free to send lowercase commands; match on one form.
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Serialize to the wire form, without `\r\n`.
    ///
    /// The last parameter always gets the `:` marker so text with spaces or
    /// a leading colon survives unchanged.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            out.push_str(" :");
            out.push_str(last);
        }

        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// One line of relayed text, before it is addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundLine {
    Message(String),
    Action(String),
}

impl OutboundLine {
    pub fn text(&self) -> &str {
        match self {
            OutboundLine::Message(text) | OutboundLine::Action(text) => text,
        }
    }

    pub fn to_message(&self, channel: &str) -> Message {
        match self {
            OutboundLine::Message(text) => Message::privmsg(channel, text),
            OutboundLine::Action(text) => Message::action(channel, text),
        }
    }
}

/// Extract the payload of a CTCP ACTION, if `text` is one.
pub fn parse_action(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
    inner.strip_prefix("ACTION ")
}

/// Strip mIRC formatting codes (bold, colour, italics, …) from inbound text.
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{2}' | '\u{1d}' | '\u{1f}' | '\u{1e}' | '\u{11}' | '\u{16}' | '\u{f}' => {}
            '\u{3}' => {
                // \x03[fg[,bg]] with one or two digits each.
                for _ in 0..2 {
                    if chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                        chars.next();
                    }
                }
                if chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                        chars.next();
                        for _ in 0..2 {
                            if chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                                chars.next();
                            }
                        }
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}
