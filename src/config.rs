//! Command line and environment configuration.
//!
//! Every flag can also be set through a `CHATBRIDGE_*` environment variable.
//! [`Args`] is what clap parses; [`BridgeConfig`] is the validated result
//! the rest of the bridge reads.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::irc::identity::{PuppetRange, RangeError};
use crate::irc::puppets::PuppetSettings;
use crate::relay::DEFAULT_LINE_LIMIT;

/// Two days.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60 * 60 * 24 * 2;

#[derive(Parser, Debug, Clone)]
#[command(name = "chatbridge")]
#[command(version, about = "Relay a chat channel to IRC, one IRC puppet per speaker")]
pub struct Args {
    /// IRC host to connect to.
    #[arg(long, env = "CHATBRIDGE_IRC_HOST")]
    pub irc_host: String,

    /// IRC port; 6697 uses TLS.
    #[arg(long, env = "CHATBRIDGE_IRC_PORT", default_value_t = 6697)]
    pub irc_port: u16,

    /// Nickname of the bridge itself.
    #[arg(long, env = "CHATBRIDGE_IRC_NICK")]
    pub irc_nick: String,

    /// IRC channel to relay to, without the leading '#'.
    #[arg(long, env = "CHATBRIDGE_IRC_CHANNEL")]
    pub irc_channel: String,

    /// IPv6 CIDR range for puppet source addresses (e.g. 2001:db8:1:2:3::/80).
    /// Without it, chat messages are relayed by the bridge nick.
    #[arg(long, env = "CHATBRIDGE_IRC_PUPPET_IP_RANGE")]
    pub irc_puppet_ip_range: Option<String>,

    /// Postfix appended to every puppet nickname.
    #[arg(long, env = "CHATBRIDGE_IRC_PUPPET_POSTFIX", default_value = "")]
    pub irc_puppet_postfix: String,

    /// IRC nicknames never relayed (comma separated, case-insensitive).
    #[arg(long, env = "CHATBRIDGE_IRC_IGNORE_LIST")]
    pub irc_ignore_list: Option<String>,

    /// Seconds an offline speaker's puppet stays connected.
    #[arg(long, env = "CHATBRIDGE_IRC_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub irc_idle_timeout: u64,

    /// Longest IRC line produced from chat text, in characters.
    #[arg(long, env = "CHATBRIDGE_LINE_LIMIT", default_value_t = DEFAULT_LINE_LIMIT)]
    pub line_limit: usize,

    /// Unix socket the chat gateway client connects to.
    #[arg(long, env = "CHATBRIDGE_CHAT_SOCKET", default_value = "/tmp/chatbridge.sock")]
    pub chat_socket: PathBuf,

    /// Output logs as JSON.
    #[arg(long, env = "CHATBRIDGE_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--irc-puppet-ip-range: {0}")]
    Range(#[from] RangeError),
    #[error("--irc-channel must name a channel")]
    EmptyChannel,
    #[error("--irc-nick must not be empty")]
    EmptyNick,
    #[error("--line-limit must be at least 1")]
    LineLimit,
}

/// Validated settings, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub irc_host: String,
    pub irc_port: u16,
    pub irc_nick: String,
    /// With the leading `#`.
    pub channel: String,
    pub puppet_range: Option<PuppetRange>,
    pub puppet_postfix: String,
    /// Lowercased.
    pub ignore_list: Vec<String>,
    pub idle_timeout: Duration,
    pub line_limit: usize,
    pub chat_socket: PathBuf,
}

impl TryFrom<Args> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let channel = args.irc_channel.trim().trim_start_matches('#');
        if channel.is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        let irc_nick = args.irc_nick.trim();
        if irc_nick.is_empty() {
            return Err(ConfigError::EmptyNick);
        }
        if args.line_limit == 0 {
            return Err(ConfigError::LineLimit);
        }

        let puppet_range = args
            .irc_puppet_ip_range
            .as_deref()
            .map(str::trim)
            .filter(|range| !range.is_empty())
            .map(str::parse::<PuppetRange>)
            .transpose()?;

        let ignore_list = args
            .irc_ignore_list
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|nick| nick.trim().to_lowercase())
            .filter(|nick| !nick.is_empty())
            .collect();

        Ok(Self {
            irc_host: args.irc_host,
            irc_port: args.irc_port,
            irc_nick: irc_nick.to_owned(),
            channel: format!("#{channel}"),
            puppet_range,
            puppet_postfix: args.irc_puppet_postfix,
            ignore_list,
            idle_timeout: Duration::from_secs(args.irc_idle_timeout),
            line_limit: args.line_limit,
            chat_socket: args.chat_socket,
        })
    }
}

impl BridgeConfig {
    /// Puppet settings, or `None` to relay through the bridge nick.
    pub fn puppet_settings(&self) -> Option<PuppetSettings> {
        self.puppet_range.map(|range| PuppetSettings {
            range,
            postfix: self.puppet_postfix.clone(),
            channel: self.channel.clone(),
            idle_timeout: self.idle_timeout,
        })
    }
}
