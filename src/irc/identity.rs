//! Puppet identities: nickname sanitizing and source-address derivation.
//!
//! Nothing here is stored anywhere. A chat display name always sanitizes to
//! the same IRC nickname, and that nickname always hashes to the same IPv6
//! address inside the configured range, so puppets keep their hostmask
//! across restarts.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// Longest nickname we hand to the server. Networks differ; 20 fits most.
pub const MAX_NICK_LEN: usize = 20;

/// Prefix for names that sanitize to nothing.
const PLACEHOLDER_PREFIX: &str = "chat_user_";

/// Hex characters of the hash kept in a placeholder name.
const PLACEHOLDER_HASH_LEN: usize = 8;

/// A range must offer at least this many addresses (prefix /96 or shorter).
pub const MIN_RANGE_BITS: u32 = 32;

/// Characters RFC 2812 allows in a nickname.
fn is_nick_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '[' | ']' | '{' | '}' | '|')
}

/// Turn a chat display name into a legal IRC nickname of at most
/// [`MAX_NICK_LEN`] characters.
pub fn sanitize_nickname(display_name: &str) -> String {
    let filtered: String = display_name.trim().chars().filter(|c| is_nick_char(*c)).collect();
    // A nickname cannot start with a digit or a dash.
    let trimmed = filtered.trim_start_matches(|c: char| c.is_ascii_digit() || c == '-');

    let mut nick = if trimmed.is_empty() {
        let digest = hex::encode(Sha256::digest(display_name.as_bytes()));
        format!("{PLACEHOLDER_PREFIX}{}", &digest[..PLACEHOLDER_HASH_LEN])
    } else {
        trimmed.to_owned()
    };

    // Only ASCII survives the filter, so byte truncation is safe.
    nick.truncate(MAX_NICK_LEN);
    nick
}

/// Derive the IRC username from a nickname.
///
/// Servers are stricter about the first character of a username than of a
/// nickname.
pub fn username_for(nickname: &str) -> String {
    let username = nickname.trim_start_matches(['_', '[', ']', '{', '}', '|']);
    if username.is_empty() {
        "puppet".to_owned()
    } else {
        username.to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("expected an IPv6 CIDR range like 2001:db8::/80, got {0:?}")]
    Malformed(String),
    #[error("invalid IPv6 address {0:?}")]
    Address(String),
    #[error("prefix length {0} is out of range")]
    Prefix(u32),
    #[error("{0} has host bits set")]
    HostBits(String),
    #[error("range /{0} is too small, at least 2^32 addresses (/96) are needed")]
    TooSmall(u32),
}

/// An IPv6 network puppets take their source addresses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuppetRange {
    network: Ipv6Addr,
    prefix_len: u32,
}

impl PuppetRange {
    pub fn new(network: Ipv6Addr, prefix_len: u32) -> Result<Self, RangeError> {
        if prefix_len > 128 {
            return Err(RangeError::Prefix(prefix_len));
        }
        if u128::from(network) & !Self::mask(prefix_len) != 0 {
            return Err(RangeError::HostBits(format!("{network}/{prefix_len}")));
        }
        if 128 - prefix_len < MIN_RANGE_BITS {
            return Err(RangeError::TooSmall(prefix_len));
        }
        Ok(Self { network, prefix_len })
    }

    fn mask(prefix_len: u32) -> u128 {
        if prefix_len == 0 {
            0
        } else {
            u128::MAX << (128 - prefix_len)
        }
    }

    /// Number of host bits; the range holds `2^host_bits` addresses.
    pub fn host_bits(&self) -> u32 {
        128 - self.prefix_len
    }

    /// The `index`-th address of the range, wrapping inside it.
    pub fn nth(&self, index: u128) -> Ipv6Addr {
        let host = index & !Self::mask(self.prefix_len);
        Ipv6Addr::from(u128::from(self.network) | host)
    }

    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        let mask = Self::mask(self.prefix_len);
        u128::from(addr) & mask == u128::from(self.network)
    }

    /// Address for a sanitized nickname.
    ///
    /// The SHA-256 digest, read as a 256-bit big-endian integer, is reduced
    /// modulo the range size. The size is a power of two no larger than
    /// 2^128, so the remainder is the low `host_bits` of the digest's last
    /// 16 bytes.
    pub fn address_for(&self, base_name: &str) -> Ipv6Addr {
        let digest = Sha256::digest(base_name.as_bytes());
        let mut low = [0u8; 16];
        low.copy_from_slice(&digest[16..]);
        self.nth(u128::from_be_bytes(low))
    }
}

impl FromStr for PuppetRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| RangeError::Malformed(s.to_owned()))?;
        let network: Ipv6Addr = addr
            .parse()
            .map_err(|_| RangeError::Address(addr.to_owned()))?;
        let prefix_len: u32 = prefix
            .parse()
            .map_err(|_| RangeError::Malformed(s.to_owned()))?;
        Self::new(network, prefix_len)
    }
}

impl fmt::Display for PuppetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Everything a puppet presents to the IRC server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuppetIdentity {
    /// Sanitized display name, the input to address derivation.
    pub base_name: String,
    /// Base name plus the configured postfix; the nick we always want.
    pub preferred_nick: String,
    /// Nick the server currently knows us by.
    pub nickname: String,
    pub username: String,
    /// Source address, fixed for the life of the process.
    pub address: Ipv6Addr,
}

impl PuppetIdentity {
    pub fn derive(display_name: &str, postfix: &str, range: &PuppetRange) -> Self {
        let base_name = sanitize_nickname(display_name);
        let preferred_nick = format!("{base_name}{postfix}");
        let username = username_for(&preferred_nick);
        let address = range.address_for(&base_name);
        Self {
            nickname: preferred_nick.clone(),
            base_name,
            preferred_nick,
            username,
            address,
        }
    }
}
