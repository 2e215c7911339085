//! IRC side of the bridge.
//!
//! Wire layer (`message`, `codec`, `event`, `transport`), the per-connection
//! session state machines (`session` for the bridge's own nick, `puppet` for
//! per-speaker puppets), the puppet table (`puppets`), and the IRC context
//! task that owns all of it (`context`).

pub mod codec;
pub mod context;
pub mod event;
pub mod identity;
pub mod message;
pub mod puppet;
pub mod puppets;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use tokio::time::Interval;

use crate::chat::SpeakerId;
use event::IrcEvent;

/// Fixed delay before reconnecting after a failed or lost connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval between keepalive `PING`s once registered.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Upper bound on TCP+TLS connection establishment.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection's protocol logic, independent of its socket.
///
/// The connection task classifies each inbound line into an [`IrcEvent`],
/// hands it to `on_event`, and carries out the reactions that come back.
pub trait Session {
    type Reaction;

    fn on_event(&mut self, event: IrcEvent) -> Vec<Self::Reaction>;
}

/// Reported by the main session's connection task to the IRC context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainEvent {
    /// Whether the bridge nick is currently in the channel.
    Membership(bool),
    /// Someone in the channel said something.
    Relay { nick: String, text: String, is_action: bool },
    /// Someone else left the channel (part, kick, or quit).
    MemberLeft { nick: String },
}

/// Reported by a puppet's connection task to the IRC context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PuppetEvent {
    NickChanged(String),
    Ready(bool),
    /// The puppet is gone for good and must leave the table.
    Remove { reason: String },
}

/// Everything connection tasks send to the IRC context, on one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Main(MainEvent),
    Puppet {
        speaker_id: SpeakerId,
        /// Distinguishes successive puppets of the same speaker.
        generation: u64,
        event: PuppetEvent,
    },
}

/// Wait for the next keepalive tick, or forever when keepalive is off.
pub(crate) async fn keepalive_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Start a keepalive whose first tick is one full period away.
pub(crate) fn start_keepalive() -> Interval {
    let start = tokio::time::Instant::now() + KEEPALIVE_INTERVAL;
    tokio::time::interval_at(start, KEEPALIVE_INTERVAL)
}
