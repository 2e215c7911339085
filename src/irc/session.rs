//! The bridge's own IRC connection.
//!
//! Listens to the channel and relays what people say there, rejoins when
//! kicked, and reconnects forever with a fixed delay. Channel text coming
//! from the chat side only goes out through this connection when no puppet
//! range is configured.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::{CodecError, IrcCodec};
use super::event::IrcEvent;
use super::message::{Message, OutboundLine};
use super::transport::{Connector, IrcStream};
use super::{keepalive_tick, start_keepalive, MainEvent, Session, SessionEvent};
use super::{CONNECT_TIMEOUT, RECONNECT_DELAY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MainState {
    Disconnected,
    /// Registration in flight, including nick negotiation.
    Connecting,
    Registered,
    JoinedChannel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainReaction {
    Send(Message),
    Report(MainEvent),
}

pub struct MainSession {
    base_nick: String,
    nickname: String,
    channel: String,
    state: MainState,
    /// Last numeric suffix tried. Never reset, so suffixes are never reused.
    iteration: u32,
}

impl MainSession {
    pub fn new(nick: impl Into<String>, channel: impl Into<String>) -> Self {
        let base_nick = nick.into();
        Self {
            nickname: base_nick.clone(),
            base_nick,
            channel: channel.into(),
            state: MainState::Disconnected,
            iteration: 0,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn state(&self) -> MainState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == MainState::JoinedChannel
    }

    pub fn registration(&mut self) -> Vec<MainReaction> {
        self.state = MainState::Connecting;
        self.nickname = self.base_nick.clone();
        vec![
            MainReaction::Send(Message::nick(&self.nickname)),
            MainReaction::Send(Message::user(&self.base_nick, &self.base_nick)),
        ]
    }

    fn is_own_channel(&self, channel: &str) -> bool {
        channel.eq_ignore_ascii_case(&self.channel)
    }

    fn member_left(&self, nick: String) -> Vec<MainReaction> {
        if self.is_joined() {
            vec![MainReaction::Report(MainEvent::MemberLeft { nick })]
        } else {
            Vec::new()
        }
    }

    fn left_channel(&mut self) -> Vec<MainReaction> {
        self.state = MainState::Registered;
        vec![
            MainReaction::Report(MainEvent::Membership(false)),
            MainReaction::Send(Message::join(&self.channel)),
        ]
    }

    fn relay(&self, nick: String, channel: &str, text: String, is_action: bool) -> Vec<MainReaction> {
        if nick == self.nickname || !self.is_own_channel(channel) {
            return Vec::new();
        }
        vec![MainReaction::Report(MainEvent::Relay { nick, text, is_action })]
    }
}

impl Session for MainSession {
    type Reaction = MainReaction;

    fn on_event(&mut self, event: IrcEvent) -> Vec<MainReaction> {
        match event {
            IrcEvent::Registered { nick } => {
                self.state = MainState::Registered;
                if !nick.is_empty() {
                    self.nickname = nick;
                }
                vec![MainReaction::Send(Message::join(&self.channel))]
            }
            IrcEvent::NicknameInUse { .. } if self.state < MainState::Registered => {
                self.iteration += 1;
                self.nickname = format!("{}[{}]", self.base_nick, self.iteration);
                vec![MainReaction::Send(Message::nick(&self.nickname))]
            }
            IrcEvent::Joined { nick, channel } if self.is_own_channel(&channel) => {
                if nick == self.nickname {
                    self.state = MainState::JoinedChannel;
                    vec![MainReaction::Report(MainEvent::Membership(true))]
                } else {
                    Vec::new()
                }
            }
            IrcEvent::Parted { nick, channel } if self.is_own_channel(&channel) => {
                if nick == self.nickname {
                    self.left_channel()
                } else {
                    self.member_left(nick)
                }
            }
            IrcEvent::Kicked { channel, nick, .. } if self.is_own_channel(&channel) => {
                if nick == self.nickname {
                    self.left_channel()
                } else {
                    self.member_left(nick)
                }
            }
            IrcEvent::Quit { nick, .. } if nick != self.nickname => self.member_left(nick),
            IrcEvent::PublicMessage { nick, channel, text } => self.relay(nick, &channel, text, false),
            IrcEvent::Action { nick, channel, text } => self.relay(nick, &channel, text, true),
            IrcEvent::NickChanged { old, new } if old == self.nickname => {
                self.nickname = new;
                Vec::new()
            }
            IrcEvent::Ping { token } => vec![MainReaction::Send(Message::pong(&token))],
            IrcEvent::Disconnected { .. } => {
                let was_joined = self.is_joined();
                self.state = MainState::Disconnected;
                if was_joined {
                    vec![MainReaction::Report(MainEvent::Membership(false))]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

/// Commands from the IRC context to the main connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainCommand {
    Say(OutboundLine),
    Shutdown { reason: String },
}

/// Spawn the main connection task.
pub fn spawn_main(
    session: MainSession,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> (mpsc::UnboundedSender<MainCommand>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(main_task(session, connector, cmd_rx, events));
    (cmd_tx, handle)
}

enum Flow {
    Continue,
    Disconnected(String),
    Stop,
}

async fn main_task(
    mut session: MainSession,
    connector: Arc<dyn Connector>,
    mut commands: mpsc::UnboundedReceiver<MainCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let remote = connector.describe();

    loop {
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(None)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(%remote, "irc: connect failed, retrying in {}s: {e}", RECONNECT_DELAY.as_secs());
                if !wait_to_reconnect(&mut commands).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                warn!(%remote, "irc: connect timed out, retrying in {}s", RECONNECT_DELAY.as_secs());
                if !wait_to_reconnect(&mut commands).await {
                    return;
                }
                continue;
            }
        };

        info!(%remote, "irc: connected");
        let mut framed = Framed::new(stream, IrcCodec);
        let reason = match drive(&mut session, &mut framed, &mut commands, &events).await {
            Flow::Stop => return,
            Flow::Continue => "connection closed".to_owned(),
            Flow::Disconnected(reason) => reason,
        };

        warn!(%remote, "irc: disconnected: {reason}");
        for reaction in session.on_event(IrcEvent::Disconnected { reason }) {
            if let MainReaction::Report(event) = reaction {
                let _ = events.send(SessionEvent::Main(event));
            }
        }
        if !wait_to_reconnect(&mut commands).await {
            return;
        }
    }
}

/// Sit out the reconnect delay. Lines to say are dropped: nobody is listening.
async fn wait_to_reconnect(commands: &mut mpsc::UnboundedReceiver<MainCommand>) -> bool {
    let delay = tokio::time::sleep(RECONNECT_DELAY);
    tokio::pin!(delay);
    loop {
        tokio::select! {
            _ = &mut delay => return true,
            cmd = commands.recv() => match cmd {
                Some(MainCommand::Say(line)) => {
                    debug!(text = line.text(), "irc: not connected, dropping line");
                }
                Some(MainCommand::Shutdown { .. }) | None => return false,
            },
        }
    }
}

async fn drive(
    session: &mut MainSession,
    framed: &mut Framed<IrcStream, IrcCodec>,
    commands: &mut mpsc::UnboundedReceiver<MainCommand>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Flow {
    let mut keepalive = None;

    let registration = session.registration();
    if let Err(e) = apply(framed, events, registration).await {
        return Flow::Disconnected(e.to_string());
    }

    loop {
        let result = tokio::select! {
            _ = keepalive_tick(&mut keepalive) => {
                framed.send(Message::ping(session.nickname())).await
            }
            cmd = commands.recv() => match cmd {
                Some(MainCommand::Say(line)) if session.is_joined() => {
                    framed.send(line.to_message(&session.channel)).await
                }
                Some(MainCommand::Say(line)) => {
                    debug!(text = line.text(), "irc: not in channel, dropping line");
                    Ok(())
                }
                Some(MainCommand::Shutdown { reason }) => {
                    let _ = framed.send(Message::quit(&reason)).await;
                    return Flow::Stop;
                }
                None => return Flow::Stop,
            },
            frame = framed.next() => match frame {
                Some(Ok(msg)) => {
                    let event = IrcEvent::from_message(&msg, session.nickname());
                    match &event {
                        IrcEvent::Registered { nick } => info!(%nick, "irc: registered"),
                        IrcEvent::Killed { reason } => warn!("irc: killed by server: {reason}"),
                        IrcEvent::Error { reason } => warn!("irc: server error: {reason}"),
                        _ => {}
                    }
                    let reactions = session.on_event(event);
                    apply(framed, events, reactions).await
                }
                Some(Err(e)) => Err(e),
                None => return Flow::Continue,
            },
        };

        if let Err(e) = result {
            return Flow::Disconnected(e.to_string());
        }

        if keepalive.is_none() && session.state() >= MainState::Registered {
            keepalive = Some(start_keepalive());
        }
    }
}

async fn apply(
    framed: &mut Framed<IrcStream, IrcCodec>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    reactions: Vec<MainReaction>,
) -> Result<(), CodecError> {
    for reaction in reactions {
        match reaction {
            MainReaction::Send(msg) => framed.send(msg).await?,
            MainReaction::Report(event) => {
                let _ = events.send(SessionEvent::Main(event));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::testing::MemoryConnector;
    use pretty_assertions::assert_eq;

    fn joined() -> MainSession {
        let mut session = MainSession::new("bridge", "#chan");
        session.registration();
        session.on_event(IrcEvent::Registered { nick: "bridge".into() });
        session.on_event(IrcEvent::Joined { nick: "bridge".into(), channel: "#chan".into() });
        session
    }

    fn nicks_tried(reactions: &[MainReaction]) -> Vec<String> {
        reactions
            .iter()
            .filter_map(|r| match r {
                MainReaction::Send(msg) if msg.command == "NICK" => Some(msg.params[0].clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn collision_suffix_increases_across_reconnects() {
        let mut session = MainSession::new("x", "#chan");
        let mut tried = nicks_tried(&session.registration());
        tried.extend(nicks_tried(&session.on_event(IrcEvent::NicknameInUse { nick: "x".into() })));
        tried.extend(nicks_tried(&session.on_event(IrcEvent::NicknameInUse { nick: "x[1]".into() })));
        session.on_event(IrcEvent::Disconnected { reason: "eof".into() });

        tried.extend(nicks_tried(&session.registration()));
        tried.extend(nicks_tried(&session.on_event(IrcEvent::NicknameInUse { nick: "x".into() })));
        assert_eq!(tried, vec!["x", "x[1]", "x[2]", "x", "x[3]"]);
    }

    #[test]
    fn registration_joins_then_reports_membership() {
        let mut session = MainSession::new("bridge", "#chan");
        session.registration();
        let reactions = session.on_event(IrcEvent::Registered { nick: "bridge".into() });
        assert_eq!(reactions, vec![MainReaction::Send(Message::join("#chan"))]);
        let reactions = session.on_event(IrcEvent::Joined { nick: "bridge".into(), channel: "#chan".into() });
        assert_eq!(reactions, vec![MainReaction::Report(MainEvent::Membership(true))]);
        assert!(session.is_joined());
    }

    #[test]
    fn relays_channel_text_from_others_only() {
        let mut session = joined();
        let reactions = session.on_event(IrcEvent::PublicMessage {
            nick: "alice".into(),
            channel: "#chan".into(),
            text: "hi".into(),
        });
        assert_eq!(
            reactions,
            vec![MainReaction::Report(MainEvent::Relay {
                nick: "alice".into(),
                text: "hi".into(),
                is_action: false
            })]
        );

        let own = session.on_event(IrcEvent::PublicMessage {
            nick: "bridge".into(),
            channel: "#chan".into(),
            text: "echo".into(),
        });
        assert!(own.is_empty());

        let elsewhere = session.on_event(IrcEvent::Action {
            nick: "alice".into(),
            channel: "#other".into(),
            text: "waves".into(),
        });
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn self_kick_rejoins_and_others_leaving_are_reported() {
        let mut session = joined();
        let reactions = session.on_event(IrcEvent::Quit { nick: "alice".into(), reason: "bye".into() });
        assert_eq!(reactions, vec![MainReaction::Report(MainEvent::MemberLeft { nick: "alice".into() })]);

        let reactions = session.on_event(IrcEvent::Kicked {
            channel: "#chan".into(),
            nick: "bridge".into(),
            by: "op".into(),
        });
        assert_eq!(
            reactions,
            vec![
                MainReaction::Report(MainEvent::Membership(false)),
                MainReaction::Send(Message::join("#chan")),
            ]
        );
        assert_eq!(session.state(), MainState::Registered);
    }

    #[test]
    fn disconnect_reports_lost_membership_once() {
        let mut session = joined();
        let reactions = session.on_event(IrcEvent::Disconnected { reason: "eof".into() });
        assert_eq!(reactions, vec![MainReaction::Report(MainEvent::Membership(false))]);
        let reactions = session.on_event(IrcEvent::Disconnected { reason: "eof".into() });
        assert!(reactions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_disconnect() {
        let (connector, mut accepted) = MemoryConnector::new();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (_commands, _task) = spawn_main(MainSession::new("bridge", "#chan"), connector, events_tx);

        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.source, None);
        assert_eq!(server.recv().await, "NICK :bridge");
        assert_eq!(server.recv().await, "USER bridge 0 * :bridge");
        server.send(":srv 433 * bridge :Nickname is already in use").await;
        assert_eq!(server.recv().await, "NICK :bridge[1]");
        server.send(":srv 001 bridge[1] :Welcome").await;
        assert_eq!(server.recv().await, "JOIN :#chan");
        server.send(":bridge[1]!b@h JOIN #chan").await;
        assert_eq!(events.recv().await, Some(SessionEvent::Main(MainEvent::Membership(true))));

        drop(server);
        assert_eq!(events.recv().await, Some(SessionEvent::Main(MainEvent::Membership(false))));

        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.recv().await, "NICK :bridge");
    }
}
