//! Puppet sessions: one IRC connection per active chat speaker.
//!
//! [`PuppetSession`] holds the protocol logic and never touches a socket.
//! [`PuppetTask`] owns the connection, the idle timer and the keepalive,
//! feeds inbound lines through the session, and reports nick and readiness
//! changes back to the IRC context tagged with its speaker and generation.
//!
//! Sends that arrive before the puppet has joined its channel are queued and
//! flushed in order once the join is confirmed, including across reconnects.
//! The queue holds at most [`MAX_PENDING`] lines; the oldest go first.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::{CodecError, IrcCodec};
use super::event::IrcEvent;
use super::identity::PuppetIdentity;
use super::message::{Message, OutboundLine};
use super::transport::{Connector, IrcStream};
use super::{keepalive_tick, start_keepalive, PuppetEvent, Session, SessionEvent};
use super::{CONNECT_TIMEOUT, RECONNECT_DELAY};
use crate::chat::SpeakerId;

/// How long a puppet waits before taking back a nick the server renamed it
/// away from.
pub const RECLAIM_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PuppetState {
    Idle,
    Resolving,
    /// Connected, registration in flight (nick negotiation happens here).
    Connecting,
    Registered,
    JoinedChannel,
}

/// What the connection task must do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PuppetReaction {
    Send(Message),
    Ready(bool),
    NickChanged(String),
    /// Try to take back the preferred nick after [`RECLAIM_DELAY`].
    ScheduleReclaim,
    /// Never reconnect; the puppet must be removed.
    Terminated { reason: String },
}

pub struct PuppetSession {
    identity: PuppetIdentity,
    channel: String,
    state: PuppetState,
    collisions: u32,
    reclaiming: bool,
    no_reconnect: bool,
}

impl PuppetSession {
    pub fn new(identity: PuppetIdentity, channel: impl Into<String>) -> Self {
        Self {
            identity,
            channel: channel.into(),
            state: PuppetState::Idle,
            collisions: 0,
            reclaiming: false,
            no_reconnect: false,
        }
    }

    pub fn identity(&self) -> &PuppetIdentity {
        &self.identity
    }

    pub fn nickname(&self) -> &str {
        &self.identity.nickname
    }

    pub fn state(&self) -> PuppetState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == PuppetState::JoinedChannel
    }

    pub fn no_reconnect(&self) -> bool {
        self.no_reconnect
    }

    /// A connection attempt is starting.
    pub fn begin_connect(&mut self) {
        self.state = PuppetState::Resolving;
    }

    /// The socket is up: ask for the preferred nick again.
    pub fn registration(&mut self) -> Vec<PuppetReaction> {
        self.state = PuppetState::Connecting;
        self.reclaiming = false;
        let mut reactions = Vec::new();
        if self.identity.nickname != self.identity.preferred_nick {
            self.identity.nickname = self.identity.preferred_nick.clone();
            reactions.push(PuppetReaction::NickChanged(self.identity.nickname.clone()));
        }
        reactions.push(PuppetReaction::Send(Message::nick(&self.identity.nickname)));
        reactions.push(PuppetReaction::Send(Message::user(
            &self.identity.username,
            &self.identity.base_name,
        )));
        reactions
    }

    /// Ask for the preferred nick back, if we are not using it.
    pub fn reclaim(&mut self) -> Vec<PuppetReaction> {
        if self.state < PuppetState::Registered
            || self.identity.nickname == self.identity.preferred_nick
        {
            return Vec::new();
        }
        self.reclaiming = true;
        vec![PuppetReaction::Send(Message::nick(&self.identity.preferred_nick))]
    }

    /// `{preferred}[d]` first, then `{preferred}[1]`, `[2]`, ...
    fn next_candidate(&mut self) -> String {
        let preferred = &self.identity.preferred_nick;
        let candidate = match self.collisions {
            0 => format!("{preferred}[d]"),
            n => format!("{preferred}[{n}]"),
        };
        self.collisions += 1;
        candidate
    }

    fn is_own_channel(&self, channel: &str) -> bool {
        channel.eq_ignore_ascii_case(&self.channel)
    }

    fn left_channel(&mut self) -> Vec<PuppetReaction> {
        self.state = PuppetState::Registered;
        vec![
            PuppetReaction::Ready(false),
            PuppetReaction::Send(Message::join(&self.channel)),
        ]
    }
}

impl Session for PuppetSession {
    type Reaction = PuppetReaction;

    fn on_event(&mut self, event: IrcEvent) -> Vec<PuppetReaction> {
        match event {
            IrcEvent::Registered { nick } => {
                self.state = PuppetState::Registered;
                let mut reactions = Vec::new();
                if !nick.is_empty() && nick != self.identity.nickname {
                    self.identity.nickname = nick;
                    reactions.push(PuppetReaction::NickChanged(self.identity.nickname.clone()));
                }
                reactions.push(PuppetReaction::Send(Message::join(&self.channel)));
                reactions
            }
            IrcEvent::NicknameInUse { .. } if self.state < PuppetState::Registered => {
                let candidate = self.next_candidate();
                self.identity.nickname = candidate.clone();
                vec![
                    PuppetReaction::NickChanged(candidate.clone()),
                    PuppetReaction::Send(Message::nick(&candidate)),
                ]
            }
            IrcEvent::NicknameInUse { .. } => {
                // A failed reclaim: keep the nick we have.
                self.reclaiming = false;
                Vec::new()
            }
            IrcEvent::Joined { nick, channel }
                if nick == self.identity.nickname && self.is_own_channel(&channel) =>
            {
                self.state = PuppetState::JoinedChannel;
                vec![PuppetReaction::Ready(true)]
            }
            IrcEvent::Parted { nick, channel }
                if nick == self.identity.nickname && self.is_own_channel(&channel) =>
            {
                self.left_channel()
            }
            IrcEvent::Kicked { channel, nick, .. }
                if nick == self.identity.nickname && self.is_own_channel(&channel) =>
            {
                self.left_channel()
            }
            IrcEvent::NickChanged { old, new } if old == self.identity.nickname => {
                self.identity.nickname = new.clone();
                let mut reactions = vec![PuppetReaction::NickChanged(new)];
                if self.reclaiming {
                    self.reclaiming = false;
                } else if self.identity.nickname != self.identity.preferred_nick {
                    reactions.push(PuppetReaction::ScheduleReclaim);
                }
                reactions
            }
            IrcEvent::Killed { reason } => {
                self.no_reconnect = true;
                vec![PuppetReaction::Terminated { reason }]
            }
            IrcEvent::Ping { token } => vec![PuppetReaction::Send(Message::pong(&token))],
            IrcEvent::Disconnected { .. } => {
                let was_ready = self.is_ready();
                self.state = PuppetState::Idle;
                self.reclaiming = false;
                if was_ready {
                    vec![PuppetReaction::Ready(false)]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

/// Eviction timer for a puppet whose speaker went offline.
///
/// A single optional deadline: starting always replaces the previous one, so
/// there is never more than one timer per puppet.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, deadline: None }
    }

    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Restart a running timer. A stopped timer stays stopped.
    pub fn reset(&mut self) {
        if self.deadline.is_some() {
            self.start();
        }
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves at the current deadline; never resolves while stopped.
    pub fn expired(&self) -> impl Future<Output = ()> + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        }
    }
}

/// Commands from the puppet manager to a puppet's connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PuppetCommand {
    Send(OutboundLine),
    SetOffline(bool),
    Shutdown { reason: String },
}

/// How a connection ended.
enum Exit {
    Reconnect,
    Stop,
}

/// Most lines a puppet holds while it is not in its channel.
pub const MAX_PENDING: usize = 100;

/// Sends waiting for the channel join. When full, the oldest line goes.
#[derive(Debug, Default)]
struct Backlog {
    lines: VecDeque<OutboundLine>,
}

impl Backlog {
    /// Queue `line`, returning the line dropped to make room, if any.
    fn push(&mut self, line: OutboundLine) -> Option<OutboundLine> {
        let dropped = if self.lines.len() >= MAX_PENDING {
            self.lines.pop_front()
        } else {
            None
        };
        self.lines.push_back(line);
        dropped
    }

    fn pop(&mut self) -> Option<OutboundLine> {
        self.lines.pop_front()
    }
}

/// Everything a puppet's connection task needs to start.
pub struct PuppetSpawn {
    pub speaker_id: SpeakerId,
    pub generation: u64,
    pub identity: PuppetIdentity,
    pub channel: String,
    pub idle_timeout: Duration,
    pub offline: bool,
    pub connector: Arc<dyn Connector>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Spawn a puppet's connection task and return its command handle.
///
/// Dropping every clone of the handle shuts the puppet down.
pub fn spawn_puppet(spawn: PuppetSpawn) -> mpsc::UnboundedSender<PuppetCommand> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let task = PuppetTask::new(spawn, cmd_rx);
    tokio::spawn(task.run());
    cmd_tx
}

pub struct PuppetTask {
    speaker_id: SpeakerId,
    generation: u64,
    session: PuppetSession,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<PuppetCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    idle: IdleTimer,
    offline: bool,
    pending: Backlog,
    reclaim_at: Option<Instant>,
}

impl PuppetTask {
    fn new(spawn: PuppetSpawn, commands: mpsc::UnboundedReceiver<PuppetCommand>) -> Self {
        let mut idle = IdleTimer::new(spawn.idle_timeout);
        if spawn.offline {
            idle.start();
        }
        Self {
            speaker_id: spawn.speaker_id,
            generation: spawn.generation,
            session: PuppetSession::new(spawn.identity, spawn.channel),
            connector: spawn.connector,
            commands,
            events: spawn.events,
            idle,
            offline: spawn.offline,
            pending: Backlog::default(),
            reclaim_at: None,
        }
    }

    fn report(&self, event: PuppetEvent) {
        let _ = self.events.send(SessionEvent::Puppet {
            speaker_id: self.speaker_id,
            generation: self.generation,
            event,
        });
    }

    /// Reason given to the server and the manager when the idle timer fires.
    fn idle_reason(&self) -> String {
        format!("Idle for {}", describe_duration(self.idle.timeout()))
    }

    async fn run(mut self) {
        let source = self.session.identity().address;
        info!(
            speaker_id = %self.speaker_id,
            nick = %self.session.nickname(),
            %source,
            "puppet: starting"
        );

        loop {
            self.session.begin_connect();
            let attempt = tokio::time::timeout(CONNECT_TIMEOUT, self.connector.connect(Some(source)));
            let stream = match attempt.await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(speaker_id = %self.speaker_id, remote = %self.connector.describe(),
                        "puppet: connect failed, will retry: {e}");
                    if !self.pause(RECONNECT_DELAY).await {
                        return;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(speaker_id = %self.speaker_id, remote = %self.connector.describe(),
                        "puppet: connect timed out, will retry");
                    if !self.pause(RECONNECT_DELAY).await {
                        return;
                    }
                    continue;
                }
            };

            let mut framed = Framed::new(stream, IrcCodec);
            match self.drive(&mut framed).await {
                Exit::Stop => return,
                Exit::Reconnect => {
                    if !self.pause(RECONNECT_DELAY).await {
                        return;
                    }
                }
            }
        }
    }

    /// Wait out the reconnect delay while still taking commands.
    ///
    /// Returns `false` when the puppet should exit instead of reconnecting.
    async fn pause(&mut self, delay: Duration) -> bool {
        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => return true,
                _ = self.idle.expired() => {
                    let reason = self.idle_reason();
                    info!(speaker_id = %self.speaker_id, "puppet: idle while disconnected, removing");
                    self.report(PuppetEvent::Remove { reason });
                    return false;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(PuppetCommand::Send(line)) => {
                        self.idle.reset();
                        self.queue(line);
                    }
                    Some(PuppetCommand::SetOffline(offline)) => self.set_offline(offline),
                    Some(PuppetCommand::Shutdown { .. }) | None => return false,
                },
            }
        }
    }

    fn queue(&mut self, line: OutboundLine) {
        if let Some(dropped) = self.pending.push(line) {
            debug!(speaker_id = %self.speaker_id, line = dropped.text(), "puppet: backlog full, dropping oldest");
        }
    }

    fn set_offline(&mut self, offline: bool) {
        if offline == self.offline {
            return;
        }
        self.offline = offline;
        if offline {
            debug!(speaker_id = %self.speaker_id, "puppet: speaker offline, idle timer started");
            self.idle.start();
        } else {
            debug!(speaker_id = %self.speaker_id, "puppet: speaker online, idle timer stopped");
            self.idle.stop();
        }
    }

    async fn drive(&mut self, framed: &mut Framed<IrcStream, IrcCodec>) -> Exit {
        let mut keepalive = None;
        self.reclaim_at = None;

        let registration = self.session.registration();
        match self.apply(framed, registration).await {
            Ok(None) => {}
            Ok(Some(exit)) => return exit,
            Err(e) => return self.disconnected(e.to_string()),
        }

        loop {
            let reclaim = reclaim_timer(self.reclaim_at);
            let result = tokio::select! {
                _ = keepalive_tick(&mut keepalive) => {
                    framed.send(Message::ping(self.session.nickname())).await.map(|()| None)
                }
                _ = reclaim => {
                    self.reclaim_at = None;
                    let reactions = self.session.reclaim();
                    self.apply(framed, reactions).await
                }
                _ = self.idle.expired() => {
                    let reason = self.idle_reason();
                    info!(speaker_id = %self.speaker_id, nick = %self.session.nickname(),
                        "puppet: idle timeout, disconnecting");
                    let _ = framed.send(Message::quit(&reason)).await;
                    self.report(PuppetEvent::Remove { reason });
                    return Exit::Stop;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(PuppetCommand::Send(line)) => {
                        // Outgoing text counts as activity even while offline.
                        self.idle.reset();
                        if self.session.is_ready() {
                            let channel = self.session.channel.clone();
                            framed.send(line.to_message(&channel)).await.map(|()| None)
                        } else {
                            self.queue(line);
                            Ok(None)
                        }
                    }
                    Some(PuppetCommand::SetOffline(offline)) => {
                        self.set_offline(offline);
                        Ok(None)
                    }
                    Some(PuppetCommand::Shutdown { reason }) => {
                        let _ = framed.send(Message::quit(&reason)).await;
                        return Exit::Stop;
                    }
                    None => {
                        let _ = framed.send(Message::quit("Bridge shutting down")).await;
                        return Exit::Stop;
                    }
                },
                frame = framed.next() => match frame {
                    Some(Ok(msg)) => {
                        let event = IrcEvent::from_message(&msg, self.session.nickname());
                        if let IrcEvent::Error { reason } = &event {
                            warn!(speaker_id = %self.speaker_id, "puppet: server error: {reason}");
                        }
                        let reactions = self.session.on_event(event);
                        self.apply(framed, reactions).await
                    }
                    Some(Err(e)) => Err(e),
                    None => return self.disconnected("connection closed".into()),
                },
            };

            match result {
                Ok(Some(exit)) => return exit,
                Ok(None) => {}
                Err(e) => return self.disconnected(e.to_string()),
            }

            if keepalive.is_none() && self.session.state() >= PuppetState::Registered {
                keepalive = Some(start_keepalive());
            }
        }
    }

    /// Carry out session reactions. `Some(exit)` ends the connection.
    async fn apply(
        &mut self,
        framed: &mut Framed<IrcStream, IrcCodec>,
        reactions: Vec<PuppetReaction>,
    ) -> Result<Option<Exit>, CodecError> {
        for reaction in reactions {
            match reaction {
                PuppetReaction::Send(msg) => framed.send(msg).await?,
                PuppetReaction::Ready(ready) => {
                    if ready {
                        info!(speaker_id = %self.speaker_id, nick = %self.session.nickname(),
                            channel = %self.session.channel, "puppet: joined");
                        while let Some(line) = self.pending.pop() {
                            framed.send(line.to_message(&self.session.channel)).await?;
                        }
                    }
                    self.report(PuppetEvent::Ready(ready));
                }
                PuppetReaction::NickChanged(nick) => {
                    debug!(speaker_id = %self.speaker_id, %nick, "puppet: nick changed");
                    self.report(PuppetEvent::NickChanged(nick));
                }
                PuppetReaction::ScheduleReclaim => {
                    self.reclaim_at = Some(Instant::now() + RECLAIM_DELAY);
                }
                PuppetReaction::Terminated { reason } => {
                    warn!(speaker_id = %self.speaker_id, nick = %self.session.nickname(),
                        "puppet: killed by server: {reason}");
                    self.report(PuppetEvent::Remove { reason });
                    return Ok(Some(Exit::Stop));
                }
            }
        }
        Ok(None)
    }

    fn disconnected(&mut self, reason: String) -> Exit {
        info!(speaker_id = %self.speaker_id, "puppet: disconnected: {reason}");
        let reactions = self.session.on_event(IrcEvent::Disconnected { reason });
        for reaction in reactions {
            if let PuppetReaction::Ready(ready) = reaction {
                self.report(PuppetEvent::Ready(ready));
            }
        }
        if self.session.no_reconnect() {
            Exit::Stop
        } else {
            Exit::Reconnect
        }
    }
}

async fn reclaim_timer(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// `2 days`, `90 minutes`, `1 hour`, `45 seconds`.
fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (n, unit) = if secs >= 86_400 && secs % 86_400 == 0 {
        (secs / 86_400, "day")
    } else if secs >= 3_600 && secs % 3_600 == 0 {
        (secs / 3_600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    let plural = if n == 1 { "" } else { "s" };
    format!("{n} {unit}{plural}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::identity::PuppetRange;
    use crate::irc::testing::MemoryConnector;
    use pretty_assertions::assert_eq;

    fn identity(name: &str) -> PuppetIdentity {
        let range: PuppetRange = "2001:db8::/80".parse().unwrap();
        PuppetIdentity::derive(name, "", &range)
    }

    fn registered(name: &str) -> PuppetSession {
        let mut session = PuppetSession::new(identity(name), "#chan");
        session.begin_connect();
        session.registration();
        session.on_event(IrcEvent::Registered { nick: name.into() });
        session
    }

    fn sent(reactions: &[PuppetReaction]) -> Vec<String> {
        reactions
            .iter()
            .filter_map(|r| match r {
                PuppetReaction::Send(msg) => Some(msg.to_wire()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn registration_sends_nick_and_user() {
        let mut session = PuppetSession::new(identity("Bob!!!"), "#chan");
        session.begin_connect();
        assert_eq!(session.state(), PuppetState::Resolving);
        let reactions = session.registration();
        assert_eq!(session.state(), PuppetState::Connecting);
        assert_eq!(sent(&reactions), vec!["NICK :Bob", "USER Bob 0 * :Bob"]);
    }

    #[test]
    fn backlog_drops_oldest_when_full() {
        let mut backlog = Backlog::default();
        for n in 0..MAX_PENDING {
            assert_eq!(backlog.push(OutboundLine::Message(n.to_string())), None);
        }
        assert_eq!(
            backlog.push(OutboundLine::Message("late".into())),
            Some(OutboundLine::Message("0".into()))
        );
        assert_eq!(backlog.pop(), Some(OutboundLine::Message("1".into())));
        let rest: Vec<_> = std::iter::from_fn(|| backlog.pop()).collect();
        assert_eq!(rest.len(), MAX_PENDING - 1);
        assert_eq!(rest.last(), Some(&OutboundLine::Message("late".into())));
    }

    #[test]
    fn collision_suffixes_decorate_then_count() {
        let mut session = PuppetSession::new(identity("x"), "#chan");
        session.registration();

        let mut tried = Vec::new();
        for _ in 0..3 {
            let reactions = session.on_event(IrcEvent::NicknameInUse { nick: "x".into() });
            tried.extend(sent(&reactions));
        }
        assert_eq!(tried, vec!["NICK :x[d]", "NICK :x[1]", "NICK :x[2]"]);
        assert_eq!(session.nickname(), "x[2]");
    }

    #[test]
    fn register_then_join_marks_ready() {
        let mut session = PuppetSession::new(identity("Bob"), "#chan");
        session.registration();
        let reactions = session.on_event(IrcEvent::Registered { nick: "Bob".into() });
        assert_eq!(sent(&reactions), vec!["JOIN :#chan"]);
        assert!(!session.is_ready());

        // Someone else joining changes nothing.
        let reactions = session.on_event(IrcEvent::Joined { nick: "Eve".into(), channel: "#chan".into() });
        assert!(reactions.is_empty());

        let reactions = session.on_event(IrcEvent::Joined { nick: "Bob".into(), channel: "#Chan".into() });
        assert_eq!(reactions, vec![PuppetReaction::Ready(true)]);
        assert!(session.is_ready());
    }

    #[test]
    fn kicked_rejoins() {
        let mut session = registered("Bob");
        session.on_event(IrcEvent::Joined { nick: "Bob".into(), channel: "#chan".into() });
        let reactions = session.on_event(IrcEvent::Kicked {
            channel: "#chan".into(),
            nick: "Bob".into(),
            by: "op".into(),
        });
        assert_eq!(reactions[0], PuppetReaction::Ready(false));
        assert_eq!(sent(&reactions), vec!["JOIN :#chan"]);
        assert_eq!(session.state(), PuppetState::Registered);
    }

    #[test]
    fn kill_terminates_without_reconnect() {
        let mut session = registered("Bob");
        let reactions = session.on_event(IrcEvent::Killed { reason: "spam".into() });
        assert_eq!(reactions, vec![PuppetReaction::Terminated { reason: "spam".into() }]);
        assert!(session.no_reconnect());
    }

    #[test]
    fn forced_rename_schedules_reclaim() {
        let mut session = registered("Bob");
        let reactions = session.on_event(IrcEvent::NickChanged { old: "Bob".into(), new: "Guest42".into() });
        assert_eq!(
            reactions,
            vec![PuppetReaction::NickChanged("Guest42".into()), PuppetReaction::ScheduleReclaim]
        );

        let reactions = session.reclaim();
        assert_eq!(sent(&reactions), vec!["NICK :Bob"]);

        // Reclaim refused: stay on the current nick, no retry.
        let reactions = session.on_event(IrcEvent::NicknameInUse { nick: "Bob".into() });
        assert!(reactions.is_empty());
        assert_eq!(session.nickname(), "Guest42");
    }

    #[test]
    fn successful_reclaim_does_not_reschedule() {
        let mut session = registered("Bob");
        session.on_event(IrcEvent::NickChanged { old: "Bob".into(), new: "Guest42".into() });
        session.reclaim();
        let reactions = session.on_event(IrcEvent::NickChanged { old: "Guest42".into(), new: "Bob".into() });
        assert_eq!(reactions, vec![PuppetReaction::NickChanged("Bob".into())]);
        assert!(session.reclaim().is_empty());
    }

    #[test]
    fn disconnect_clears_ready() {
        let mut session = registered("Bob");
        session.on_event(IrcEvent::Joined { nick: "Bob".into(), channel: "#chan".into() });
        let reactions = session.on_event(IrcEvent::Disconnected { reason: "eof".into() });
        assert_eq!(reactions, vec![PuppetReaction::Ready(false)]);
        assert_eq!(session.state(), PuppetState::Idle);
        assert!(!session.no_reconnect());
    }

    #[test]
    fn ping_pongs_same_token() {
        let mut session = registered("Bob");
        let reactions = session.on_event(IrcEvent::Ping { token: "abc".into() });
        assert_eq!(sent(&reactions), vec!["PONG :abc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_reset_restarts_deadline() {
        let mut timer = IdleTimer::new(Duration::from_secs(60));
        assert!(!timer.is_running());
        timer.reset();
        assert!(!timer.is_running(), "reset must not start a stopped timer");

        timer.start();
        tokio::time::advance(Duration::from_secs(50)).await;
        timer.reset();
        tokio::time::advance(Duration::from_secs(50)).await;

        // 100s since start, but only 50s since the reset.
        let fired = tokio::time::timeout(Duration::from_secs(1), timer.expired()).await;
        assert!(fired.is_err());

        let fired = tokio::time::timeout(Duration::from_secs(20), timer.expired()).await;
        assert!(fired.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_fires() {
        let mut timer = IdleTimer::new(Duration::from_secs(1));
        timer.start();
        timer.stop();
        let fired = tokio::time::timeout(Duration::from_secs(3600), timer.expired()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe_duration(Duration::from_secs(2 * 86_400)), "2 days");
        assert_eq!(describe_duration(Duration::from_secs(3_600)), "1 hour");
        assert_eq!(describe_duration(Duration::from_secs(90 * 60)), "90 minutes");
        assert_eq!(describe_duration(Duration::from_secs(45)), "45 seconds");
    }

    struct Harness {
        commands: mpsc::UnboundedSender<PuppetCommand>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        accepted: mpsc::UnboundedReceiver<crate::irc::testing::Accepted>,
    }

    fn spawn_test_puppet(name: &str, offline: bool, idle: Duration) -> Harness {
        let (connector, accepted) = MemoryConnector::new();
        let (events_tx, events) = mpsc::unbounded_channel();
        let commands = spawn_puppet(PuppetSpawn {
            speaker_id: SpeakerId(42),
            generation: 1,
            identity: identity(name),
            channel: "#chan".into(),
            idle_timeout: idle,
            offline,
            connector,
            events: events_tx,
        });
        Harness { commands, events, accepted }
    }

    async fn next_puppet_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> PuppetEvent {
        match events.recv().await {
            Some(SessionEvent::Puppet { speaker_id, generation, event }) => {
                assert_eq!((speaker_id, generation), (SpeakerId(42), 1));
                event
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn queued_sends_flush_after_join() {
        let mut h = spawn_test_puppet("Bob", false, Duration::from_secs(3600));
        h.commands.send(PuppetCommand::Send(OutboundLine::Message("hello".into()))).unwrap();
        h.commands.send(PuppetCommand::Send(OutboundLine::Action("waves".into()))).unwrap();

        let mut server = h.accepted.recv().await.unwrap();
        let range: PuppetRange = "2001:db8::/80".parse().unwrap();
        assert_eq!(server.source, Some(range.address_for("Bob")));
        assert_eq!(server.recv().await, "NICK :Bob");
        assert_eq!(server.recv().await, "USER Bob 0 * :Bob");
        server.send(":srv 001 Bob :Welcome").await;
        assert_eq!(server.recv().await, "JOIN :#chan");
        server.send(":Bob!Bob@host JOIN :#chan").await;

        assert_eq!(server.recv().await, "PRIVMSG #chan :hello");
        assert_eq!(server.recv().await, "PRIVMSG #chan :\u{1}ACTION waves\u{1}");
        assert_eq!(next_puppet_event(&mut h.events).await, PuppetEvent::Ready(true));

        h.commands.send(PuppetCommand::Send(OutboundLine::Message("again".into()))).unwrap();
        assert_eq!(server.recv().await, "PRIVMSG #chan :again");
    }

    #[tokio::test]
    async fn kill_reports_removal() {
        let mut h = spawn_test_puppet("Bob", false, Duration::from_secs(3600));
        let mut server = h.accepted.recv().await.unwrap();
        server.recv().await;
        server.recv().await;
        server.send(":srv 001 Bob :Welcome").await;
        server.send(":oper!o@h KILL Bob :flooding").await;

        assert_eq!(
            next_puppet_event(&mut h.events).await,
            PuppetEvent::Remove { reason: "flooding".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn offline_speaker_is_evicted_after_timeout() {
        let idle = Duration::from_secs(600);
        let mut h = spawn_test_puppet("Bob", false, idle);
        let mut server = h.accepted.recv().await.unwrap();
        server.recv().await;
        server.recv().await;
        server.send(":srv 001 Bob :Welcome").await;
        assert_eq!(server.recv().await, "JOIN :#chan");
        server.send(":Bob!Bob@host JOIN :#chan").await;
        assert_eq!(next_puppet_event(&mut h.events).await, PuppetEvent::Ready(true));

        h.commands.send(PuppetCommand::SetOffline(true)).unwrap();
        tokio::time::sleep(Duration::from_secs(500)).await;
        h.commands.send(PuppetCommand::Send(OutboundLine::Message("still here".into()))).unwrap();
        assert_eq!(server.recv().await, "PRIVMSG #chan :still here");

        // 500s after the send the restarted timer has not fired yet.
        tokio::time::sleep(Duration::from_secs(500)).await;
        assert!(h.events.try_recv().is_err());

        assert_eq!(server.recv().await, "QUIT :Idle for 10 minutes");
        assert_eq!(
            next_puppet_event(&mut h.events).await,
            PuppetEvent::Remove { reason: "Idle for 10 minutes".into() }
        );
    }
}
