//! The IRC context.
//!
//! One task owns the relay core, the puppet table, the main connection's
//! command handle and the outage state. It handles one unit of work at a
//! time: either a command scheduled by the chat context or an event
//! reported by a connection task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::identity::sanitize_nickname;
use super::puppets::{PuppetManager, PuppetStatus};
use super::session::{spawn_main, MainCommand, MainSession};
use super::transport::Connector;
use super::{MainEvent, PuppetEvent, SessionEvent};
use crate::bridge::{ChatHandle, IrcCommand};
use crate::chat::{ChatMessage, Mention, SpeakerId};
use crate::config::BridgeConfig;
use crate::relay::mention::render_mentions;
use crate::relay::{ChatLine, Relay};

pub const INACTIVE_NOTICE: &str =
    ":warning: IRC bridge isn't active; messages will not be delivered :warning:";
pub const ACTIVE_NOTICE: &str = ":white_check_mark: IRC bridge is now active :white_check_mark:";

const QUIT_REASON: &str = "Bridge shutting down";

/// How long the main connection gets to say goodbye on shutdown.
const QUIT_GRACE: Duration = Duration::from_secs(2);

/// One "inactive" notice per outage, one "active" notice when it ends.
#[derive(Debug, Default)]
struct OutageNotice {
    notified: bool,
}

impl OutageNotice {
    /// A message was dropped; `true` if the notice must go out now.
    fn message_dropped(&mut self) -> bool {
        !std::mem::replace(&mut self.notified, true)
    }

    /// The bridge is back; `true` if users were told it was not.
    fn recovered(&mut self) -> bool {
        std::mem::take(&mut self.notified)
    }
}

pub struct IrcContext {
    config: Arc<BridgeConfig>,
    relay: Relay,
    puppets: Option<PuppetManager>,
    main: mpsc::UnboundedSender<MainCommand>,
    main_task: JoinHandle<()>,
    main_joined: bool,
    outage: OutageNotice,
    chat: ChatHandle,
    commands: mpsc::UnboundedReceiver<IrcCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl IrcContext {
    /// Start the main connection and build the context around it.
    pub fn start(
        config: Arc<BridgeConfig>,
        connector: Arc<dyn Connector>,
        chat: ChatHandle,
        commands: mpsc::UnboundedReceiver<IrcCommand>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();

        let puppets = config
            .puppet_settings()
            .map(|settings| PuppetManager::new(settings, Arc::clone(&connector), events_tx.clone()));
        match &config.puppet_range {
            Some(range) => info!(%range, "irc: relaying through puppets"),
            None => info!("irc: no puppet range, relaying through the bridge nick"),
        }

        let (main, main_task) = spawn_main(
            MainSession::new(config.irc_nick.clone(), config.channel.clone()),
            connector,
            events_tx,
        );

        Self {
            relay: Relay::new(config.line_limit, &config.ignore_list),
            config,
            puppets,
            main,
            main_task,
            main_joined: false,
            outage: OutageNotice::default(),
            chat,
            commands,
            events,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(IrcCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        info!("irc: shutting down");
        if let Some(puppets) = &mut self.puppets {
            puppets.shutdown_all(QUIT_REASON);
        }
        let _ = self.main.send(MainCommand::Shutdown {
            reason: QUIT_REASON.to_owned(),
        });
        let _ = tokio::time::timeout(QUIT_GRACE, self.main_task).await;
    }

    fn handle_command(&mut self, command: IrcCommand) {
        match command {
            IrcCommand::Relay(message) => self.relay_from_chat(message),
            IrcCommand::Presence { speaker_id, is_offline } => {
                if let Some(puppets) = &mut self.puppets {
                    puppets.update_status(speaker_id, is_offline);
                }
            }
            IrcCommand::Status { reply } => {
                let _ = reply.send(self.status_text());
            }
            IrcCommand::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Main(MainEvent::Membership(joined)) => self.set_main_joined(joined),
            SessionEvent::Main(MainEvent::Relay { nick, text, is_action }) => {
                let known: Vec<(&str, SpeakerId)> = match &self.puppets {
                    Some(puppets) => puppets.nicknames().collect(),
                    None => Vec::new(),
                };
                if let Some(line) = self.relay.to_chat(&nick, &text, is_action, &known) {
                    self.deliver(line);
                }
            }
            SessionEvent::Main(MainEvent::MemberLeft { nick }) => {
                if let Some(line) = self.relay.member_left(&nick) {
                    self.deliver(line);
                }
            }
            SessionEvent::Puppet { speaker_id, generation, event } => {
                let Some(puppets) = &mut self.puppets else {
                    return;
                };
                match event {
                    PuppetEvent::NickChanged(nick) => puppets.set_nickname(speaker_id, generation, nick),
                    PuppetEvent::Ready(ready) => puppets.set_ready(speaker_id, generation, ready),
                    PuppetEvent::Remove { reason } => {
                        if puppets.remove(speaker_id, generation) {
                            info!(%speaker_id, generation, reason, "irc: puppet removed");
                        }
                    }
                }
            }
        }
    }

    fn set_main_joined(&mut self, joined: bool) {
        if joined == self.main_joined {
            return;
        }
        self.main_joined = joined;
        if joined {
            info!(channel = %self.config.channel, "irc: joined");
            if self.outage.recovered() {
                self.chat.send_system(ACTIVE_NOTICE);
            }
            self.chat.set_presence(&format!("{} on IRC", self.config.channel));
        } else {
            info!(channel = %self.config.channel, "irc: no longer in channel");
        }
    }

    fn deliver(&self, line: ChatLine) {
        if line.is_action {
            self.chat.send_action(&line.nick, &line.text);
        } else {
            self.chat.send_as(&line.nick, &line.text);
        }
    }

    fn relay_from_chat(&mut self, message: ChatMessage) {
        if !self.main_joined {
            debug!(speaker_id = %message.speaker_id, "irc: bridge inactive, dropping message");
            if self.outage.message_dropped() {
                self.chat.send_system(INACTIVE_NOTICE);
            }
            return;
        }

        let mut text = render_mentions(&message.raw_text, &message.mentions, |mention| {
            mention_nick(self.puppets.as_ref(), mention)
        });
        if let Some(target) = self.reply_target(&message) {
            let addressed = format!("{target}: ");
            if !text.starts_with(&addressed) {
                text = format!("{addressed}{text}");
            }
        }

        for url in &message.attachment_urls {
            self.say(message.speaker_id, &message.display_name, url);
        }
        if !text.trim().is_empty() {
            self.say(message.speaker_id, &message.display_name, &text);
        }

        if let Some(puppets) = &mut self.puppets {
            puppets.update_status(message.speaker_id, message.is_offline);
        }
    }

    /// Nick to address a reply to, when the replied-to speaker is known.
    fn reply_target(&self, message: &ChatMessage) -> Option<String> {
        if !message.is_reply {
            return None;
        }
        let target = message.reply_target_display_name.as_deref()?;
        match &self.puppets {
            Some(puppets) => puppets.nick_for_display_name(target).map(str::to_owned),
            None => Some(target.to_owned()),
        }
    }

    fn say(&mut self, speaker_id: SpeakerId, display_name: &str, text: &str) {
        match &mut self.puppets {
            Some(puppets) => {
                for line in self.relay.to_line_protocol(None, text, false) {
                    puppets.send(speaker_id, display_name, line);
                }
            }
            None => {
                for line in self.relay.to_line_protocol(Some(display_name), text, false) {
                    let _ = self.main.send(MainCommand::Say(line));
                }
            }
        }
    }

    fn status_text(&self) -> String {
        status_text(
            self.main_joined,
            &self.config.irc_host,
            &self.config.channel,
            self.puppets.as_ref().map(PuppetManager::status),
        )
    }
}

/// Nick a user mention renders as: the speaker's puppet nick when there is
/// one, otherwise what their nick would be.
fn mention_nick(puppets: Option<&PuppetManager>, mention: &Mention) -> String {
    match (puppets, mention.speaker_id) {
        (Some(puppets), Some(speaker_id)) => puppets.resolve_display_name(speaker_id, &mention.name),
        _ => sanitize_nickname(&mention.name),
    }
}

fn status_text(joined: bool, host: &str, channel: &str, puppets: Option<PuppetStatus>) -> String {
    let mut status = if joined {
        format!(":green_circle: **IRC** listening on `{host}` in `{channel}`\n")
    } else {
        ":red_circle: **IRC** not connected\n".to_owned()
    };
    if let Some(puppets) = puppets.filter(|p| p.connections > 0) {
        status.push('\n');
        status.push_str(&format!(
            "**{}** IRC connections, **{}** connected\n",
            puppets.connections, puppets.joined
        ));
    }
    status
}
