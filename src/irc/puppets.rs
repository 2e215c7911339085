//! The puppet table.
//!
//! Owned by the IRC context and only ever touched from its task, so it is a
//! plain map. Puppets are keyed by speaker id, not by name: a speaker who
//! renames keeps their puppet until it is evicted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::identity::{sanitize_nickname, PuppetIdentity, PuppetRange};
use super::message::OutboundLine;
use super::puppet::{spawn_puppet, PuppetCommand, PuppetSpawn};
use super::transport::Connector;
use super::SessionEvent;
use crate::chat::SpeakerId;

/// Settings shared by every puppet.
#[derive(Debug, Clone)]
pub struct PuppetSettings {
    pub range: PuppetRange,
    pub postfix: String,
    pub channel: String,
    pub idle_timeout: Duration,
}

/// The manager's view of one running puppet.
#[derive(Debug)]
pub struct PuppetHandle {
    commands: mpsc::UnboundedSender<PuppetCommand>,
    generation: u64,
    display_name: String,
    nickname: String,
    ready: bool,
    offline: bool,
}

impl PuppetHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PuppetStatus {
    pub connections: usize,
    pub joined: usize,
}

pub struct PuppetManager {
    settings: PuppetSettings,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<SessionEvent>,
    puppets: BTreeMap<SpeakerId, PuppetHandle>,
    next_generation: u64,
}

impl PuppetManager {
    pub fn new(
        settings: PuppetSettings,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            settings,
            connector,
            events,
            puppets: BTreeMap::new(),
            next_generation: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.puppets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puppets.is_empty()
    }

    pub fn get(&self, speaker_id: SpeakerId) -> Option<&PuppetHandle> {
        self.puppets.get(&speaker_id)
    }

    /// The speaker's puppet, connecting a new one if there is none.
    pub fn get_or_create(&mut self, speaker_id: SpeakerId, display_name: &str) -> &PuppetHandle {
        let settings = &self.settings;
        let connector = &self.connector;
        let events = &self.events;
        let next_generation = &mut self.next_generation;

        let handle = self.puppets.entry(speaker_id).or_insert_with(|| {
            let identity = PuppetIdentity::derive(display_name, &settings.postfix, &settings.range);
            let generation = *next_generation;
            *next_generation += 1;
            info!(%speaker_id, generation, nick = %identity.nickname, address = %identity.address,
                "puppets: creating puppet");

            let nickname = identity.nickname.clone();
            let commands = spawn_puppet(PuppetSpawn {
                speaker_id,
                generation,
                identity,
                channel: settings.channel.clone(),
                idle_timeout: settings.idle_timeout,
                offline: false,
                connector: Arc::clone(connector),
                events: events.clone(),
            });
            PuppetHandle {
                commands,
                generation,
                display_name: display_name.to_owned(),
                nickname,
                ready: false,
                offline: false,
            }
        });
        display_name.clone_into(&mut handle.display_name);
        handle
    }

    /// Send a line as the speaker, creating the puppet on first use.
    ///
    /// A puppet whose task already ended (killed, evicted) but whose removal
    /// has not been processed yet is replaced on the spot.
    pub fn send(&mut self, speaker_id: SpeakerId, display_name: &str, line: OutboundLine) {
        let line = match self.get_or_create(speaker_id, display_name).commands.send(PuppetCommand::Send(line)) {
            Ok(()) => return,
            Err(mpsc::error::SendError(PuppetCommand::Send(line))) => line,
            Err(_) => return,
        };
        debug!(%speaker_id, "puppets: puppet task gone, replacing");
        self.puppets.remove(&speaker_id);
        let _ = self
            .get_or_create(speaker_id, display_name)
            .commands
            .send(PuppetCommand::Send(line));
    }

    /// Drop a puppet, unless it has already been replaced by a newer one.
    pub fn remove(&mut self, speaker_id: SpeakerId, generation: u64) -> bool {
        match self.puppets.get(&speaker_id) {
            Some(handle) if handle.generation == generation => {
                self.puppets.remove(&speaker_id);
                true
            }
            _ => false,
        }
    }

    /// Nick to show for a speaker: the live puppet's, or what theirs would be.
    pub fn resolve_display_name(&self, speaker_id: SpeakerId, display_name: &str) -> String {
        match self.puppets.get(&speaker_id) {
            Some(handle) => handle.nickname.clone(),
            None => format!("{}{}", sanitize_nickname(display_name), self.settings.postfix),
        }
    }

    /// Live nick of the puppet last seen under `display_name`.
    pub fn nick_for_display_name(&self, display_name: &str) -> Option<&str> {
        self.puppets
            .values()
            .find(|handle| handle.display_name == display_name)
            .map(|handle| handle.nickname.as_str())
    }

    /// Forward the speaker's presence; no-op when unknown or unchanged.
    pub fn update_status(&mut self, speaker_id: SpeakerId, is_offline: bool) {
        let Some(handle) = self.puppets.get_mut(&speaker_id) else {
            return;
        };
        if handle.offline == is_offline {
            return;
        }
        handle.offline = is_offline;
        let _ = handle.commands.send(PuppetCommand::SetOffline(is_offline));
    }

    pub fn set_nickname(&mut self, speaker_id: SpeakerId, generation: u64, nickname: String) {
        if let Some(handle) = self.current_mut(speaker_id, generation) {
            handle.nickname = nickname;
        }
    }

    pub fn set_ready(&mut self, speaker_id: SpeakerId, generation: u64, ready: bool) {
        if let Some(handle) = self.current_mut(speaker_id, generation) {
            handle.ready = ready;
        }
    }

    fn current_mut(&mut self, speaker_id: SpeakerId, generation: u64) -> Option<&mut PuppetHandle> {
        self.puppets
            .get_mut(&speaker_id)
            .filter(|handle| handle.generation == generation)
    }

    /// Every live puppet nick with its owner.
    pub fn nicknames(&self) -> impl Iterator<Item = (&str, SpeakerId)> {
        self.puppets
            .iter()
            .map(|(speaker_id, handle)| (handle.nickname.as_str(), *speaker_id))
    }

    pub fn is_puppet_nick(&self, nick: &str) -> bool {
        self.puppets.values().any(|handle| handle.nickname == nick)
    }

    pub fn status(&self) -> PuppetStatus {
        PuppetStatus {
            connections: self.puppets.len(),
            joined: self.puppets.values().filter(|handle| handle.ready).count(),
        }
    }

    /// Disconnect every puppet with `reason` and forget them.
    pub fn shutdown_all(&mut self, reason: &str) {
        for (_, handle) in std::mem::take(&mut self.puppets) {
            let _ = handle.commands.send(PuppetCommand::Shutdown {
                reason: reason.to_owned(),
            });
        }
    }
}
