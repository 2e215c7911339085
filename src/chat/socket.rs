//! Unix socket endpoint for the chat gateway client.
//!
//! Newline-delimited JSON both ways: the client sends [`ChatEvent`]s, the
//! bridge streams [`ChatCommand`]s to every connected client. Work arriving
//! from a client is scheduled onto the IRC context and never awaited here;
//! status queries wait for their reply on a task of their own.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ChatCommand, ChatEvent};
use crate::bridge::IrcHandle;
use crate::error::BridgeError;

/// Run the chat context until the command queue closes.
///
/// Fails when the socket cannot be bound or a client reports the chat
/// channel as unreachable; both are fatal to the bridge.
pub async fn serve(
    path: &Path,
    irc: IrcHandle,
    mut commands: mpsc::UnboundedReceiver<ChatCommand>,
) -> Result<(), BridgeError> {
    // Stale socket from a previous run.
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path).map_err(|source| BridgeError::Bind {
        path: path.to_owned(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660));
    }

    info!(path = %path.display(), "chat: listening");

    let mut clients: Vec<mpsc::UnboundedSender<String>> = Vec::new();
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<String>();
    // Status replies, produced here rather than by the IRC context.
    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel::<ChatCommand>();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _)) => {
                    info!("chat: client connected");
                    let (read_half, write_half) = stream.into_split();
                    let (tx, rx) = mpsc::unbounded_channel();
                    clients.push(tx);
                    tokio::spawn(client_writer(write_half, rx));
                    tokio::spawn(client_reader(read_half, irc.clone(), replies_tx.clone(), fatal_tx.clone()));
                }
                Err(e) => warn!("chat: accept error: {e}"),
            },

            command = commands.recv() => {
                let Some(command) = command else {
                    info!("chat: command queue closed, stopping");
                    return Ok(());
                };
                broadcast(&mut clients, &command);
            }

            Some(reply) = replies_rx.recv() => broadcast(&mut clients, &reply),

            Some(reason) = fatal_rx.recv() => {
                return Err(BridgeError::ChannelUnreachable(reason));
            }
        }
    }
}

/// Send `command` to every client, forgetting the ones that went away.
fn broadcast(clients: &mut Vec<mpsc::UnboundedSender<String>>, command: &ChatCommand) {
    let line = match serde_json::to_string(command) {
        Ok(line) => line,
        Err(e) => {
            warn!("chat: failed to encode {command:?}: {e}");
            return;
        }
    };
    if clients.is_empty() {
        debug!(line, "chat: no client connected, dropping");
    }
    clients.retain(|client| client.send(line.clone()).is_ok());
}

async fn client_writer(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let buf = format!("{line}\n");
        if writer.write_all(buf.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn client_reader(
    reader: OwnedReadHalf,
    irc: IrcHandle,
    replies: mpsc::UnboundedSender<ChatCommand>,
    fatal: mpsc::UnboundedSender<String>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("chat: read error: {e}");
                break;
            }
        }
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<ChatEvent>(line) {
            Ok(event) => dispatch(event, &irc, &replies, &fatal),
            Err(e) => warn!("chat: bad event: {e}"),
        }
    }
    info!("chat: client disconnected");
}

fn dispatch(
    event: ChatEvent,
    irc: &IrcHandle,
    replies: &mpsc::UnboundedSender<ChatCommand>,
    fatal: &mpsc::UnboundedSender<String>,
) {
    match event {
        ChatEvent::Message(message) => irc.relay(message),
        ChatEvent::Presence { speaker_id, is_offline } => irc.presence(speaker_id, is_offline),
        ChatEvent::Status => {
            let irc = irc.clone();
            let replies = replies.clone();
            tokio::spawn(async move {
                if let Some(text) = irc.status().await {
                    let _ = replies.send(ChatCommand::Status { text });
                }
            });
        }
        ChatEvent::ChannelUnreachable { reason } => {
            warn!(reason, "chat: channel unreachable");
            let _ = fatal.send(reason);
        }
    }
}
