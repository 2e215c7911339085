//! Relay a chat-service channel to an IRC channel.
//!
//! Two long-lived contexts do the work: the IRC context (main connection,
//! puppets, relay core) and the chat context (the gateway socket). They
//! talk through the queues in [`bridge`].

pub mod bridge;
pub mod chat;
pub mod config;
pub mod error;
pub mod irc;
pub mod relay;

use std::sync::Arc;

use tracing::{info, warn};

use bridge::{chat_queue, irc_queue};
use config::BridgeConfig;
use error::BridgeError;
use irc::context::IrcContext;
use irc::transport::{Connector, TcpConnector};

/// Run the bridge until interrupted or until the chat side fails.
pub async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    let config = Arc::new(config);
    let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new(config.irc_host.clone(), config.irc_port));
    info!(remote = %connector.describe(), channel = %config.channel, "bridge: starting");

    let (irc, irc_rx) = irc_queue();
    let (chat_handle, chat_rx) = chat_queue();

    let context = IrcContext::start(Arc::clone(&config), connector, chat_handle, irc_rx);
    let irc_task = tokio::spawn(context.run());

    let result = tokio::select! {
        result = chat::socket::serve(&config.chat_socket, irc.clone(), chat_rx) => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("bridge: failed to listen for ctrl-c: {e}");
            }
            info!("bridge: interrupted");
            Ok(())
        }
    };

    irc.shutdown();
    if let Err(e) = irc_task.await {
        warn!("bridge: IRC context panicked: {e}");
    }
    let _ = std::fs::remove_file(&config.chat_socket);
    result
}
