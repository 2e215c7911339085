use std::path::PathBuf;

use crate::config::ConfigError;

/// Errors that end the process.
///
/// IRC connectivity problems never show up here: connections retry on
/// their own and are only logged.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("chat channel is unreachable: {0}")]
    ChannelUnreachable(String),
    #[error("failed to bind chat socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
