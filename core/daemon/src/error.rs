//! Error types for the bridge.
//!
//! Only `BridgeError` ever reaches the process boundary. Downstream failures
//! are logged where they happen and never stop the session.

use std::path::PathBuf;

/// Fatal conditions that end the process.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Pathfinder authentication failed")]
    Authentication,

    #[error("Pathfinder session unrecoverable after {attempts} attempt(s): {source}")]
    TransportRead {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Startup failed: {context}: {source}")]
    Setup {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {details}")]
    Parse { path: PathBuf, details: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures talking to the UDP target or the playout control socket.
#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("{step} failed: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} timed out")]
    Timeout { step: &'static str },

    #[error("{step}: peer closed the connection")]
    Closed { step: &'static str },
}

impl DownstreamError {
    pub fn from_io(step: &'static str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                DownstreamError::Timeout { step }
            }
            _ => DownstreamError::Io { step, source: err },
        }
    }
}
