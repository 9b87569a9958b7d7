// Error types for the honeypot lab
// Configuration failures are fatal for the supervisor; service failures end a worker

use std::path::PathBuf;
use thiserror::Error;

use crate::honeypot::traits::Protocol;

/// Settings could not be produced from the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// A decoy service could not run
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("host key unavailable: {0}")]
    HostKey(String),

    #[error("no {0} handler compiled into this build")]
    HandlerUnavailable(Protocol),
}

/// A worker process could not be started, signalled or reaped
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty worker command line")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send {signal} to process group {pgid}: {source}")]
    Signal {
        signal: &'static str,
        pgid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}
