use std::path::PathBuf;

use thiserror::Error;

use crate::types::SessionState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid { reason: reason.into() }
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("No usable network interface to derive a unique id from")]
    NoNetworkInterface,

    #[error("Identity material could not be created: {0}")]
    Crypto(String),

    #[error("Identity store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// User-correctable pairing outcomes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairFailure {
    #[error("Incorrect PIN")]
    PinWrong,

    #[error("Pairing rejected by host")]
    Rejected,

    #[error("Timed out waiting for the PIN to be entered on the host")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("Host rejected the client certificate")]
    Unauthorized,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Pairing failed: {0}")]
    Pair(#[from] PairFailure),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ControlError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol(detail.into())
    }
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input device {path} could not be found")]
    NotFound { path: PathBuf },

    #[error("Input device {path} could not be read (try running as root or joining the input group)")]
    Denied { path: PathBuf },

    #[error("Input device {path} is grabbed by another process")]
    Busy { path: PathBuf },

    #[error("Input device {path} is not a keyboard, mouse or gamepad")]
    Unsupported { path: PathBuf },

    #[error("No input device could be read")]
    NoDevices,

    #[error("Gamepad mapping line {line}: {reason}")]
    Mapping { line: usize, reason: String },

    #[error("Input IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("No usable decoder available: {0}")]
    Unavailable(String),

    #[error("GStreamer pipeline error: {0}")]
    Pipeline(String),

    #[error("Sink used before setup")]
    NotInitialized,

    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("RTSP {request} failed: {reason}")]
    Rtsp { request: String, reason: String },

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Environment unsuitable: {}", failures.join("; "))]
    EnvironmentUnsuitable { failures: Vec<String> },

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Operation not allowed in state {state:?}")]
    InvalidState { state: SessionState },
}
