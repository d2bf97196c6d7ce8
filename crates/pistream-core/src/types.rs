use bytes::Bytes;
use serde::{Deserialize, Serialize};

// MARK: - Stage

/// A named step of session bring-up, in the order the connection runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    LaunchApp,
    RtspHandshake,
    ControlStreamInit,
    VideoStreamInit,
    AudioStreamInit,
    InputStreamInit,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::LaunchApp,
        Stage::RtspHandshake,
        Stage::ControlStreamInit,
        Stage::VideoStreamInit,
        Stage::AudioStreamInit,
        Stage::InputStreamInit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LaunchApp => "app",
            Self::RtspHandshake => "RTSP handshake",
            Self::ControlStreamInit => "control stream",
            Self::VideoStreamInit => "video stream",
            Self::AudioStreamInit => "audio stream",
            Self::InputStreamInit => "input stream",
        }
    }

    pub fn is_last(&self) -> bool {
        *self == Stage::InputStreamInit
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// MARK: - PairState

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairState {
    NotPaired,
    Paired,
    PinWrong,
    Failed,
}

// MARK: - SessionState

/// Supervisor lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    Configured,
    Connecting,
    Running,
    Terminating,
    Terminated,
}

impl SessionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Configured,
            2 => Self::Connecting,
            3 => Self::Running,
            4 => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

// MARK: - TerminationCause

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// The host application called `stop()`.
    LocalStop,
    StageFailed { stage: Stage, reason: String },
    PeerDisconnect(String),
    /// Normal shutdown of the connection's own tasks. Not an error.
    Interrupted,
}

impl TerminationCause {
    /// Whether the session ended because of something the user did not ask for.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::StageFailed { .. } | Self::PeerDisconnect(_))
    }
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalStop => f.write_str("stopped by user"),
            Self::StageFailed { stage, reason } => write!(f, "starting {stage} failed: {reason}"),
            Self::PeerDisconnect(reason) => write!(f, "peer disconnected: {reason}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

// MARK: - SessionParams

/// Parameters handed back by a launch or resume request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// AES-128 key the input stream is encrypted with.
    pub remote_input_key: [u8; 16],
    pub remote_input_key_id: i32,
}

// MARK: - Media units

/// One complete H.264 access unit in Annex-B form.
#[derive(Debug, Clone)]
pub struct DecodeUnit {
    pub frame_index: u32,
    pub data: Bytes,
}

/// One Opus packet from the audio stream.
#[derive(Debug, Clone)]
pub struct AudioUnit {
    pub sequence: u16,
    pub timestamp: u32,
    pub data: Bytes,
}
