//! pistream-av: audio and video sinks.
//!
//! Sinks are synchronous: the session supervisor drives each one from its
//! own blocking thread, draining a bounded channel of media units.
//!
//! # Lifecycle
//! ```text
//! setup → start → submit/play … → stop → release
//! ```
//! `stop` and `release` are idempotent and never fail.

pub mod fake;
pub mod gst_audio;
pub mod gst_video;

use std::path::PathBuf;

use pistream_core::{AudioUnit, DecodeUnit, SinkError, StreamConfiguration};

pub use fake::{FakeAudioRenderer, FakeVideoRenderer};
pub use gst_audio::GstAudioRenderer;
pub use gst_video::{probe_best_decoder, GstVideoRenderer};

/// Video renderer flags passed to [`VideoRenderer::setup`].
pub mod flags {
    /// Favour picture quality over latency: frames queue instead of being
    /// dropped when the decoder falls behind.
    pub const PREFER_QUALITY: u32 = 0x1;
}

pub const DEFAULT_AUDIO_DEVICE: &str = "default";
pub const DEFAULT_FAKE_OUTPUT: &str = "fake.h264";

// MARK: - Traits

pub trait VideoRenderer: Send {
    fn name(&self) -> &str;
    fn setup(&mut self, config: &StreamConfiguration, flags: u32) -> Result<(), SinkError>;
    fn start(&mut self) -> Result<(), SinkError>;
    fn submit_decode_unit(&mut self, unit: DecodeUnit) -> Result<(), SinkError>;
    fn stop(&mut self);
    fn release(&mut self);
}

/// Consumes Opus packets (48 kHz stereo).
pub trait AudioRenderer: Send {
    fn name(&self) -> &str;
    fn setup(&mut self) -> Result<(), SinkError>;
    fn start(&mut self) -> Result<(), SinkError>;
    fn play_decoded_samples(&mut self, unit: AudioUnit) -> Result<(), SinkError>;
    fn stop(&mut self);
    fn release(&mut self);
}

// MARK: - SinkSelection

/// Which sink pair a session renders into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSelection {
    Real { audio_device: String },
    Fake { video_out: PathBuf },
}

impl SinkSelection {
    pub fn real(audio_device: Option<String>) -> Self {
        Self::Real { audio_device: audio_device.unwrap_or_else(|| DEFAULT_AUDIO_DEVICE.to_owned()) }
    }

    pub fn fake(video_out: Option<PathBuf>) -> Self {
        Self::Fake { video_out: video_out.unwrap_or_else(|| PathBuf::from(DEFAULT_FAKE_OUTPUT)) }
    }

    /// Fresh, not yet set up, sinks for one session.
    pub fn build(&self) -> (Box<dyn VideoRenderer>, Box<dyn AudioRenderer>) {
        match self {
            Self::Real { audio_device } => (
                Box::new(GstVideoRenderer::new()),
                Box::new(GstAudioRenderer::new(audio_device.clone())),
            ),
            Self::Fake { video_out } => (
                Box::new(FakeVideoRenderer::new(video_out.clone())),
                Box::new(FakeAudioRenderer::default()),
            ),
        }
    }
}
