//! pistream-transport: the connection a session supervisor composes.
//!
//! # Architecture
//!
//! ```text
//! pistream client                         streaming host
//! ─────────────────────────────           ──────────────────────────────
//! HostClient   ── HTTPS:47984 ─────────►  launch / resume
//! rtsp         ── TCP:48010  ──────────►  OPTIONS … ANNOUNCE, PLAY
//! control      ── TCP:47999  ◄────────►  start A/B, keepalive, termination
//! video        ◄─ UDP:47998  ──────────  RTP + frame header → DecodeUnit
//! audio        ◄─ UDP:48000  ──────────  RTP + Opus        → AudioUnit
//! input        ── TCP:35043  ──────────►  AES-CBC input packets, 10 ms tick
//! ```
//!
//! Progress is reported as [`ConnectionEvent`]s over an unbounded channel;
//! the receiving side (the supervisor's notification task) turns them into
//! listener callbacks.

pub mod audio;
pub mod connection;
pub mod control;
pub mod input;
pub mod rtsp;
pub mod video;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pistream_core::{AudioUnit, DecodeUnit, InputQueue, Stage, TerminationCause, TransportError};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::trace;

pub use connection::HostConnection;

// ── Ports ─────────────────────────────────────────────────────────────────────

pub const RTSP_PORT: u16 = 48010;
pub const CONTROL_PORT: u16 = 47999;
pub const VIDEO_PORT: u16 = 47998;
pub const AUDIO_PORT: u16 = 48000;
pub const INPUT_PORT: u16 = 35043;

/// Host-side ports of each stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPorts {
    pub rtsp: u16,
    pub control: u16,
    pub video: u16,
    pub audio: u16,
    pub input: u16,
}

impl Default for HostPorts {
    fn default() -> Self {
        Self {
            rtsp: RTSP_PORT,
            control: CONTROL_PORT,
            video: VIDEO_PORT,
            audio: AUDIO_PORT,
            input: INPUT_PORT,
        }
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StageStarting(Stage),
    StageComplete(Stage),
    StageFailed { stage: Stage, error: String },
    /// Every stage completed; media is flowing.
    Started,
    Terminated(TerminationCause),
}

/// Everything a connection needs from its owner for one run.
pub struct ConnectionContext {
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
    pub video: mpsc::Sender<DecodeUnit>,
    pub audio: mpsc::Sender<AudioUnit>,
    pub input: Arc<InputQueue>,
}

impl ConnectionContext {
    /// Reports an event. The receiver may already be gone during teardown.
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

// ── Connection trait ──────────────────────────────────────────────────────────

/// A streaming connection to one host.
///
/// `run` performs every [`Stage`] in order, then streams until [`stop`] is
/// called or the host goes away. A failed stage is reported with
/// [`ConnectionEvent::StageFailed`] and ends the run; nothing is retried.
///
/// [`stop`]: Connection::stop
#[async_trait]
pub trait Connection: Send + Sync {
    async fn run(&self, ctx: ConnectionContext);

    /// Non-blocking and idempotent. `run` returns soon after.
    fn stop(&self);
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Sent to the host's media ports so it learns where to stream.
pub const PING: &[u8] = b"PING";
pub const PING_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) async fn keep_pinging(socket: &UdpSocket) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send(PING).await {
            trace!("Ping failed: {}", e);
        }
    }
}

pub(crate) async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    addrs.next().ok_or_else(|| {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{host} did not resolve"),
        ))
    })
}

/// Local wildcard address of the same family as `remote`.
pub(crate) fn unspecified_for(remote: &SocketAddr) -> SocketAddr {
    if remote.is_ipv6() {
        SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
    }
}
