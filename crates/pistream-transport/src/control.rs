//! Control stream (TCP).
//!
//! # Packet layout
//! ```text
//! [0..2]  type     u16 LE
//! [2..4]  length   u16 LE  payload bytes that follow
//! [4..]   payload
//! ```
//!
//! The client sends start-A and start-B (each answered by the host), then a
//! keepalive every second. A termination packet or EOF from the host ends
//! the session.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use pistream_core::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const PTYPE_START_A: u16 = 0x0305;
pub const PTYPE_START_B: u16 = 0x0307;
pub const PTYPE_KEEPALIVE: u16 = 0x0201;
pub const PTYPE_TERMINATION: u16 = 0x0100;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub ptype: u16,
    pub payload: Bytes,
}

impl ControlPacket {
    pub fn new(ptype: u16, payload: impl Into<Bytes>) -> Self {
        Self { ptype, payload: payload.into() }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u16_le(self.ptype);
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

pub async fn write_packet(
    stream: &mut (impl AsyncWrite + Unpin),
    packet: &ControlPacket,
) -> Result<(), TransportError> {
    stream.write_all(&packet.encode()).await?;
    stream.flush().await?;
    Ok(())
}

/// `ConnectionClosed` on a clean EOF before a header.
pub async fn read_packet(stream: &mut (impl AsyncRead + Unpin)) -> Result<ControlPacket, TransportError> {
    let mut header = [0u8; HEADER_LEN];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let mut header = &header[..];
    let ptype = header.get_u16_le();
    let len = header.get_u16_le() as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(ControlPacket { ptype, payload: payload.into() })
}

/// Sends start-A and start-B, reading the host's reply to each.
pub async fn start<S>(stream: &mut S) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for packet in [
        ControlPacket::new(PTYPE_START_A, Bytes::from_static(&[0, 0])),
        ControlPacket::new(PTYPE_START_B, Bytes::from_static(&[0; 16])),
    ] {
        write_packet(stream, &packet).await?;
        let reply = read_packet(stream).await?;
        debug!("Control 0x{:04x} answered with 0x{:04x}", packet.ptype, reply.ptype);
    }
    Ok(())
}

/// Runs until the host terminates, the socket fails, or `shutdown` flips.
/// Returns the reason the host went away, `None` on local shutdown.
pub async fn run<S>(stream: S, mut shutdown: watch::Receiver<bool>) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    // both halves live for the whole select so a read is never cut mid-packet
    let receive = async move {
        loop {
            match read_packet(&mut reader).await {
                Ok(p) if p.ptype == PTYPE_TERMINATION => {
                    info!("Host terminated the session");
                    return "host ended the session".to_owned();
                }
                Ok(p) => debug!("Control packet 0x{:04x} ({} bytes)", p.ptype, p.payload.len()),
                Err(TransportError::ConnectionClosed) => {
                    return "control stream closed by host".to_owned();
                }
                Err(e) => return format!("control stream: {e}"),
            }
        }
    };
    let keepalive = async move {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let ping = ControlPacket::new(PTYPE_KEEPALIVE, Bytes::from_static(&[0; 4]));
        loop {
            ticker.tick().await;
            if let Err(e) = write_packet(&mut writer, &ping).await {
                warn!("Control keepalive failed: {}", e);
                return format!("control stream: {e}");
            }
        }
    };

    tokio::select! {
        _ = shutdown.changed() => None,
        reason = receive => Some(reason),
        reason = keepalive => Some(reason),
    }
}
