//! Video stream (UDP): RTP datagrams carrying fragments of H.264 frames.
//!
//! # Datagram layout
//! ```text
//! [0..12]   RTP header        version 2, sequence u16 BE at [2..4]
//! [12..16]  packet_index      u32 LE  position within the stream
//! [16..20]  frame_index       u32 LE
//! [20]      flags             u8      PIC_DATA | EOF | SOF
//! [21]      reserved          u8
//! [22]      multi_fec_flags   u8
//! [23]      multi_fec_blocks  u8
//! [24..28]  fec_info          u32 LE
//! [28..]    payload           Annex-B bytes
//! ```
//!
//! Frames with a missing fragment are dropped; there is no FEC recovery.

use bytes::{Buf, Bytes, BytesMut};
use pistream_core::{DecodeUnit, TransportError};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

pub const RTP_HEADER_LEN: usize = 12;
pub const VIDEO_HEADER_LEN: usize = 16;

pub const FLAG_PIC_DATA: u8 = 0x1;
pub const FLAG_EOF: u8 = 0x2;
pub const FLAG_SOF: u8 = 0x4;

const MAX_DATAGRAM: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn parse(datagram: &[u8]) -> Result<Self, TransportError> {
        if datagram.len() < RTP_HEADER_LEN {
            return Err(TransportError::Malformed(format!("{} byte RTP packet", datagram.len())));
        }
        if datagram[0] >> 6 != 2 {
            return Err(TransportError::Malformed("RTP version is not 2".into()));
        }
        let mut buf = &datagram[2..RTP_HEADER_LEN];
        Ok(Self { sequence: buf.get_u16(), timestamp: buf.get_u32(), ssrc: buf.get_u32() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPacket<'a> {
    pub rtp: RtpHeader,
    pub packet_index: u32,
    pub frame_index: u32,
    pub flags: u8,
    pub payload: &'a [u8],
}

impl<'a> VideoPacket<'a> {
    pub fn parse(datagram: &'a [u8]) -> Result<Self, TransportError> {
        let rtp = RtpHeader::parse(datagram)?;
        let start = RTP_HEADER_LEN + VIDEO_HEADER_LEN;
        if datagram.len() < start {
            return Err(TransportError::Malformed(format!("{} byte video packet", datagram.len())));
        }
        let mut header = &datagram[RTP_HEADER_LEN..start];
        let packet_index = header.get_u32_le();
        let frame_index = header.get_u32_le();
        let flags = header.get_u8();
        Ok(Self { rtp, packet_index, frame_index, flags, payload: &datagram[start..] })
    }
}

struct FrameAssembly {
    frame_index: u32,
    next_packet: u32,
    data: BytesMut,
}

/// Reassembles frames from in-order fragments.
#[derive(Default)]
pub struct VideoDepacketizer {
    frame: Option<FrameAssembly>,
    emitted: u64,
    dropped: u64,
}

impl VideoDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.emitted
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    /// Feeds one datagram; returns a decode unit when it completes a frame.
    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<DecodeUnit>, TransportError> {
        let pkt = VideoPacket::parse(datagram)?;
        if pkt.flags & FLAG_PIC_DATA == 0 {
            return Ok(None);
        }

        if pkt.flags & FLAG_SOF != 0 {
            if let Some(old) = self.frame.take() {
                debug!("Frame {} superseded before EOF, dropped", old.frame_index);
                self.dropped += 1;
            }
            self.frame = Some(FrameAssembly {
                frame_index: pkt.frame_index,
                next_packet: pkt.packet_index.wrapping_add(1),
                data: BytesMut::from(pkt.payload),
            });
        } else {
            match self.frame.as_mut() {
                Some(f) if f.frame_index == pkt.frame_index && f.next_packet == pkt.packet_index => {
                    f.data.extend_from_slice(pkt.payload);
                    f.next_packet = f.next_packet.wrapping_add(1);
                }
                Some(f) if f.frame_index == pkt.frame_index => {
                    debug!(
                        "Frame {} lost a fragment (expected {}, got {}), dropped",
                        f.frame_index, f.next_packet, pkt.packet_index
                    );
                    self.frame = None;
                    self.dropped += 1;
                    return Ok(None);
                }
                _ => {
                    trace!("Fragment of frame {} without its start, ignored", pkt.frame_index);
                    return Ok(None);
                }
            }
        }

        if pkt.flags & FLAG_EOF == 0 {
            return Ok(None);
        }
        Ok(self.frame.take().map(|f| {
            self.emitted += 1;
            DecodeUnit { frame_index: f.frame_index, data: f.data.freeze() }
        }))
    }
}

/// Receives until `shutdown` flips or the sink is gone.
pub async fn run(socket: UdpSocket, sink: mpsc::Sender<DecodeUnit>, mut shutdown: watch::Receiver<bool>) {
    let mut depacketizer = VideoDepacketizer::new();
    let receive = async {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = match socket.recv(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    trace!("Video recv error: {}", e);
                    continue;
                }
            };
            match depacketizer.push(&buf[..n]) {
                Ok(Some(unit)) => match sink.try_send(unit) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(unit)) => {
                        debug!("Video sink behind, frame {} dropped", unit.frame_index);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                },
                Ok(None) => {}
                Err(e) => warn!("Video: {}", e),
            }
        }
    };

    tokio::select! {
        _ = shutdown.changed() => {}
        _ = crate::keep_pinging(&socket) => {}
        _ = receive => {}
    }
    debug!(
        "Video stream stopped ({} frames, {} dropped)",
        depacketizer.frames_emitted(),
        depacketizer.frames_dropped()
    );
}

/// Test and diagnostics helper: one datagram as the host would send it.
pub fn encode_packet(sequence: u16, packet_index: u32, frame_index: u32, flags: u8, payload: &[u8]) -> Bytes {
    use bytes::BufMut;
    let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + VIDEO_HEADER_LEN + payload.len());
    buf.put_u8(0x80);
    buf.put_u8(0x60);
    buf.put_u16(sequence);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32_le(packet_index);
    buf.put_u32_le(frame_index);
    buf.put_u8(flags);
    buf.put_bytes(0, 3);
    buf.put_u32_le(0);
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MID: u8 = FLAG_PIC_DATA;
    const FIRST: u8 = FLAG_PIC_DATA | FLAG_SOF;
    const LAST: u8 = FLAG_PIC_DATA | FLAG_EOF;

    #[test]
    fn three_fragments_make_one_unit() {
        let mut d = VideoDepacketizer::new();
        assert!(d.push(&encode_packet(1, 10, 7, FIRST, b"\x00\x00\x01\x65aa")).unwrap().is_none());
        assert!(d.push(&encode_packet(2, 11, 7, MID, b"bb")).unwrap().is_none());
        let unit = d.push(&encode_packet(3, 12, 7, LAST, b"cc")).unwrap().unwrap();
        assert_eq!(unit.frame_index, 7);
        assert_eq!(&unit.data[..], b"\x00\x00\x01\x65aabbcc");
        assert_eq!(d.frames_emitted(), 1);
    }

    #[test]
    fn single_packet_frame() {
        let mut d = VideoDepacketizer::new();
        let unit = d.push(&encode_packet(1, 0, 1, FIRST | FLAG_EOF, b"x")).unwrap().unwrap();
        assert_eq!(&unit.data[..], b"x");
    }

    #[test]
    fn missing_fragment_drops_the_frame() {
        let mut d = VideoDepacketizer::new();
        d.push(&encode_packet(1, 10, 7, FIRST, b"a")).unwrap();
        assert!(d.push(&encode_packet(3, 12, 7, LAST, b"c")).unwrap().is_none());
        assert_eq!(d.frames_dropped(), 1);

        // the next frame is unaffected
        d.push(&encode_packet(4, 13, 8, FIRST, b"d")).unwrap();
        assert!(d.push(&encode_packet(5, 14, 8, LAST, b"e")).unwrap().is_some());
    }

    #[test]
    fn fragments_without_start_are_ignored() {
        let mut d = VideoDepacketizer::new();
        assert!(d.push(&encode_packet(1, 11, 7, MID, b"b")).unwrap().is_none());
        assert!(d.push(&encode_packet(2, 12, 7, LAST, b"c")).unwrap().is_none());
        assert_eq!(d.frames_emitted(), 0);
    }

    #[test]
    fn new_start_supersedes_unfinished_frame() {
        let mut d = VideoDepacketizer::new();
        d.push(&encode_packet(1, 1, 1, FIRST, b"a")).unwrap();
        d.push(&encode_packet(2, 2, 2, FIRST, b"b")).unwrap();
        let unit = d.push(&encode_packet(3, 3, 2, LAST, b"c")).unwrap().unwrap();
        assert_eq!(unit.frame_index, 2);
        assert_eq!(d.frames_dropped(), 1);
    }

    #[test]
    fn short_or_non_rtp_datagrams_are_malformed() {
        let mut d = VideoDepacketizer::new();
        assert!(d.push(b"PING").is_err());
        let mut bad = encode_packet(1, 0, 0, FIRST, b"").to_vec();
        bad[0] = 0x40;
        assert!(d.push(&bad).is_err());
    }

    #[tokio::test]
    async fn frames_reach_the_sink() {
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(host.local_addr().unwrap()).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(client, tx, stop_rx));

        // the client pings first so the host learns where to send
        let mut buf = [0u8; 16];
        let (n, _) = host.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], crate::PING);

        host.send_to(&encode_packet(1, 0, 3, FIRST | FLAG_EOF, b"frame"), client_addr).await.unwrap();
        let unit = rx.recv().await.unwrap();
        assert_eq!(unit.frame_index, 3);

        stop.send_replace(true);
        task.await.unwrap();
    }
}
