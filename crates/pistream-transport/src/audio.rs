//! Audio stream (UDP): one Opus packet per RTP datagram.

use bytes::Bytes;
use pistream_core::{AudioUnit, TransportError};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::video::{RtpHeader, RTP_HEADER_LEN};

const MAX_DATAGRAM: usize = 1500;

/// Drops duplicates and late packets; Opus conceals the gaps.
#[derive(Debug, Default)]
pub struct AudioDepacketizer {
    last_sequence: Option<u16>,
    late: u64,
}

impl AudioDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn late_packets(&self) -> u64 {
        self.late
    }

    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<AudioUnit>, TransportError> {
        let rtp = RtpHeader::parse(datagram)?;
        if let Some(last) = self.last_sequence {
            // sequence numbers wrap; anything not ahead of `last` is late
            let ahead = rtp.sequence.wrapping_sub(last);
            if ahead == 0 || ahead >= 0x8000 {
                self.late += 1;
                return Ok(None);
            }
        }
        self.last_sequence = Some(rtp.sequence);

        let payload = &datagram[RTP_HEADER_LEN..];
        if payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(AudioUnit {
            sequence: rtp.sequence,
            timestamp: rtp.timestamp,
            data: Bytes::copy_from_slice(payload),
        }))
    }
}

/// Receives until `shutdown` flips or the sink is gone.
pub async fn run(socket: UdpSocket, sink: mpsc::Sender<AudioUnit>, mut shutdown: watch::Receiver<bool>) {
    let mut depacketizer = AudioDepacketizer::new();
    let receive = async {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = match socket.recv(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    trace!("Audio recv error: {}", e);
                    continue;
                }
            };
            match depacketizer.push(&buf[..n]) {
                Ok(Some(unit)) => match sink.try_send(unit) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(unit)) => {
                        trace!("Audio sink behind, packet {} dropped", unit.sequence);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                },
                Ok(None) => {}
                Err(e) => warn!("Audio: {}", e),
            }
        }
    };

    tokio::select! {
        _ = shutdown.changed() => {}
        _ = crate::keep_pinging(&socket) => {}
        _ = receive => {}
    }
    debug!("Audio stream stopped ({} late packets)", depacketizer.late_packets());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp(sequence: u16, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![0x80, 97];
        v.extend_from_slice(&sequence.to_be_bytes());
        v.extend_from_slice(&(sequence as u32 * 240).to_be_bytes());
        v.extend_from_slice(&[0, 0, 0, 0]);
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn in_order_packets_pass_through() {
        let mut d = AudioDepacketizer::new();
        let a = d.push(&rtp(1, b"opus1")).unwrap().unwrap();
        let b = d.push(&rtp(2, b"opus2")).unwrap().unwrap();
        assert_eq!((a.sequence, &a.data[..]), (1, &b"opus1"[..]));
        assert_eq!(b.timestamp, 480);
    }

    #[test]
    fn duplicates_and_late_packets_are_dropped() {
        let mut d = AudioDepacketizer::new();
        d.push(&rtp(10, b"a")).unwrap();
        assert!(d.push(&rtp(10, b"a")).unwrap().is_none());
        assert!(d.push(&rtp(9, b"b")).unwrap().is_none());
        assert!(d.push(&rtp(12, b"c")).unwrap().is_some());
        assert_eq!(d.late_packets(), 2);
    }

    #[test]
    fn sequence_wraps() {
        let mut d = AudioDepacketizer::new();
        d.push(&rtp(u16::MAX, b"a")).unwrap();
        assert!(d.push(&rtp(0, b"b")).unwrap().is_some());
    }

    #[test]
    fn short_datagrams_are_malformed() {
        assert!(AudioDepacketizer::new().push(&[0x80, 97, 0]).is_err());
    }
}
