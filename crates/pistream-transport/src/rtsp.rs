//! RTSP handshake with the host.
//!
//! The host closes the TCP connection after every reply, so each request
//! opens its own connection.
//!
//! # Sequence
//! ```text
//! OPTIONS → DESCRIBE → SETUP audio → SETUP video → SETUP control
//!         → ANNOUNCE (SDP) → PLAY video → PLAY audio
//! ```

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Duration;

use pistream_core::{StreamConfiguration, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

pub const CLIENT_VERSION: &str = "14";
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

// ── Response ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspResponse {
    pub fn parse(raw: &[u8]) -> Result<Self, TransportError> {
        let (head, body): (&[u8], &[u8]) = match header_end(raw) {
            Some(end) => (&raw[..end], &raw[end + 4..]),
            None => (raw, &[]),
        };
        let head = String::from_utf8_lossy(head);

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
            return Err(TransportError::Malformed(format!("RTSP status line {status_line:?}")));
        };
        if !version.starts_with("RTSP/") {
            return Err(TransportError::Malformed(format!("RTSP status line {status_line:?}")));
        }
        let status = code
            .parse()
            .map_err(|_| TransportError::Malformed(format!("RTSP status code {code:?}")))?;
        let reason = parts.next().unwrap_or_default().to_owned();

        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
            .collect();

        let mut response = Self { status, reason, headers, body: String::new() };
        let body_len = response
            .header("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .map_or(body.len(), |n| n.min(body.len()));
        response.body = String::from_utf8_lossy(&body[..body_len]).into_owned();
        Ok(response)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Bytes needed for a complete response, once the header block is in.
fn expected_len(buf: &[u8]) -> Option<usize> {
    let end = header_end(buf)? + 4;
    let head = String::from_utf8_lossy(&buf[..end]);
    let content_length = head
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    Some(end + content_length)
}

// ── SDP ───────────────────────────────────────────────────────────────────────

/// Session description announced to the host.
pub fn build_sdp(local: &SocketAddr, config: &StreamConfiguration) -> String {
    let family = if local.is_ipv6() { "IPv6" } else { "IPv4" };
    let mut sdp = String::new();
    let _ = write!(sdp, "v=0\r\n");
    let _ = write!(sdp, "o=android 0 {CLIENT_VERSION} IN {family} {}\r\n", local.ip());
    let _ = write!(sdp, "s=NVIDIA Streaming Client\r\n");
    let _ = write!(sdp, "a=x-nv-video[0].clientViewportWd:{} \r\n", config.width());
    let _ = write!(sdp, "a=x-nv-video[0].clientViewportHt:{} \r\n", config.height());
    let _ = write!(sdp, "a=x-nv-video[0].maxFPS:{} \r\n", config.refresh_hz());
    let _ = write!(sdp, "a=x-nv-video[0].packetSize:{} \r\n", config.packet_size());
    let _ = write!(sdp, "a=x-nv-video[0].rateControlMode:4 \r\n");
    let _ = write!(sdp, "a=x-nv-vqos[0].bw.maximumBitrateKbps:{} \r\n", config.bitrate_kbps());
    let _ = write!(sdp, "a=x-nv-vqos[0].fec.enable:0 \r\n");
    let _ = write!(sdp, "a=x-nv-aqos.packetDuration:5 \r\n");
    let _ = write!(sdp, "t=0 0\r\n");
    let _ = write!(sdp, "m=video 47998  \r\n");
    sdp
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct RtspClient {
    addr: SocketAddr,
    base: String,
    cseq: u32,
    session: Option<String>,
    timeout: Duration,
}

impl RtspClient {
    pub fn new(addr: SocketAddr) -> Self {
        let base = match addr {
            SocketAddr::V6(v6) => format!("rtsp://[{}]:{}", v6.ip(), v6.port()),
            SocketAddr::V4(v4) => format!("rtsp://{}:{}", v4.ip(), v4.port()),
        };
        Self { addr, base, cseq: 0, session: None, timeout: HANDSHAKE_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Runs the whole handshake; any non-200 reply fails it.
    pub async fn handshake(&mut self, config: &StreamConfiguration) -> Result<(), TransportError> {
        let base = self.base.clone();
        self.request("OPTIONS", &base, &[], None).await?;
        self.request("DESCRIBE", &base, &[("Accept", "application/sdp".into())], None)
            .await?;

        for stream in ["audio", "video", "control/1/0"] {
            let target = format!("{base}/streamid={stream}");
            let reply = self
                .request(
                    "SETUP",
                    &target,
                    &[
                        ("Transport", "unicast;X-GS-ClientPort=50000-50001".into()),
                        ("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT".into()),
                    ],
                    None,
                )
                .await?;
            if self.session.is_none() {
                let session = reply.header("Session").ok_or_else(|| TransportError::Rtsp {
                    request: "SETUP".into(),
                    reason: "reply carries no Session".into(),
                })?;
                // "ID;timeout = 90"
                let id = session.split(';').next().unwrap_or(session).trim().to_owned();
                debug!("RTSP session {}", id);
                self.session = Some(id);
            }
        }

        let local = local_addr_towards(self.addr).await;
        let sdp = build_sdp(&local, config);
        self.request("ANNOUNCE", &format!("{base}/streamid=video"), &[], Some(&sdp)).await?;
        self.request("PLAY", &format!("{base}/streamid=video"), &[], None).await?;
        self.request("PLAY", &format!("{base}/streamid=audio"), &[], None).await?;
        info!("RTSP handshake with {} complete", self.addr);
        Ok(())
    }

    pub async fn request(
        &mut self,
        method: &str,
        target: &str,
        headers: &[(&str, String)],
        body: Option<&str>,
    ) -> Result<RtspResponse, TransportError> {
        self.cseq += 1;
        let mut req = format!("{method} {target} RTSP/1.0\r\n");
        let _ = write!(req, "CSeq: {}\r\n", self.cseq);
        let _ = write!(req, "X-GS-ClientVersion: {CLIENT_VERSION}\r\n");
        if let Some(session) = &self.session {
            let _ = write!(req, "Session: {session}\r\n");
        }
        for (name, value) in headers {
            let _ = write!(req, "{name}: {value}\r\n");
        }
        if let Some(body) = body {
            let _ = write!(req, "Content-Type: application/sdp\r\nContent-Length: {}\r\n", body.len());
        }
        req.push_str("\r\n");
        if let Some(body) = body {
            req.push_str(body);
        }

        let ms = self.timeout.as_millis() as u64;
        let raw = tokio::time::timeout(self.timeout, self.exchange(req.as_bytes()))
            .await
            .map_err(|_| TransportError::Timeout { ms })??;

        let reply = RtspResponse::parse(&raw)?;
        debug!("RTSP {} {} → {} {}", method, target, reply.status, reply.reason);
        if reply.status != 200 {
            return Err(TransportError::Rtsp {
                request: method.to_owned(),
                reason: format!("{} {}", reply.status, reply.reason),
            });
        }
        Ok(reply)
    }

    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(request).await?;

        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 2048];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_RESPONSE_BYTES {
                return Err(TransportError::Malformed("RTSP reply too large".into()));
            }
            if expected_len(&buf).map_or(false, |want| buf.len() >= want) {
                break;
            }
        }
        if buf.is_empty() {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(buf)
    }
}

/// Local address the OS would use to reach `remote`.
async fn local_addr_towards(remote: SocketAddr) -> SocketAddr {
    let probe = async {
        let socket = tokio::net::UdpSocket::bind(crate::unspecified_for(&remote)).await?;
        socket.connect(remote).await?;
        socket.local_addr()
    };
    probe.await.unwrap_or_else(|_| crate::unspecified_for(&remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[test]
    fn parses_status_headers_and_body() {
        let raw = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nsession: ABC;timeout = 90\r\nContent-Length: 5\r\n\r\nv=0\r\nextra";
        let r = RtspResponse::parse(raw).unwrap();
        assert_eq!(r.status, 200);
        assert_eq!(r.reason, "OK");
        assert_eq!(r.header("Session"), Some("ABC;timeout = 90"));
        assert_eq!(r.body, "v=0\r\n");
    }

    #[test]
    fn non_utf8_body_is_cut_by_content_length() {
        let r = RtspResponse::parse(b"RTSP/1.0 200 OK\r\nContent-Length: 2\r\n\r\n\xffa").unwrap();
        assert_eq!(r.body, "\u{fffd}a");

        let r = RtspResponse::parse(b"RTSP/1.0 200 OK\r\nContent-Length: 1\r\n\r\n\xe2\x82\xac").unwrap();
        assert_eq!(r.body, "\u{fffd}");
    }

    #[test]
    fn rejects_non_rtsp_status_line() {
        assert!(RtspResponse::parse(b"HTTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(RtspResponse::parse(b"RTSP/1.0 abc\r\n\r\n").is_err());
    }

    #[test]
    fn expected_len_waits_for_body() {
        assert_eq!(expected_len(b"RTSP/1.0 200 OK\r\nCSeq: 1"), None);
        assert_eq!(expected_len(b"RTSP/1.0 200 OK\r\n\r\n"), Some(19));
        assert_eq!(expected_len(b"RTSP/1.0 200 OK\r\nContent-Length: 3\r\n\r\n"), Some(41));
    }

    #[test]
    fn sdp_carries_stream_parameters() {
        let cfg = StreamConfiguration::new(1920, 1080, 30, 8000, 1200).unwrap();
        let sdp = build_sdp(&"10.0.0.2:0".parse().unwrap(), &cfg);
        assert!(sdp.contains("clientViewportWd:1920 "));
        assert!(sdp.contains("clientViewportHt:1080 "));
        assert!(sdp.contains("maxFPS:30 "));
        assert!(sdp.contains("packetSize:1200 "));
        assert!(sdp.contains("maximumBitrateKbps:8000 "));
        assert!(sdp.contains("IN IPv4 10.0.0.2"));
    }

    /// Answers every request with `status` unless the method is in `fail`.
    async fn fake_host(fail: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = stream.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if n == 0 || expected_len(&buf).map_or(false, |want| buf.len() >= want) {
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                let first = text.lines().next().unwrap_or_default().to_owned();
                let method = first.split(' ').next().unwrap_or_default().to_owned();
                let has_session = text.contains("\r\nSession: S1\r\n");
                log.lock().unwrap().push(format!("{first} session={has_session}"));
                let reply = if method == fail {
                    "RTSP/1.0 404 Not Found\r\nCSeq: 1\r\n\r\n".to_owned()
                } else {
                    "RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: S1;timeout = 90\r\n\r\n".to_owned()
                };
                let _ = stream.write_all(reply.as_bytes()).await;
            }
        });
        (addr, seen)
    }

    #[tokio::test]
    async fn handshake_runs_every_request_in_order() {
        let (addr, seen) = fake_host("NONE").await;
        let mut client = RtspClient::new(addr);
        client.handshake(&StreamConfiguration::default()).await.unwrap();
        assert_eq!(client.session(), Some("S1"));

        let seen = seen.lock().unwrap().clone();
        let methods: Vec<&str> = seen.iter().map(|l| l.split(' ').next().unwrap()).collect();
        assert_eq!(
            methods,
            vec!["OPTIONS", "DESCRIBE", "SETUP", "SETUP", "SETUP", "ANNOUNCE", "PLAY", "PLAY"]
        );
        // the session id is echoed once the first SETUP returned it
        assert!(seen[2].ends_with("session=false"));
        assert!(seen[3..].iter().all(|l| l.ends_with("session=true")));
        assert!(seen[2].contains("/streamid=audio "));
    }

    #[tokio::test]
    async fn non_200_fails_the_handshake() {
        let (addr, _) = fake_host("DESCRIBE").await;
        let mut client = RtspClient::new(addr);
        match client.handshake(&StreamConfiguration::default()).await {
            Err(TransportError::Rtsp { request, reason }) => {
                assert_eq!(request, "DESCRIBE");
                assert!(reason.starts_with("404"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_port_is_an_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut client = RtspClient::new(addr);
        assert!(matches!(
            client.request("OPTIONS", "rtsp://x", &[], None).await,
            Err(TransportError::Io(_))
        ));
    }
}
