//! Input stream (TCP): local input events, encrypted, sent once per host tick.
//!
//! # Framing
//! ```text
//! [0..4]  length      u32 BE  ciphertext bytes that follow
//! [4..]   ciphertext  AES-128-CBC(PKCS#7(packet)), IV = key id BE ‖ 0…
//! ```
//!
//! # Packets
//! Every packet starts with a u32 BE packet type.
//! ```text
//! keyboard      0x0A  action u8 (3 down, 4 up) ‖ 0u32 ‖ key i16 LE ‖ modifiers u8 ‖ 0u16
//! scroll        0x0A  0x09 ‖ 0u8 ‖ 0u16 ‖ amount i16 BE ×2 ‖ 0u16
//! mouse move    0x08  0x06u32 LE ‖ dx i16 BE ‖ dy i16 BE
//! mouse button  0x05  action u8 (8 down, 9 up) ‖ button u32 BE
//! controller    0x18  0x0Au32 LE ‖ 0x1400u16 LE ‖ buttons u16 LE ‖ lt u8 ‖ rt u8
//!                     ‖ lsx ‖ lsy ‖ rsx ‖ rsy (i16 LE) ‖ 0x9Cu32 LE ‖ 0x55u16 LE
//! ```

use std::sync::Arc;
use std::time::Duration;

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use bytes::{BufMut, Bytes, BytesMut};
use pistream_core::{InputEvent, InputQueue, SessionParams, TransportError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Interval at which queued input is flushed to the host.
pub const HOST_TICK: Duration = Duration::from_millis(10);

pub const PACKET_TYPE_KEYBOARD: u32 = 0x0A;
pub const PACKET_TYPE_SCROLL: u32 = 0x0A;
pub const PACKET_TYPE_MOUSE_MOVE: u32 = 0x08;
pub const PACKET_TYPE_MOUSE_BUTTON: u32 = 0x05;
pub const PACKET_TYPE_CONTROLLER: u32 = 0x18;

const KEY_DOWN: u8 = 0x03;
const KEY_UP: u8 = 0x04;
const BUTTON_DOWN: u8 = 0x08;
const BUTTON_UP: u8 = 0x09;
/// One wheel detent in host scroll units.
const WHEEL_DELTA: i16 = 120;

/// Host wire form of one event.
pub fn encode_event(event: &InputEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(32);
    match *event {
        InputEvent::KeyDown { key_code, modifiers } | InputEvent::KeyUp { key_code, modifiers } => {
            let action = if matches!(event, InputEvent::KeyDown { .. }) { KEY_DOWN } else { KEY_UP };
            buf.put_u32(PACKET_TYPE_KEYBOARD);
            buf.put_u8(action);
            buf.put_u32(0);
            buf.put_u16_le(0x8000 | key_code);
            buf.put_u8(modifiers);
            buf.put_u16(0);
        }
        InputEvent::MouseMove { dx, dy } => {
            buf.put_u32(PACKET_TYPE_MOUSE_MOVE);
            buf.put_u32_le(0x06);
            buf.put_i16(dx);
            buf.put_i16(dy);
        }
        InputEvent::MouseButtonDown { button } | InputEvent::MouseButtonUp { button } => {
            let action =
                if matches!(event, InputEvent::MouseButtonDown { .. }) { BUTTON_DOWN } else { BUTTON_UP };
            buf.put_u32(PACKET_TYPE_MOUSE_BUTTON);
            buf.put_u8(action);
            buf.put_u32(button.host_code() as u32);
        }
        InputEvent::Scroll { ticks } => {
            let amount = (ticks as i16).saturating_mul(WHEEL_DELTA);
            buf.put_u32(PACKET_TYPE_SCROLL);
            buf.put_u8(0x09);
            buf.put_u8(0);
            buf.put_u16(0);
            buf.put_i16(amount);
            buf.put_i16(amount);
            buf.put_u16(0);
        }
        InputEvent::Controller { state, .. } => {
            buf.put_u32(PACKET_TYPE_CONTROLLER);
            buf.put_u32_le(0x0A);
            buf.put_u16_le(0x1400);
            buf.put_u16_le(state.buttons);
            buf.put_u8(state.left_trigger);
            buf.put_u8(state.right_trigger);
            buf.put_i16_le(state.left_stick_x);
            buf.put_i16_le(state.left_stick_y);
            buf.put_i16_le(state.right_stick_x);
            buf.put_i16_le(state.right_stick_y);
            buf.put_u32_le(0x9C);
            buf.put_u16_le(0x55);
        }
    }
    buf.freeze()
}

// ── Encryption ────────────────────────────────────────────────────────────────

/// AES-128-CBC with the session's remote-input key. Every packet is
/// encrypted from the same IV.
pub struct InputCipher {
    cipher: Aes128,
    iv: [u8; 16],
}

impl InputCipher {
    pub fn new(params: &SessionParams) -> Self {
        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&params.remote_input_key_id.to_be_bytes());
        Self { cipher: Aes128::new((&params.remote_input_key).into()), iv }
    }

    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        // PKCS#7 always adds at least one byte
        let pad = 16 - plain.len() % 16;
        let mut out = Vec::with_capacity(plain.len() + pad);
        out.extend_from_slice(plain);
        out.resize(plain.len() + pad, pad as u8);

        let mut prev = self.iv;
        for chunk in out.chunks_exact_mut(16) {
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            self.cipher.encrypt_block(Block::from_mut_slice(chunk));
            prev.copy_from_slice(chunk);
        }
        out
    }

    /// Length-prefixed ciphertext of one event.
    pub fn frame(&self, event: &InputEvent) -> Bytes {
        let sealed = self.encrypt(&encode_event(event));
        let mut buf = BytesMut::with_capacity(4 + sealed.len());
        buf.put_u32(sealed.len() as u32);
        buf.put_slice(&sealed);
        buf.freeze()
    }
}

/// Flushes the queue every [`HOST_TICK`] until shutdown or the queue closes.
/// A write error means the host dropped the stream.
pub async fn run<W>(
    mut stream: W,
    cipher: InputCipher,
    queue: Arc<InputQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut tick = tokio::time::interval(HOST_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }
        let batch = queue.drain();
        if batch.is_empty() {
            if queue.is_closed() {
                break;
            }
            continue;
        }
        for event in &batch {
            trace!("Input → host: {:?}", event);
            stream.write_all(&cipher.frame(event)).await?;
        }
        stream.flush().await?;
        sent += batch.len() as u64;
    }
    debug!("Input stream stopped after {} events ({} dropped locally)", sent, queue.dropped());
    Ok(())
}
