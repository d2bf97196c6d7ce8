//! Host input events and the bounded queue between the input readers and
//! the connection's input stream.
//!
//! The queue applies the back-pressure policy: relative mouse motion is
//! coalesced, axis-only controller updates replace each other, and when the
//! queue is full a lossy event evicts the oldest lossy event. Key and button
//! edges are always kept.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::trace;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Modifier bits carried with keyboard events.
pub mod modifiers {
    pub const SHIFT: u8 = 0x01;
    pub const CTRL: u8 = 0x02;
    pub const ALT: u8 = 0x04;
}

/// Controller button flags as the host encodes them.
pub mod buttons {
    pub const DPAD_UP: u16 = 0x0001;
    pub const DPAD_DOWN: u16 = 0x0002;
    pub const DPAD_LEFT: u16 = 0x0004;
    pub const DPAD_RIGHT: u16 = 0x0008;
    pub const PLAY: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LS_CLICK: u16 = 0x0040;
    pub const RS_CLICK: u16 = 0x0080;
    pub const LB: u16 = 0x0100;
    pub const RB: u16 = 0x0200;
    pub const SPECIAL: u16 = 0x0400;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

// MARK: - InputEvent

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    /// `key_code` is a Windows virtual-key code.
    KeyDown { key_code: u16, modifiers: u8 },
    KeyUp { key_code: u16, modifiers: u8 },
    MouseMove { dx: i16, dy: i16 },
    MouseButtonDown { button: MouseButton },
    MouseButtonUp { button: MouseButton },
    /// Positive ticks scroll up.
    Scroll { ticks: i8 },
    Controller { state: ControllerState, buttons_changed: bool },
}

impl InputEvent {
    /// Lossy events may be dropped or merged under back-pressure.
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            Self::MouseMove { .. } | Self::Controller { buttons_changed: false, .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    X1,
    X2,
}

impl MouseButton {
    pub fn host_code(self) -> u8 {
        match self {
            Self::Left => 1,
            Self::Middle => 2,
            Self::Right => 3,
            Self::X1 => 4,
            Self::X2 => 5,
        }
    }
}

/// Full controller state; the host always receives a complete snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_stick_x: i16,
    pub left_stick_y: i16,
    pub right_stick_x: i16,
    pub right_stick_y: i16,
}

// MARK: - InputQueue

/// Bounded multi-producer queue drained by the input stream once per host tick.
pub struct InputQueue {
    events: Mutex<VecDeque<InputEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl InputQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, event: InputEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut events = match self.events.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            let merged = match (events.back_mut(), event) {
                (Some(InputEvent::MouseMove { dx, dy }), InputEvent::MouseMove { dx: ndx, dy: ndy }) => {
                    *dx = dx.saturating_add(ndx);
                    *dy = dy.saturating_add(ndy);
                    true
                }
                (
                    Some(InputEvent::Controller { state, buttons_changed: false }),
                    InputEvent::Controller { state: next, buttons_changed: false },
                ) => {
                    *state = next;
                    true
                }
                _ => false,
            };
            if merged {
                drop(events);
                self.notify.notify_one();
                return;
            }

            if events.len() >= self.capacity && event.is_lossy() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match events.iter().position(InputEvent::is_lossy) {
                    Some(oldest) => {
                        events.remove(oldest);
                        trace!("input queue full, evicted oldest lossy event");
                    }
                    None => {
                        trace!("input queue full of edges, dropping {:?}", event);
                        return;
                    }
                }
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Takes everything queued so far without waiting.
    pub fn drain(&self) -> Vec<InputEvent> {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.drain(..).collect()
    }

    /// Waits until at least one event is queued. `None` once the queue is
    /// closed and empty.
    pub async fn next_batch(&self) -> Option<Vec<InputEvent>> {
        loop {
            let notified = self.notify.notified();
            let batch = self.drain();
            if !batch.is_empty() {
                return Some(batch);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lossy events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
