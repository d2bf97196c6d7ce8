//! Raw evdev events → host [`InputEvent`]s.
//!
//! Pure state machines; the readers feed them and push whatever comes out
//! into the shared queue.

use std::collections::HashMap;

use evdev::{EventType, Key, RelativeAxisType, Synchronization};
use pistream_core::input::buttons;
use pistream_core::{ControllerState, InputEvent, MouseButton};
use tracing::trace;

use crate::keymap;
use crate::mapping::{GamepadMapping, LogicalAxis};

/// Deadzone as a fraction of half the stick range when the device reports no flat.
pub const DEFAULT_DEADZONE: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Key,
    Relative,
    Absolute,
    Sync,
    Other,
}

/// Device-independent view of one `input_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn key(code: u16, value: i32) -> Self {
        Self { kind: RawKind::Key, code, value }
    }

    pub fn rel(code: u16, value: i32) -> Self {
        Self { kind: RawKind::Relative, code, value }
    }

    pub fn abs(code: u16, value: i32) -> Self {
        Self { kind: RawKind::Absolute, code, value }
    }

    pub fn syn() -> Self {
        Self { kind: RawKind::Sync, code: Synchronization::SYN_REPORT.0, value: 0 }
    }

    fn is_report(&self) -> bool {
        self.kind == RawKind::Sync && self.code == Synchronization::SYN_REPORT.0
    }
}

impl From<&evdev::InputEvent> for RawEvent {
    fn from(ev: &evdev::InputEvent) -> Self {
        let kind = match ev.event_type() {
            EventType::KEY => RawKind::Key,
            EventType::RELATIVE => RawKind::Relative,
            EventType::ABSOLUTE => RawKind::Absolute,
            EventType::SYNCHRONIZATION => RawKind::Sync,
            _ => RawKind::Other,
        };
        Self { kind, code: ev.code(), value: ev.value() }
    }
}

/// Range the device reports for one absolute axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
    pub flat: i32,
}

impl AxisRange {
    pub fn new(min: i32, max: i32, flat: i32) -> Self {
        Self { min, max, flat }
    }

    /// Stick value in [-32768, 32767] with the deadzone applied.
    pub fn stick(&self, value: i32, invert: bool) -> i16 {
        let span = (self.max as f32 - self.min as f32).max(1.0);
        let half = span / 2.0;
        let centre = self.min as f32 + half;
        let offset = value as f32 - centre;

        let deadzone = if self.flat > 0 { self.flat as f32 } else { half * DEFAULT_DEADZONE };
        if offset.abs() <= deadzone {
            return 0;
        }
        let mut normalised = (offset / half).clamp(-1.0, 1.0);
        if invert {
            normalised = -normalised;
        }
        (normalised * 32767.0).round().clamp(-32768.0, 32767.0) as i16
    }

    /// Trigger value in [0, 255].
    pub fn trigger(&self, value: i32) -> u8 {
        let span = (self.max as f32 - self.min as f32).max(1.0);
        (((value as f32 - self.min as f32) / span).clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

impl Default for AxisRange {
    fn default() -> Self {
        Self::new(-32768, 32767, 0)
    }
}

/// What a device is treated as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub keyboard: bool,
    pub mouse: bool,
    pub gamepad: bool,
}

impl Capabilities {
    pub fn is_usable(&self) -> bool {
        self.keyboard || self.mouse || self.gamepad
    }
}

// ── Keyboard ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct KeyboardState {
    /// Modifier keys currently down; left and right count separately.
    held_modifiers: Vec<u16>,
}

impl KeyboardState {
    fn key(&mut self, code: u16, value: i32, out: &mut Vec<InputEvent>) {
        let Some(key_code) = keymap::vk_for(code) else { return };
        let is_modifier = keymap::modifier_bit(code) != 0;
        match value {
            // auto-repeat is sent as another press
            1 | 2 => {
                if is_modifier && !self.held_modifiers.contains(&code) {
                    self.held_modifiers.push(code);
                }
                out.push(InputEvent::KeyDown { key_code, modifiers: self.modifiers() });
            }
            0 => {
                self.held_modifiers.retain(|&held| held != code);
                out.push(InputEvent::KeyUp { key_code, modifiers: self.modifiers() });
            }
            _ => {}
        }
    }

    fn modifiers(&self) -> u8 {
        self.held_modifiers.iter().fold(0, |bits, &code| bits | keymap::modifier_bit(code))
    }
}

// ── Mouse ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MouseState {
    dx: i32,
    dy: i32,
}

impl MouseState {
    fn button(code: u16) -> Option<MouseButton> {
        Some(match Key::new(code) {
            Key::BTN_LEFT => MouseButton::Left,
            Key::BTN_MIDDLE => MouseButton::Middle,
            Key::BTN_RIGHT => MouseButton::Right,
            Key::BTN_SIDE => MouseButton::X1,
            Key::BTN_EXTRA => MouseButton::X2,
            _ => return None,
        })
    }

    fn flush(&mut self, out: &mut Vec<InputEvent>) {
        if self.dx != 0 || self.dy != 0 {
            out.push(InputEvent::MouseMove {
                dx: self.dx.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                dy: self.dy.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            });
            self.dx = 0;
            self.dy = 0;
        }
    }

    fn rel(&mut self, code: u16, value: i32, out: &mut Vec<InputEvent>) {
        match RelativeAxisType(code) {
            RelativeAxisType::REL_X => self.dx = self.dx.saturating_add(value),
            RelativeAxisType::REL_Y => self.dy = self.dy.saturating_add(value),
            RelativeAxisType::REL_WHEEL => {
                self.flush(out);
                out.push(InputEvent::Scroll { ticks: value.clamp(-128, 127) as i8 });
            }
            _ => {}
        }
    }
}

// ── Gamepad ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct GamepadState {
    mapping: GamepadMapping,
    ranges: HashMap<u16, AxisRange>,
    state: ControllerState,
    dirty: bool,
    buttons_changed: bool,
}

impl GamepadState {
    fn set_buttons(&mut self, flags: u16, pressed: bool) {
        let before = self.state.buttons;
        if pressed {
            self.state.buttons |= flags;
        } else {
            self.state.buttons &= !flags;
        }
        if self.state.buttons != before {
            self.dirty = true;
            self.buttons_changed = true;
        }
    }

    fn key(&mut self, code: u16, value: i32) -> bool {
        let Some(button) = self.mapping.button_for_key(code) else { return false };
        self.set_buttons(button.flag(), value != 0);
        true
    }

    fn abs(&mut self, code: u16, value: i32) {
        let Some(axis) = self.mapping.axis_for_abs(code) else { return };
        match axis {
            LogicalAxis::DpadX => {
                self.set_buttons(buttons::DPAD_LEFT, value < 0);
                self.set_buttons(buttons::DPAD_RIGHT, value > 0);
                return;
            }
            LogicalAxis::DpadY => {
                self.set_buttons(buttons::DPAD_UP, value < 0);
                self.set_buttons(buttons::DPAD_DOWN, value > 0);
                return;
            }
            _ => {}
        }

        let range = self.ranges.get(&code).copied().unwrap_or_default();
        let before = self.state;
        let s = &mut self.state;
        match axis {
            LogicalAxis::LeftStickX => s.left_stick_x = range.stick(value, false),
            LogicalAxis::LeftStickY => s.left_stick_y = range.stick(value, true),
            LogicalAxis::RightStickX => s.right_stick_x = range.stick(value, false),
            LogicalAxis::RightStickY => s.right_stick_y = range.stick(value, true),
            LogicalAxis::LeftTrigger => s.left_trigger = range.trigger(value),
            LogicalAxis::RightTrigger => s.right_trigger = range.trigger(value),
            LogicalAxis::DpadX | LogicalAxis::DpadY => {}
        }
        if self.state != before {
            self.dirty = true;
        }
    }

    fn report(&mut self, out: &mut Vec<InputEvent>) {
        if self.dirty {
            out.push(InputEvent::Controller {
                state: self.state,
                buttons_changed: self.buttons_changed,
            });
            self.dirty = false;
            self.buttons_changed = false;
        }
    }
}

// ── Translator ────────────────────────────────────────────────────────────────

/// Per-device translator; a device may be several of keyboard, mouse and
/// gamepad at once.
#[derive(Debug, Default)]
pub struct Translator {
    keyboard: Option<KeyboardState>,
    mouse: Option<MouseState>,
    gamepad: Option<GamepadState>,
}

impl Translator {
    pub fn new(
        caps: Capabilities,
        mapping: &GamepadMapping,
        ranges: HashMap<u16, AxisRange>,
    ) -> Self {
        Self {
            keyboard: caps.keyboard.then(KeyboardState::default),
            mouse: caps.mouse.then(MouseState::default),
            gamepad: caps.gamepad.then(|| GamepadState {
                mapping: mapping.clone(),
                ranges,
                state: ControllerState::default(),
                dirty: false,
                buttons_changed: false,
            }),
        }
    }

    pub fn translate(&mut self, ev: RawEvent, out: &mut Vec<InputEvent>) {
        match ev.kind {
            RawKind::Key => self.key(ev.code, ev.value, out),
            RawKind::Relative => {
                if let Some(mouse) = &mut self.mouse {
                    mouse.rel(ev.code, ev.value, out);
                }
            }
            RawKind::Absolute => {
                if let Some(pad) = &mut self.gamepad {
                    pad.abs(ev.code, ev.value);
                }
            }
            RawKind::Sync if ev.is_report() => {
                if let Some(mouse) = &mut self.mouse {
                    mouse.flush(out);
                }
                if let Some(pad) = &mut self.gamepad {
                    pad.report(out);
                }
            }
            _ => trace!("ignored {:?}", ev),
        }
    }

    fn key(&mut self, code: u16, value: i32, out: &mut Vec<InputEvent>) {
        if let Some(mouse) = &mut self.mouse {
            if let Some(button) = MouseState::button(code) {
                // motion before the click it led up to
                mouse.flush(out);
                match value {
                    0 => out.push(InputEvent::MouseButtonUp { button }),
                    1 => out.push(InputEvent::MouseButtonDown { button }),
                    _ => {}
                }
                return;
            }
        }
        if let Some(pad) = &mut self.gamepad {
            if pad.key(code, value) {
                return;
            }
        }
        if let Some(keyboard) = &mut self.keyboard {
            keyboard.key(code, value, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::AbsoluteAxisType;
    use pistream_core::input::modifiers;

    fn run(t: &mut Translator, events: &[RawEvent]) -> Vec<InputEvent> {
        let mut out = Vec::new();
        for ev in events {
            t.translate(*ev, &mut out);
        }
        out
    }

    fn keyboard() -> Translator {
        Translator::new(
            Capabilities { keyboard: true, ..Default::default() },
            &GamepadMapping::default(),
            HashMap::new(),
        )
    }

    fn mouse() -> Translator {
        Translator::new(
            Capabilities { mouse: true, ..Default::default() },
            &GamepadMapping::default(),
            HashMap::new(),
        )
    }

    fn gamepad() -> Translator {
        let mut ranges = HashMap::new();
        ranges.insert(AbsoluteAxisType::ABS_X.0, AxisRange::new(0, 255, 0));
        ranges.insert(AbsoluteAxisType::ABS_Y.0, AxisRange::new(0, 255, 0));
        ranges.insert(AbsoluteAxisType::ABS_Z.0, AxisRange::new(0, 1023, 0));
        ranges.insert(AbsoluteAxisType::ABS_HAT0X.0, AxisRange::new(-1, 1, 0));
        Translator::new(
            Capabilities { gamepad: true, ..Default::default() },
            &GamepadMapping::default(),
            ranges,
        )
    }

    #[test]
    fn shift_is_tracked_across_keys() {
        let mut t = keyboard();
        let out = run(
            &mut t,
            &[
                RawEvent::key(Key::KEY_LEFTSHIFT.code(), 1),
                RawEvent::key(Key::KEY_A.code(), 1),
                RawEvent::key(Key::KEY_A.code(), 2),
                RawEvent::key(Key::KEY_A.code(), 0),
                RawEvent::key(Key::KEY_LEFTSHIFT.code(), 0),
            ],
        );
        assert_eq!(
            out,
            vec![
                InputEvent::KeyDown { key_code: 0xa0, modifiers: modifiers::SHIFT },
                InputEvent::KeyDown { key_code: 0x41, modifiers: modifiers::SHIFT },
                InputEvent::KeyDown { key_code: 0x41, modifiers: modifiers::SHIFT },
                InputEvent::KeyUp { key_code: 0x41, modifiers: modifiers::SHIFT },
                InputEvent::KeyUp { key_code: 0xa0, modifiers: 0 },
            ]
        );
    }

    #[test]
    fn modifier_stays_down_while_either_side_is_held() {
        let mut t = keyboard();
        let out = run(
            &mut t,
            &[
                RawEvent::key(Key::KEY_LEFTSHIFT.code(), 1),
                RawEvent::key(Key::KEY_RIGHTSHIFT.code(), 1),
                RawEvent::key(Key::KEY_LEFTSHIFT.code(), 0),
                RawEvent::key(Key::KEY_A.code(), 1),
                RawEvent::key(Key::KEY_RIGHTSHIFT.code(), 0),
                RawEvent::key(Key::KEY_A.code(), 0),
            ],
        );
        assert_eq!(
            out,
            vec![
                InputEvent::KeyDown { key_code: 0xa0, modifiers: modifiers::SHIFT },
                InputEvent::KeyDown { key_code: 0xa1, modifiers: modifiers::SHIFT },
                InputEvent::KeyUp { key_code: 0xa0, modifiers: modifiers::SHIFT },
                InputEvent::KeyDown { key_code: 0x41, modifiers: modifiers::SHIFT },
                InputEvent::KeyUp { key_code: 0xa1, modifiers: 0 },
                InputEvent::KeyUp { key_code: 0x41, modifiers: 0 },
            ]
        );
    }

    #[test]
    fn motion_accumulates_until_report() {
        let mut t = mouse();
        let out = run(
            &mut t,
            &[
                RawEvent::rel(RelativeAxisType::REL_X.0, 3),
                RawEvent::rel(RelativeAxisType::REL_Y.0, -2),
                RawEvent::rel(RelativeAxisType::REL_X.0, 4),
                RawEvent::syn(),
                RawEvent::syn(),
            ],
        );
        assert_eq!(out, vec![InputEvent::MouseMove { dx: 7, dy: -2 }]);
    }

    #[test]
    fn click_flushes_pending_motion_first() {
        let mut t = mouse();
        let out = run(
            &mut t,
            &[
                RawEvent::rel(RelativeAxisType::REL_X.0, 1),
                RawEvent::key(Key::BTN_LEFT.code(), 1),
                RawEvent::syn(),
                RawEvent::rel(RelativeAxisType::REL_WHEEL.0, -1),
                RawEvent::key(Key::BTN_SIDE.code(), 0),
            ],
        );
        assert_eq!(
            out,
            vec![
                InputEvent::MouseMove { dx: 1, dy: 0 },
                InputEvent::MouseButtonDown { button: MouseButton::Left },
                InputEvent::Scroll { ticks: -1 },
                InputEvent::MouseButtonUp { button: MouseButton::X1 },
            ]
        );
    }

    #[test]
    fn gamepad_reports_once_per_frame() {
        let mut t = gamepad();
        let out = run(
            &mut t,
            &[
                RawEvent::key(Key::BTN_SOUTH.code(), 1),
                RawEvent::abs(AbsoluteAxisType::ABS_X.0, 255),
                RawEvent::abs(AbsoluteAxisType::ABS_Y.0, 0),
                RawEvent::abs(AbsoluteAxisType::ABS_Z.0, 1023),
                RawEvent::syn(),
                RawEvent::syn(),
            ],
        );
        assert_eq!(out.len(), 1);
        let InputEvent::Controller { state, buttons_changed } = out[0] else {
            panic!("expected controller event");
        };
        assert!(buttons_changed);
        assert_eq!(state.buttons, buttons::A);
        assert_eq!(state.left_stick_x, 32767);
        // Y is inverted: pushed up reads positive
        assert_eq!(state.left_stick_y, 32767);
        assert_eq!(state.left_trigger, 255);
    }

    #[test]
    fn axis_only_frames_are_not_button_changes() {
        let mut t = gamepad();
        let out = run(&mut t, &[RawEvent::abs(AbsoluteAxisType::ABS_X.0, 0), RawEvent::syn()]);
        assert_eq!(
            out,
            vec![InputEvent::Controller {
                state: ControllerState { left_stick_x: -32767, ..Default::default() },
                buttons_changed: false,
            }]
        );
    }

    #[test]
    fn hat_drives_dpad_buttons() {
        let mut t = gamepad();
        let out = run(
            &mut t,
            &[
                RawEvent::abs(AbsoluteAxisType::ABS_HAT0X.0, -1),
                RawEvent::syn(),
                RawEvent::abs(AbsoluteAxisType::ABS_HAT0X.0, 0),
                RawEvent::syn(),
            ],
        );
        let buttons: Vec<u16> = out
            .iter()
            .map(|e| match e {
                InputEvent::Controller { state, .. } => state.buttons,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(buttons, vec![buttons::DPAD_LEFT, 0]);
    }

    #[test]
    fn deadzone_is_symmetric() {
        let range = AxisRange::new(-100, 100, 10);
        assert_eq!(range.stick(10, false), 0);
        assert_eq!(range.stick(-10, false), 0);
        assert!(range.stick(11, false) > 0);
        assert!(range.stick(-11, false) < 0);
        assert_eq!(range.stick(100, true), -32767);
    }

    #[test]
    fn trigger_range() {
        let range = AxisRange::new(0, 255, 0);
        assert_eq!(range.trigger(0), 0);
        assert_eq!(range.trigger(255), 255);
        assert_eq!(range.trigger(300), 255);
    }

    #[test]
    fn trigger_survives_extreme_absinfo() {
        let range = AxisRange::new(i32::MIN, i32::MAX, 0);
        assert_eq!(range.trigger(i32::MIN), 0);
        assert_eq!(range.trigger(i32::MAX), 255);

        let range = AxisRange::new(0, 255, 0);
        assert_eq!(range.trigger(i32::MIN), 0);
    }
}
