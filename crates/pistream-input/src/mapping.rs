//! Gamepad mapping: physical evdev codes to logical controller controls.
//!
//! File format, one entry per line:
//!
//! ```text
//! # physical logical
//! 304 0
//! 1 17
//! ```
//!
//! A logical button (0..=14) is fed by an evdev key code, a logical axis
//! (16..=23) by an evdev absolute axis code.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use evdev::{AbsoluteAxisType, Key};
use pistream_core::input::buttons;
use pistream_core::InputError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogicalButton {
    A = 0,
    B = 1,
    X = 2,
    Y = 3,
    Lb = 4,
    Rb = 5,
    Back = 6,
    Play = 7,
    Special = 8,
    LsClick = 9,
    RsClick = 10,
    DpadUp = 11,
    DpadDown = 12,
    DpadLeft = 13,
    DpadRight = 14,
}

impl LogicalButton {
    pub fn from_code(code: u16) -> Option<Self> {
        use LogicalButton::*;
        Some(match code {
            0 => A,
            1 => B,
            2 => X,
            3 => Y,
            4 => Lb,
            5 => Rb,
            6 => Back,
            7 => Play,
            8 => Special,
            9 => LsClick,
            10 => RsClick,
            11 => DpadUp,
            12 => DpadDown,
            13 => DpadLeft,
            14 => DpadRight,
            _ => return None,
        })
    }

    /// Host button flag.
    pub fn flag(self) -> u16 {
        use LogicalButton::*;
        match self {
            A => buttons::A,
            B => buttons::B,
            X => buttons::X,
            Y => buttons::Y,
            Lb => buttons::LB,
            Rb => buttons::RB,
            Back => buttons::BACK,
            Play => buttons::PLAY,
            Special => buttons::SPECIAL,
            LsClick => buttons::LS_CLICK,
            RsClick => buttons::RS_CLICK,
            DpadUp => buttons::DPAD_UP,
            DpadDown => buttons::DPAD_DOWN,
            DpadLeft => buttons::DPAD_LEFT,
            DpadRight => buttons::DPAD_RIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogicalAxis {
    LeftStickX = 16,
    LeftStickY = 17,
    RightStickX = 18,
    RightStickY = 19,
    LeftTrigger = 20,
    RightTrigger = 21,
    DpadX = 22,
    DpadY = 23,
}

impl LogicalAxis {
    pub fn from_code(code: u16) -> Option<Self> {
        use LogicalAxis::*;
        Some(match code {
            16 => LeftStickX,
            17 => LeftStickY,
            18 => RightStickX,
            19 => RightStickY,
            20 => LeftTrigger,
            21 => RightTrigger,
            22 => DpadX,
            23 => DpadY,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamepadMapping {
    buttons: BTreeMap<u16, LogicalButton>,
    axes: BTreeMap<u16, LogicalAxis>,
}

impl Default for GamepadMapping {
    /// Xbox-style evdev layout.
    fn default() -> Self {
        let buttons = [
            (Key::BTN_SOUTH, LogicalButton::A),
            (Key::BTN_EAST, LogicalButton::B),
            (Key::BTN_NORTH, LogicalButton::X),
            (Key::BTN_WEST, LogicalButton::Y),
            (Key::BTN_TL, LogicalButton::Lb),
            (Key::BTN_TR, LogicalButton::Rb),
            (Key::BTN_SELECT, LogicalButton::Back),
            (Key::BTN_START, LogicalButton::Play),
            (Key::BTN_MODE, LogicalButton::Special),
            (Key::BTN_THUMBL, LogicalButton::LsClick),
            (Key::BTN_THUMBR, LogicalButton::RsClick),
            (Key::BTN_DPAD_UP, LogicalButton::DpadUp),
            (Key::BTN_DPAD_DOWN, LogicalButton::DpadDown),
            (Key::BTN_DPAD_LEFT, LogicalButton::DpadLeft),
            (Key::BTN_DPAD_RIGHT, LogicalButton::DpadRight),
        ]
        .into_iter()
        .map(|(k, b)| (k.code(), b))
        .collect();

        let axes = [
            (AbsoluteAxisType::ABS_X, LogicalAxis::LeftStickX),
            (AbsoluteAxisType::ABS_Y, LogicalAxis::LeftStickY),
            (AbsoluteAxisType::ABS_RX, LogicalAxis::RightStickX),
            (AbsoluteAxisType::ABS_RY, LogicalAxis::RightStickY),
            (AbsoluteAxisType::ABS_Z, LogicalAxis::LeftTrigger),
            (AbsoluteAxisType::ABS_RZ, LogicalAxis::RightTrigger),
            (AbsoluteAxisType::ABS_HAT0X, LogicalAxis::DpadX),
            (AbsoluteAxisType::ABS_HAT0Y, LogicalAxis::DpadY),
        ]
        .into_iter()
        .map(|(a, l)| (a.0, l))
        .collect();

        Self { buttons, axes }
    }
}

impl GamepadMapping {
    pub fn empty() -> Self {
        Self { buttons: BTreeMap::new(), axes: BTreeMap::new() }
    }

    pub fn load(path: &Path) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, InputError> {
        let mut mapping = Self::empty();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let err = |reason: &str| InputError::Mapping { line: line_no, reason: reason.to_owned() };

            let mut fields = line.split_whitespace();
            let (Some(physical), Some(logical), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(err("expected `physical logical`"));
            };
            let physical: u16 = physical.parse().map_err(|_| err("physical code is not a number"))?;
            let logical: u16 = logical.parse().map_err(|_| err("logical code is not a number"))?;

            if let Some(button) = LogicalButton::from_code(logical) {
                mapping.buttons.insert(physical, button);
            } else if let Some(axis) = LogicalAxis::from_code(logical) {
                mapping.axes.insert(physical, axis);
            } else {
                return Err(err("unknown logical code"));
            }
        }
        Ok(mapping)
    }

    /// Same format [`parse`](Self::parse) reads.
    pub fn serialize(&self) -> String {
        let mut out = String::from("# physical logical\n");
        for (physical, button) in &self.buttons {
            let _ = writeln!(out, "{} {}", physical, *button as u16);
        }
        for (physical, axis) in &self.axes {
            let _ = writeln!(out, "{} {}", physical, *axis as u16);
        }
        out
    }

    pub fn button_for_key(&self, code: u16) -> Option<LogicalButton> {
        self.buttons.get(&code).copied()
    }

    pub fn axis_for_abs(&self, code: u16) -> Option<LogicalAxis> {
        self.axes.get(&code).copied()
    }

    pub fn mapped_keys(&self) -> impl Iterator<Item = u16> + '_ {
        self.buttons.keys().copied()
    }

    pub fn mapped_axes(&self) -> impl Iterator<Item = u16> + '_ {
        self.axes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let m = GamepadMapping::default();
        assert_eq!(m.button_for_key(304), Some(LogicalButton::A));
        assert_eq!(m.button_for_key(316), Some(LogicalButton::Special));
        assert_eq!(m.axis_for_abs(5), Some(LogicalAxis::RightTrigger));
        assert_eq!(m.axis_for_abs(17), Some(LogicalAxis::DpadY));
    }

    #[test]
    fn parse_serialize_parse_is_identity() {
        let original = GamepadMapping::default();
        let text = original.serialize();
        let parsed = GamepadMapping::parse(&text).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(GamepadMapping::parse(&parsed.serialize()).unwrap(), parsed);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let m = GamepadMapping::parse("# my pad\n\n305 0   # swap A/B\n304 1\n").unwrap();
        assert_eq!(m.button_for_key(305), Some(LogicalButton::A));
        assert_eq!(m.button_for_key(304), Some(LogicalButton::B));
        assert_eq!(m.axis_for_abs(0), None);
    }

    #[test]
    fn errors_carry_line_number() {
        match GamepadMapping::parse("304 0\n\nfoo 1\n") {
            Err(InputError::Mapping { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
        match GamepadMapping::parse("304 15\n") {
            Err(InputError::Mapping { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(GamepadMapping::parse("1 2 3\n").is_err());
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pad.map");
        std::fs::write(&path, "0 16\n1 17\n").unwrap();
        let m = GamepadMapping::load(&path).unwrap();
        assert_eq!(m.axis_for_abs(1), Some(LogicalAxis::LeftStickY));
        assert!(GamepadMapping::load(&dir.path().join("missing")).is_err());
    }
}
