//! evdev key codes → Windows virtual-key codes, which the host expects.

use evdev::Key;
use pistream_core::input::modifiers;
use tracing::trace;

/// Virtual-key code for an evdev key, `None` for keys the host has no
/// equivalent of.
pub fn vk_for(code: u16) -> Option<u16> {
    let vk = match Key::new(code) {
        // Letters
        Key::KEY_A => 0x41, Key::KEY_B => 0x42, Key::KEY_C => 0x43,
        Key::KEY_D => 0x44, Key::KEY_E => 0x45, Key::KEY_F => 0x46,
        Key::KEY_G => 0x47, Key::KEY_H => 0x48, Key::KEY_I => 0x49,
        Key::KEY_J => 0x4a, Key::KEY_K => 0x4b, Key::KEY_L => 0x4c,
        Key::KEY_M => 0x4d, Key::KEY_N => 0x4e, Key::KEY_O => 0x4f,
        Key::KEY_P => 0x50, Key::KEY_Q => 0x51, Key::KEY_R => 0x52,
        Key::KEY_S => 0x53, Key::KEY_T => 0x54, Key::KEY_U => 0x55,
        Key::KEY_V => 0x56, Key::KEY_W => 0x57, Key::KEY_X => 0x58,
        Key::KEY_Y => 0x59, Key::KEY_Z => 0x5a,
        // Digits
        Key::KEY_0 => 0x30, Key::KEY_1 => 0x31, Key::KEY_2 => 0x32,
        Key::KEY_3 => 0x33, Key::KEY_4 => 0x34, Key::KEY_5 => 0x35,
        Key::KEY_6 => 0x36, Key::KEY_7 => 0x37, Key::KEY_8 => 0x38,
        Key::KEY_9 => 0x39,
        // Function keys
        Key::KEY_F1  => 0x70, Key::KEY_F2  => 0x71, Key::KEY_F3  => 0x72,
        Key::KEY_F4  => 0x73, Key::KEY_F5  => 0x74, Key::KEY_F6  => 0x75,
        Key::KEY_F7  => 0x76, Key::KEY_F8  => 0x77, Key::KEY_F9  => 0x78,
        Key::KEY_F10 => 0x79, Key::KEY_F11 => 0x7a, Key::KEY_F12 => 0x7b,
        // Navigation
        Key::KEY_LEFT => 0x25, Key::KEY_UP => 0x26,
        Key::KEY_RIGHT => 0x27, Key::KEY_DOWN => 0x28,
        Key::KEY_HOME => 0x24, Key::KEY_END => 0x23,
        Key::KEY_PAGEUP => 0x21, Key::KEY_PAGEDOWN => 0x22,
        Key::KEY_INSERT => 0x2d, Key::KEY_DELETE => 0x2e,
        // Editing
        Key::KEY_BACKSPACE => 0x08,
        Key::KEY_TAB => 0x09,
        Key::KEY_ENTER | Key::KEY_KPENTER => 0x0d,
        Key::KEY_ESC => 0x1b,
        Key::KEY_SPACE => 0x20,
        Key::KEY_CAPSLOCK => 0x14,
        Key::KEY_NUMLOCK => 0x90,
        Key::KEY_SCROLLLOCK => 0x91,
        Key::KEY_SYSRQ => 0x2c,
        Key::KEY_PAUSE => 0x13,
        // Punctuation (US layout OEM keys)
        Key::KEY_SEMICOLON => 0xba,
        Key::KEY_EQUAL => 0xbb,
        Key::KEY_COMMA => 0xbc,
        Key::KEY_MINUS => 0xbd,
        Key::KEY_DOT => 0xbe,
        Key::KEY_SLASH => 0xbf,
        Key::KEY_GRAVE => 0xc0,
        Key::KEY_LEFTBRACE => 0xdb,
        Key::KEY_BACKSLASH => 0xdc,
        Key::KEY_RIGHTBRACE => 0xdd,
        Key::KEY_APOSTROPHE => 0xde,
        Key::KEY_102ND => 0xe2,
        // Keypad
        Key::KEY_KP0 => 0x60, Key::KEY_KP1 => 0x61, Key::KEY_KP2 => 0x62,
        Key::KEY_KP3 => 0x63, Key::KEY_KP4 => 0x64, Key::KEY_KP5 => 0x65,
        Key::KEY_KP6 => 0x66, Key::KEY_KP7 => 0x67, Key::KEY_KP8 => 0x68,
        Key::KEY_KP9 => 0x69,
        Key::KEY_KPASTERISK => 0x6a,
        Key::KEY_KPPLUS => 0x6b,
        Key::KEY_KPMINUS => 0x6d,
        Key::KEY_KPDOT => 0x6e,
        Key::KEY_KPSLASH => 0x6f,
        // Modifiers
        Key::KEY_LEFTSHIFT => 0xa0, Key::KEY_RIGHTSHIFT => 0xa1,
        Key::KEY_LEFTCTRL => 0xa2, Key::KEY_RIGHTCTRL => 0xa3,
        Key::KEY_LEFTALT => 0xa4, Key::KEY_RIGHTALT => 0xa5,
        Key::KEY_LEFTMETA => 0x5b, Key::KEY_RIGHTMETA => 0x5c,
        Key::KEY_COMPOSE => 0x5d,
        _ => {
            trace!("No virtual-key for evdev key {}", code);
            return None;
        }
    };
    Some(vk)
}

/// Modifier bit an evdev key contributes, 0 for ordinary keys.
pub fn modifier_bit(code: u16) -> u8 {
    match Key::new(code) {
        Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT => modifiers::SHIFT,
        Key::KEY_LEFTCTRL | Key::KEY_RIGHTCTRL => modifiers::CTRL,
        Key::KEY_LEFTALT | Key::KEY_RIGHTALT => modifiers::ALT,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits_use_ascii_vks() {
        assert_eq!(vk_for(Key::KEY_A.code()), Some(b'A' as u16));
        assert_eq!(vk_for(Key::KEY_Q.code()), Some(b'Q' as u16));
        assert_eq!(vk_for(Key::KEY_0.code()), Some(b'0' as u16));
        assert_eq!(vk_for(Key::KEY_5.code()), Some(b'5' as u16));
    }

    #[test]
    fn both_enters_map_to_return() {
        assert_eq!(vk_for(Key::KEY_ENTER.code()), Some(0x0d));
        assert_eq!(vk_for(Key::KEY_KPENTER.code()), Some(0x0d));
    }

    #[test]
    fn unknown_keys_are_skipped() {
        assert_eq!(vk_for(Key::BTN_LEFT.code()), None);
        assert_eq!(vk_for(0), None);
    }

    #[test]
    fn modifier_bits() {
        assert_eq!(modifier_bit(Key::KEY_RIGHTSHIFT.code()), modifiers::SHIFT);
        assert_eq!(modifier_bit(Key::KEY_LEFTCTRL.code()), modifiers::CTRL);
        assert_eq!(modifier_bit(Key::KEY_A.code()), 0);
    }
}
