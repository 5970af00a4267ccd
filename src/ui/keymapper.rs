//! Key mapping for terminal input
//!
//! Converts key events to the bytes written to the child's stdin, and to the
//! bytes echoed locally into the grid. A child on plain pipes has no TTY, so it
//! does not echo what it reads.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::config::Config;

const ESC: u8 = 0x1B;
const BACKSPACE: u8 = 0x08;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Key mapper for converting key events to bytes
#[derive(Debug, Clone)]
pub struct KeyMapper {
    newline: Vec<u8>,
}

impl Default for KeyMapper {
    fn default() -> Self {
        Self::new("\n")
    }
}

impl KeyMapper {
    /// `newline` is what the Enter key sends
    pub fn new(newline: &str) -> Self {
        let newline = if newline.is_empty() { "\n" } else { newline };
        Self {
            newline: newline.as_bytes().to_vec(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.newline)
    }

    /// Bytes for the child, or `None` for keys that send nothing
    pub fn map(&self, event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),
            KeyCode::Enter => Some(self.newline.clone()),
            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![ESC, BACKSPACE])
                } else {
                    Some(vec![BACKSPACE])
                }
            }
            KeyCode::Tab => Some(vec![b'\t']),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
            KeyCode::Esc => Some(vec![ESC]),

            KeyCode::Up => Some(Self::cursor_key(b'A', mods)),
            KeyCode::Down => Some(Self::cursor_key(b'B', mods)),
            KeyCode::Right => Some(Self::cursor_key(b'C', mods)),
            KeyCode::Left => Some(Self::cursor_key(b'D', mods)),
            KeyCode::Home => Some(Self::cursor_key(b'H', mods)),
            KeyCode::End => Some(Self::cursor_key(b'F', mods)),

            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Self::function_key(n, mods),

            _ => None,
        }
    }

    /// What to append to the grid after sending `input` to the child.
    ///
    /// Printable text and tabs echo as typed, the Enter sequence echoes as CR LF,
    /// and a lone backspace erases the previous cell. Escape sequences and other
    /// control bytes do not echo.
    pub fn local_echo(&self, input: &[u8]) -> Option<Vec<u8>> {
        if input.is_empty() {
            return None;
        }
        if input == self.newline.as_slice() {
            return Some(b"\r\n".to_vec());
        }
        if input == [BACKSPACE].as_slice() {
            return Some(vec![BACKSPACE]);
        }
        if input.iter().all(|&b| b == b'\t' || (0x20..=0x7E).contains(&b)) {
            return Some(input.to_vec());
        }
        None
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            if let Some(code) = Self::control_code(ch) {
                return if alt { vec![ESC, code] } else { vec![code] };
            }
        }

        let mut bytes = Vec::with_capacity(ch.len_utf8() + 1);
        if alt {
            bytes.push(ESC);
        }
        let mut utf8 = [0u8; 4];
        bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
        bytes
    }

    // Ctrl+letter and the punctuation control codes
    fn control_code(ch: char) -> Option<u8> {
        match ch {
            'a'..='z' => Some(ch as u8 - b'a' + 1),
            'A'..='Z' => Some(ch as u8 - b'A' + 1),
            '@' | '`' | ' ' => Some(0x00),
            '[' => Some(ESC),
            '\\' => Some(0x1C),
            ']' => Some(0x1D),
            '^' | '~' => Some(0x1E),
            '_' | '?' => Some(0x1F),
            _ => None,
        }
    }

    /// Arrows, Home and End: `ESC [ key`, or `ESC [ 1 ; mod key` with modifiers
    fn cursor_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![ESC, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// PageUp, PageDown, Insert, Delete: `ESC [ code ~`
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        // F1-F4 are SS3 keys, the rest use tilde codes
        let ss3 = match n {
            1 => Some(b'P'),
            2 => Some(b'Q'),
            3 => Some(b'R'),
            4 => Some(b'S'),
            _ => None,
        };
        if let Some(key) = ss3 {
            return Some(if mods.is_empty() {
                vec![ESC, b'O', key]
            } else {
                format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
            });
        }

        let code = match n {
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return None,
        };
        Some(Self::tilde_key(code, mods))
    }

    /// Calculate xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}
