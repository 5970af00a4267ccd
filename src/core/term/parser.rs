//! Escape sequence parser
//!
//! Turns the raw byte stream into [`Action`]s. The parser owns no grid state,
//! so it can be driven and tested on its own; [`TerminalGrid`](super::TerminalGrid)
//! applies the actions.

use tracing::debug;

const ESC: u8 = 0x1B;

/// Longest escape sequence buffered.
///
/// A sequence only ends on an ASCII letter. Bytes past this length are
/// dropped, and the sequence is discarded when its letter finally arrives.
pub const MAX_SEQUENCE_LEN: usize = 256;

/// Parser state machine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Idle,
    /// Inside an escape sequence. Holds every byte seen so far, starting with ESC.
    Accumulating(Vec<u8>),
}

/// What the grid should do with one input byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to apply (byte consumed by a sequence, ignored, or discarded)
    None,
    /// Printable ASCII character
    Print(u8),
    /// One of the handled C0 controls: `\r`, `\n`, `\t`, `\b`, `\a`
    Control(u8),
    /// Completed `ESC [ params final` sequence
    Csi(CsiSequence),
}

/// A completed control sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiSequence {
    params: Vec<u8>,
    final_byte: u8,
}

impl CsiSequence {
    pub fn new(params: &[u8], final_byte: u8) -> Self {
        Self {
            params: params.to_vec(),
            final_byte,
        }
    }

    /// The letter that terminated the sequence
    pub fn final_byte(&self) -> u8 {
        self.final_byte
    }

    /// Raw parameter bytes between `[` and the final letter
    pub fn raw_params(&self) -> &[u8] {
        &self.params
    }

    /// `;`-separated numeric parameters.
    ///
    /// Empty or non-numeric entries come back as `None` so callers can
    /// substitute their own default. An empty parameter string yields no entries.
    pub fn params(&self) -> Vec<Option<u32>> {
        if self.params.is_empty() {
            return Vec::new();
        }
        self.params
            .split(|&b| b == b';')
            .map(|token| {
                std::str::from_utf8(token)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
            })
            .collect()
    }

    /// Parameter at `index`, or `default` when absent or malformed
    pub fn param(&self, index: usize, default: u32) -> u32 {
        self.params()
            .get(index)
            .copied()
            .flatten()
            .unwrap_or(default)
    }
}

/// Byte-at-a-time escape sequence parser
#[derive(Debug, Default)]
pub struct VtParser {
    state: ParserState,
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
        }
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Feed a single byte to the parser
    pub fn advance(&mut self, byte: u8) -> Action {
        let ParserState::Accumulating(buffer) = &mut self.state else {
            return self.idle(byte);
        };

        // Length MAX_SEQUENCE_LEN + 1 marks an overflowed sequence
        let overflowed = buffer.len() > MAX_SEQUENCE_LEN;
        if byte.is_ascii_alphabetic() {
            let mut sequence = std::mem::take(buffer);
            self.state = ParserState::Idle;
            if overflowed {
                debug!("Escape sequence exceeded {} bytes, discarded", MAX_SEQUENCE_LEN);
                return Action::None;
            }
            sequence.push(byte);
            return Self::complete(&sequence);
        }

        if !overflowed {
            buffer.push(byte);
        }
        Action::None
    }

    fn idle(&mut self, byte: u8) -> Action {
        match byte {
            ESC => {
                self.state = ParserState::Accumulating(vec![ESC]);
                Action::None
            }
            b'\r' | b'\n' | b'\t' | 0x08 | 0x07 => Action::Control(byte),
            0x20..=0x7E => Action::Print(byte),
            _ => Action::None,
        }
    }

    /// Classify a terminated sequence (leading ESC included)
    fn complete(sequence: &[u8]) -> Action {
        let body = &sequence[1..];
        match body {
            [b'[', params @ .., final_byte] => Action::Csi(CsiSequence::new(params, *final_byte)),
            _ => {
                debug!("Unhandled escape sequence: {:?}", String::from_utf8_lossy(body));
                Action::None
            }
        }
    }
}
