//! Terminal grid and escape sequence parser

mod color;
mod grid;
mod parser;

pub use color::{FontWeight, Rgb};
pub use grid::{
    AttrFlags, Cell, CellAttrs, Cursor, Row, TerminalGrid, DEFAULT_COLS, DEFAULT_ROWS,
};
pub use parser::{Action, CsiSequence, ParserState, VtParser, MAX_SEQUENCE_LEN};
