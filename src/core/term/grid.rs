//! Terminal grid
//!
//! This module defines the cell grid, cursor and active attributes, and applies
//! parser actions to them.

use bitflags::bitflags;
use tracing::debug;

use super::color::{FontWeight, Rgb};
use super::parser::{Action, CsiSequence, VtParser};

/// Columns until the first resize
pub const DEFAULT_COLS: u16 = 80;
/// Rows until the first resize
pub const DEFAULT_ROWS: u16 = 25;

const TAB_WIDTH: u16 = 8;

bitflags! {
    /// Text decorations
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u8 {
        const UNDERLINE     = 0b0001;
        const ITALIC        = 0b0010;
        const STRIKETHROUGH = 0b0100;
    }
}

/// Cell attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellAttrs {
    pub fg: Rgb,
    pub bg: Rgb,
    pub weight: FontWeight,
    pub flags: AttrFlags,
}

impl Default for CellAttrs {
    fn default() -> Self {
        Self {
            fg: Rgb::DEFAULT_FG,
            bg: Rgb::DEFAULT_BG,
            weight: FontWeight::Normal,
            flags: AttrFlags::empty(),
        }
    }
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A single cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ch: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: b' ',
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn new(ch: u8, attrs: CellAttrs) -> Self {
        Self { ch, attrs }
    }

    /// A space carrying the given attributes
    pub fn blank(attrs: CellAttrs) -> Self {
        Self { ch: b' ', attrs }
    }

    /// Character to display (space for an empty cell)
    pub fn character(&self) -> char {
        if self.ch == 0 {
            ' '
        } else {
            self.ch as char
        }
    }

    pub fn foreground(&self) -> Rgb {
        self.attrs.fg
    }

    pub fn background(&self) -> Rgb {
        self.attrs.bg
    }

    pub fn weight(&self) -> FontWeight {
        self.attrs.weight
    }

    pub fn underline(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::UNDERLINE)
    }

    pub fn italic(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::ITALIC)
    }

    pub fn strikethrough(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::STRIKETHROUGH)
    }
}

/// A single row. Always exactly as wide as the grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Row contents as text with trailing spaces trimmed
    pub fn text(&self) -> String {
        let line: String = self.cells.iter().map(Cell::character).collect();
        line.trim_end_matches(' ').to_string()
    }

    fn resize(&mut self, new_cols: u16) {
        self.cells.resize(new_cols as usize, Cell::default());
    }

    fn clear(&mut self) {
        self.cells.fill(Cell::default());
    }
}

/// Cursor position, always inside the grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub col: u16,
    pub row: u16,
}

/// Fixed-size grid of styled cells fed by the child's output stream
#[derive(Debug)]
pub struct TerminalGrid {
    cols: u16,
    rows: u16,
    lines: Vec<Row>,
    cursor: Cursor,
    current_attrs: CellAttrs,
    /// Protected input boundary (col, row)
    prompt_end: Option<(u16, u16)>,
    /// Set after writing the last column; the next printable character wraps first
    wrap_pending: bool,
    parser: VtParser,
    dirty: bool,
}

impl Default for TerminalGrid {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

impl TerminalGrid {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            lines: (0..rows).map(|_| Row::new(cols)).collect(),
            cursor: Cursor::default(),
            current_attrs: CellAttrs::default(),
            prompt_end: None,
            wrap_pending: false,
            parser: VtParser::new(),
            dirty: true,
        }
    }

    /// Reallocate a blank grid and home the cursor
    pub fn initialize(&mut self, cols: u16, rows: u16) {
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        self.lines = (0..self.rows).map(|_| Row::new(self.cols)).collect();
        self.cursor = Cursor::default();
        self.wrap_pending = false;
        self.dirty = true;
    }

    /// Resize the grid.
    ///
    /// The overlapping top-left rectangle is kept; everything outside it is lost.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);

        self.lines.truncate(rows as usize);
        while self.lines.len() < rows as usize {
            self.lines.push(Row::new(cols));
        }
        for row in &mut self.lines {
            row.resize(cols);
        }

        self.cols = cols;
        self.rows = rows;
        self.wrap_pending = false;
        self.clamp_cursor();
        self.dirty = true;
        debug!("Grid resized to {}x{}", cols, rows);
    }

    /// Feed a chunk of child output
    pub fn append_output(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.process_character(byte);
        }
    }

    /// Feed a single byte
    pub fn process_character(&mut self, byte: u8) {
        match self.parser.advance(byte) {
            Action::None => return,
            Action::Print(ch) => self.put_char(ch),
            Action::Control(b'\r') => self.carriage_return(),
            Action::Control(b'\n') => self.newline(),
            Action::Control(b'\t') => self.horizontal_tab(),
            Action::Control(0x08) => self.backspace(),
            Action::Control(_) => return, // BEL
            Action::Csi(seq) => self.execute_csi(&seq),
        }
        self.clamp_cursor();
        self.dirty = true;
    }

    // ---- read-only snapshots ----

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Plain-text snapshot, one string per row, trailing spaces trimmed
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().map(Row::text).collect()
    }

    /// All rows, top to bottom
    pub fn buffer(&self) -> &[Row] {
        &self.lines
    }

    pub fn cell(&self, col: u16, row: u16) -> Option<&Cell> {
        self.lines.get(row as usize)?.cells.get(col as usize)
    }

    /// Cursor as (x, y)
    pub fn cursor_position(&self) -> (u16, u16) {
        (self.cursor.col, self.cursor.row)
    }

    pub fn current_attrs(&self) -> &CellAttrs {
        &self.current_attrs
    }

    /// Whether anything changed since the last [`clear_dirty`](Self::clear_dirty)
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    // ---- prompt protection ----

    /// Mark where the shell prompt ends; backspace will not move at or before it on that row
    pub fn set_prompt_end(&mut self, x: u16, y: u16) {
        self.prompt_end = Some((x, y));
    }

    pub fn reset_prompt_protection(&mut self) {
        self.prompt_end = None;
    }

    pub fn prompt_end(&self) -> Option<(u16, u16)> {
        self.prompt_end
    }

    // ---- cursor ----

    /// Move the cursor to (x, y), clamped
    pub fn move_cursor(&mut self, x: u16, y: u16) {
        self.cursor.col = x;
        self.cursor.row = y;
        self.wrap_pending = false;
        self.clamp_cursor();
    }

    /// Move the cursor by (dx, dy), clamped
    pub fn move_cursor_relative(&mut self, dx: i32, dy: i32) {
        let col = i32::from(self.cursor.col)
            .saturating_add(dx)
            .clamp(0, i32::from(self.cols) - 1);
        let row = i32::from(self.cursor.row)
            .saturating_add(dy)
            .clamp(0, i32::from(self.rows) - 1);
        // Both values are clamped into u16 range above
        self.move_cursor(col as u16, row as u16);
    }

    fn clamp_cursor(&mut self) {
        self.cursor.col = self.cursor.col.min(self.cols - 1);
        self.cursor.row = self.cursor.row.min(self.rows - 1);
    }

    // ---- editing ----

    /// Reset every cell to the default cell
    pub fn clear(&mut self) {
        for row in &mut self.lines {
            row.clear();
        }
        self.dirty = true;
    }

    /// Reset one row to default cells; out-of-range rows are ignored
    pub fn clear_line(&mut self, row: u16) {
        if let Some(line) = self.lines.get_mut(row as usize) {
            line.clear();
            self.dirty = true;
        }
    }

    /// Scroll content up by `n` rows, discarding the top and adding blank rows at the bottom
    pub fn scroll_up(&mut self, n: u16) {
        let n = n.min(self.rows) as usize;
        if n == 0 {
            return;
        }
        self.lines.drain(..n);
        let cols = self.cols;
        self.lines.extend((0..n).map(|_| Row::new(cols)));
        self.dirty = true;
    }

    fn put_char(&mut self, ch: u8) {
        if self.wrap_pending {
            self.newline();
        }

        let Cursor { col, row } = self.cursor;
        self.lines[row as usize].cells[col as usize] = Cell::new(ch, self.current_attrs);

        if col + 1 >= self.cols {
            self.wrap_pending = true;
        } else {
            self.cursor.col += 1;
        }
    }

    fn carriage_return(&mut self) {
        self.cursor.col = 0;
        self.wrap_pending = false;
    }

    /// Line feed with implied carriage return; scrolls at the bottom row
    fn newline(&mut self) {
        self.cursor.col = 0;
        self.wrap_pending = false;
        if self.cursor.row + 1 >= self.rows {
            self.scroll_up(1);
            self.cursor.row = self.rows - 1;
        } else {
            self.cursor.row += 1;
        }
    }

    fn horizontal_tab(&mut self) {
        let next_stop = (self.cursor.col / TAB_WIDTH + 1).saturating_mul(TAB_WIDTH);
        self.cursor.col = next_stop.min(self.cols - 1);
        self.wrap_pending = false;
    }

    fn backspace(&mut self) {
        if let Some((prompt_col, prompt_row)) = self.prompt_end {
            if self.cursor.row == prompt_row && self.cursor.col <= prompt_col {
                return;
            }
        }

        self.wrap_pending = false;
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
            let Cursor { col, row } = self.cursor;
            self.lines[row as usize].cells[col as usize] = Cell::blank(self.current_attrs);
        }
    }

    /// Erase in display. Erased cells become default cells.
    fn erase_in_display(&mut self, mode: u32) {
        let row = self.cursor.row as usize;
        match mode {
            0 => {
                self.erase_in_line(0);
                for line in &mut self.lines[row + 1..] {
                    line.clear();
                }
            }
            1 => {
                for line in &mut self.lines[..row] {
                    line.clear();
                }
                self.erase_in_line(1);
            }
            2 => self.clear(),
            _ => debug!("Unsupported erase-in-display mode {}", mode),
        }
    }

    /// Erase in line. Erased cells become default cells.
    fn erase_in_line(&mut self, mode: u32) {
        let Cursor { col, row } = self.cursor;
        let cells = &mut self.lines[row as usize].cells;
        match mode {
            0 => cells[col as usize..].fill(Cell::default()),
            1 => cells[..=col as usize].fill(Cell::default()),
            2 => cells.fill(Cell::default()),
            _ => debug!("Unsupported erase-in-line mode {}", mode),
        }
    }

    // ---- control sequences ----

    fn execute_csi(&mut self, seq: &CsiSequence) {
        match seq.final_byte() {
            // CUP - Cursor Position
            b'H' | b'f' => {
                let row = seq.param(0, 1).saturating_sub(1);
                let col = seq.param(1, 1).saturating_sub(1);
                self.move_cursor(clamp_u16(col), clamp_u16(row));
            }
            b'A' => self.move_cursor_relative(0, -count(seq)),
            b'B' => self.move_cursor_relative(0, count(seq)),
            b'C' => self.move_cursor_relative(count(seq), 0),
            b'D' => self.move_cursor_relative(-count(seq), 0),
            b'J' => self.erase_in_display(seq.param(0, 0)),
            b'K' => self.erase_in_line(seq.param(0, 0)),
            b'm' => self.execute_sgr(seq),
            other => {
                debug!(
                    "Unknown CSI: params={:?}, final={:?}",
                    String::from_utf8_lossy(seq.raw_params()),
                    other as char
                );
            }
        }
    }

    /// SGR - Select Graphic Rendition.
    ///
    /// Parameters are consumed as a queue because `38`/`48` pull their color
    /// components from the parameters that follow them.
    fn execute_sgr(&mut self, seq: &CsiSequence) {
        let params = seq.params();
        if params.is_empty() {
            self.current_attrs.reset();
            return;
        }

        let attrs = &mut self.current_attrs;
        let mut queue = params.into_iter();

        while let Some(param) = queue.next() {
            // Empty entries are skipped
            let Some(code) = param else { continue };

            match code {
                0 => attrs.reset(),
                1 => attrs.weight = FontWeight::Bold,
                2 => attrs.weight = FontWeight::Light,
                3 => attrs.flags |= AttrFlags::ITALIC,
                4 => attrs.flags |= AttrFlags::UNDERLINE,
                9 => attrs.flags |= AttrFlags::STRIKETHROUGH,

                22 => attrs.weight = FontWeight::Normal,
                23 => attrs.flags &= !AttrFlags::ITALIC,
                24 => attrs.flags &= !AttrFlags::UNDERLINE,
                29 => attrs.flags &= !AttrFlags::STRIKETHROUGH,

                30..=37 => attrs.fg = Rgb::from_ansi(code - 30),
                38 => {
                    if let Some(color) = extended_color(&mut queue) {
                        attrs.fg = color;
                    }
                }
                39 => attrs.fg = Rgb::DEFAULT_FG,

                40..=47 => attrs.bg = Rgb::from_ansi(code - 40),
                48 => {
                    if let Some(color) = extended_color(&mut queue) {
                        attrs.bg = color;
                    }
                }
                49 => attrs.bg = Rgb::DEFAULT_BG,

                90..=97 => attrs.fg = Rgb::from_ansi(code - 90 + 8),
                100..=107 => attrs.bg = Rgb::from_ansi(code - 100 + 8),

                _ => debug!("Ignoring SGR code {}", code),
            }
        }
    }
}

/// Read the tail of a `38`/`48` code: `2;r;g;b` or `5;n`.
///
/// Returns `None` (attribute unchanged) when the tail is missing or malformed.
fn extended_color(queue: &mut impl Iterator<Item = Option<u32>>) -> Option<Rgb> {
    match queue.next().flatten()? {
        2 => {
            let r = queue.next().flatten()?;
            let g = queue.next().flatten()?;
            let b = queue.next().flatten()?;
            Some(Rgb::new(clamp_u8(r), clamp_u8(g), clamp_u8(b)))
        }
        5 => Some(Rgb::from_xterm256(queue.next().flatten()?)),
        _ => None,
    }
}

/// Repeat count for cursor movement; 0 and absent both mean 1.
///
/// VT100 treats an explicit 0 like a missing parameter, so `CSI 0 A` still moves one row.
fn count(seq: &CsiSequence) -> i32 {
    i32::try_from(seq.param(0, 1).max(1)).unwrap_or(i32::MAX)
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn clamp_u8(value: u32) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}
