//! Terminal renderer using crossterm
//!
//! Paints a [`TerminalGrid`] onto the host console. The renderer only reads
//! the grid; it never changes its contents.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::core::term::{AttrFlags, CellAttrs, TerminalGrid};

/// Terminal renderer
pub struct Renderer {
    /// Whether the terminal has been initialized
    initialized: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self { initialized: false }
    }

    /// Enter raw mode and the alternate screen
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.initialized = true;
        Ok(())
    }

    /// Restore the console. Does nothing if `init` was never called.
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();

        terminal::disable_raw_mode()
    }

    /// Draw every row of the grid and place the console cursor
    pub fn render(&mut self, grid: &TerminalGrid) -> io::Result<()> {
        let stdout = io::stdout();
        let mut stdout = io::BufWriter::with_capacity(65536, stdout.lock());

        self.render_to(&mut stdout, grid)?;
        stdout.flush()
    }

    /// Render into any writer
    pub fn render_to<W: Write>(&mut self, out: &mut W, grid: &TerminalGrid) -> io::Result<()> {
        queue!(out, Hide)?;

        let mut line = String::with_capacity(grid.cols() as usize);
        for (row_idx, row) in grid.buffer().iter().enumerate() {
            queue!(out, MoveTo(0, row_idx as u16))?;
            line.clear();

            // Batch runs of cells sharing the same attributes
            let mut run_attrs: Option<CellAttrs> = None;
            for cell in row.cells() {
                if run_attrs != Some(cell.attrs) {
                    if let Some(attrs) = run_attrs {
                        Self::apply_attrs(out, &attrs)?;
                        write!(out, "{}", line)?;
                        line.clear();
                    }
                    run_attrs = Some(cell.attrs);
                }
                line.push(cell.character());
            }
            if let Some(attrs) = run_attrs {
                Self::apply_attrs(out, &attrs)?;
                write!(out, "{}", line)?;
            }
        }

        let (col, row) = grid.cursor_position();
        queue!(
            out,
            ResetColor,
            SetAttribute(Attribute::Reset),
            MoveTo(col, row),
            Show
        )
    }

    /// Apply cell attributes
    fn apply_attrs<W: Write>(out: &mut W, attrs: &CellAttrs) -> io::Result<()> {
        queue!(out, SetAttribute(Attribute::Reset))?;

        if attrs.weight.is_bold() {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        if attrs.flags.contains(AttrFlags::ITALIC) {
            queue!(out, SetAttribute(Attribute::Italic))?;
        }
        if attrs.flags.contains(AttrFlags::UNDERLINE) {
            queue!(out, SetAttribute(Attribute::Underlined))?;
        }
        if attrs.flags.contains(AttrFlags::STRIKETHROUGH) {
            queue!(out, SetAttribute(Attribute::CrossedOut))?;
        }

        queue!(
            out,
            SetForegroundColor(attrs.fg.to_crossterm()),
            SetBackgroundColor(attrs.bg.to_crossterm())
        )
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_to_buffer() {
        let mut grid = TerminalGrid::new(10, 2);
        grid.append_output(b"ab\x1b[31mcd");

        let mut renderer = Renderer::new();
        let mut out = Vec::new();
        renderer.render_to(&mut out, &grid).unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("ab"));
        assert!(text.contains("cd"));
        // Foreground for the red run
        assert!(text.contains("38;2;128;0;0"));
        // Cursor left after "abcd": column 4, row 0, in 1-based CUP form
        assert!(text.contains("\x1b[1;5H"));
    }

    #[test]
    fn test_cleanup_without_init() {
        let mut renderer = Renderer::new();
        assert!(renderer.cleanup().is_ok());
    }
}
