//! Core terminal emulation components.
//!
//! - **pump**: child process with piped I/O and a background output reader
//! - **term**: cell grid and escape sequence parser
//! - **session**: pump + grid, with output handed over through a bounded channel
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── ProcessPump (child process, reader thread)
//! │     └── sink ──sync_channel──┐
//! └── TerminalGrid  <────────────┘ process_output()
//!     ├── Row / Cell (characters + attributes)
//!     ├── Cursor
//!     └── VtParser (escape sequences)
//! ```

pub mod pump;
pub mod session;
pub mod term;
