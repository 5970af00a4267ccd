//! mikoterm - terminal emulation core
//!
//! Runs a child process on plain pipes and renders its output through a
//! VT100-subset escape sequence parser into a grid of attributed cells.
//!
//! - [`core::pump`]: child process and background output reader
//! - [`core::term`]: cell grid and escape sequence parser
//! - [`core::session`]: pump and grid joined by a bounded channel
//! - [`config`]: `~/.mikoterm/config.toml`
//! - [`ui`]: key encoding and a crossterm renderer

pub mod config;
pub mod core;
pub mod ui;

pub use crate::core::pump::{ProcessPump, PumpError, PumpOptions};
pub use crate::core::session::Session;
pub use crate::core::term::TerminalGrid;
