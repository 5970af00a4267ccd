//! User interface rendering and input handling.
//!
//! - **renderer**: crossterm renderer for a single grid
//! - **keymapper**: keyboard input to child byte sequence mapping, plus local echo

pub mod keymapper;
pub mod renderer;

pub use keymapper::{KeyMapper, Modifiers};
pub use renderer::Renderer;
