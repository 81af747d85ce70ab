//! Pseudo-terminal bridge

mod terminal;

pub use terminal::{ResizeOutcome, Terminal, DEFAULT_TERMINAL_SIZE};
