//! Terminal rendering for interactive sessions.

pub mod icons;
pub mod terminal;

pub use terminal::TerminalConsole;
