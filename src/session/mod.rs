//! Interactive session: the state machine and its collaborators.
//!
//! A [`Session`] exclusively owns its [`LogWriter`](crate::log::LogWriter) and
//! the live turn history. It talks to the model through
//! [`LlmProvider`](crate::provider::LlmProvider), to tools through
//! [`ToolExecutor`](crate::tools::ToolExecutor) and to the user through
//! [`Console`].

pub mod console;
pub mod interrupt;
pub mod machine;

pub use console::{Console, SessionEvent};
pub use interrupt::Interrupt;
pub use machine::{
    DECLINED_OUTPUT, ROUND_LIMIT_ERROR, Session, SessionOptions, SessionParts, SessionState,
};
