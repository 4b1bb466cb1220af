//! Root of the `ragchat-core` library: the reply stream consumer, the Git
//! sync poller, and the session controller that coordinates them.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the caller (e.g. the CLI) or the
// tracing stack.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod active_cell;
pub mod config;
pub mod error;
mod session;
mod session_event;
pub mod stream;
pub mod sync_poller;

pub use active_cell::ActiveCell;
pub use active_cell::ActiveReader;
pub use session::SendPhase;
pub use session::SessionController;
pub use session_event::Mutation;
pub use session_event::PollId;
pub use session_event::SendId;
pub use session_event::SessionEvent;
pub use session_event::SessionNotice;
pub use session_event::StreamId;
