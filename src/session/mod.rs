//! The session state machine.
//!
//! A session moves between `Stopped`, `Running` and `Paused` only through
//! start, pause, resume and stop. The engine's own phase is tracked alongside
//! but never driven from here.

mod controller;
mod state;
mod stopwatch;

mod test;

pub use controller::SessionController;
pub use state::{RunKind, SessionState, SharedState, TaskState};
pub use stopwatch::Stopwatch;
