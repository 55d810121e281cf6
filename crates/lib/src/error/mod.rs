//! Error types.
//!
//! Regen splits errors in two, the same way watch-driven tools generally must:
//! [`RuntimeError`]s are recoverable and reported (on the event bus, and by
//! rejecting the affected run) without stopping the engine;
//! [`CriticalError`]s terminate it.

mod critical;
mod runtime;
mod specialised;

pub use critical::CriticalError;
pub use runtime::RuntimeError;
pub use specialised::FsWatcherError;
