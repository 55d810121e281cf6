//! Event types for Regen, a reactive filesystem access engine.
//!
//! Regen runs a user-supplied generator body against a filesystem, records every
//! dependency the body observes, and reruns the body when a dependency changes.
//! This crate holds the types which cross the engine boundary: the normalised
//! filesystem [`Change`]s delivered to a rerun, the typed lifecycle [`Event`]s
//! published on the engine's event bus, and the small [`RunStatus`] and
//! [`AbortReason`] enums the run lifecycle is built from.
//!
//! It is kept separate from the engine crate so consumers (reporters, test
//! harnesses, composition layers) can speak the event language without pulling
//! in the watcher machinery.

#![warn(clippy::unwrap_used, missing_docs)]
#![deny(rust_2018_idioms)]

mod change;
mod event;

pub use change::{Change, ChangeKind};
pub use event::{AbortReason, Event, RunStatus};
