use std::{error::Error as StdError, fmt, path::PathBuf, sync::Arc};

use crate::ChangeKind;

/// Where a run is in its lifecycle.
///
/// Exactly one generator body may execute per engine at a time; this status
/// tracks the gap between "a run is scheduled" and "the body is on the stack".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RunStatus {
	/// A run is scheduled but the body is not executing yet.
	#[default]
	Pending,

	/// The body is executing.
	Running,

	/// The last body resolved or errored, and nothing is scheduled.
	Finished,
}

impl fmt::Display for RunStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}",
			match self {
				Self::Pending => "pending",
				Self::Running => "running",
				Self::Finished => "finished",
			}
		)
	}
}

/// Why a run's cancellation token was aborted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum AbortReason {
	/// A watched dependency changed and a rerun is scheduled.
	Watch,

	/// An explicit rerun was requested.
	Rerun,

	/// The engine is being destroyed.
	Destroy,
}

impl fmt::Display for AbortReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}",
			match self {
				Self::Watch => "watch",
				Self::Rerun => "rerun",
				Self::Destroy => "destroy",
			}
		)
	}
}

/// A typed lifecycle event, as published on the engine's event bus.
///
/// Every event carries the `name` of the engine which emitted it, which is what
/// keeps a shared bus across composed engines legible. `T` is the result type
/// of the generator body.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event<T> {
	/// A run has started (the body is about to execute).
	Start {
		/// Name of the emitting engine.
		name: String,
	},

	/// A relevant filesystem event was observed.
	Watch {
		/// The normalised event kind; directory variants are preserved here.
		kind: ChangeKind,

		/// Absolute path the event is about.
		path: PathBuf,

		/// Name of the emitting engine.
		name: String,
	},

	/// The generator wrote a file (and the bytes actually changed).
	Write {
		/// Absolute path of the written file.
		path: PathBuf,

		/// Name of the emitting engine.
		name: String,
	},

	/// The body resolved successfully.
	Finish {
		/// The body's result.
		result: T,

		/// Name of the emitting engine.
		name: String,
	},

	/// The body errored (aborts are not errors and are never reported here).
	Error {
		/// The error, shared because it also settles the run's result.
		error: Arc<dyn StdError + Send + Sync>,

		/// Name of the emitting engine.
		name: String,
	},

	/// The current run's cancellation token was aborted.
	Abort {
		/// Why the token fired.
		reason: AbortReason,

		/// Name of the emitting engine.
		name: String,
	},

	/// The engine was destroyed and is terminal.
	Destroy {
		/// Name of the emitting engine.
		name: String,
	},

	/// A custom event emitted by the generator body.
	Custom {
		/// Generator-chosen payload.
		event: String,

		/// Name of the emitting engine.
		name: String,
	},
}

impl<T> Event<T> {
	/// The name of the engine which emitted this event.
	#[must_use]
	pub fn name(&self) -> &str {
		match self {
			Self::Start { name }
			| Self::Watch { name, .. }
			| Self::Write { name, .. }
			| Self::Finish { name, .. }
			| Self::Error { name, .. }
			| Self::Abort { name, .. }
			| Self::Destroy { name }
			| Self::Custom { name, .. } => name,
		}
	}

	/// The name of the variant.
	#[must_use]
	pub const fn discriminant_name(&self) -> &'static str {
		match self {
			Self::Start { .. } => "Start",
			Self::Watch { .. } => "Watch",
			Self::Write { .. } => "Write",
			Self::Finish { .. } => "Finish",
			Self::Error { .. } => "Error",
			Self::Abort { .. } => "Abort",
			Self::Destroy { .. } => "Destroy",
			Self::Custom { .. } => "Custom",
		}
	}
}

impl<T> fmt::Display for Event<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Event({}", self.name())?;
		match self {
			Self::Start { .. } => write!(f, " start")?,
			Self::Watch { kind, path, .. } => write!(f, " {kind} {}", path.display())?,
			Self::Write { path, .. } => write!(f, " write {}", path.display())?,
			Self::Finish { .. } => write!(f, " finish")?,
			Self::Error { error, .. } => write!(f, " error {error}")?,
			Self::Abort { reason, .. } => write!(f, " abort {reason}")?,
			Self::Destroy { .. } => write!(f, " destroy")?,
			Self::Custom { event, .. } => write!(f, " custom {event}")?,
		}
		write!(f, ")")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn event_display_carries_name_and_kind() {
		let ev: Event<()> = Event::Watch {
			kind: ChangeKind::Unlink,
			path: PathBuf::from("/tmp/x"),
			name: "gen".into(),
		};
		assert_eq!(ev.to_string(), "Event(gen unlink /tmp/x)");
		assert_eq!(ev.discriminant_name(), "Watch");
	}

}
