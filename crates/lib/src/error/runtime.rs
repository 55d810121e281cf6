use std::time::Duration;

use miette::Diagnostic;
use regen_events::AbortReason;
use thiserror::Error;

/// Errors which _may_ be recoverable, transient, or only affect a part of the
/// operation, and should be reported to the user and/or acted upon
/// programatically, but will not outright stop the engine.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
#[diagnostic(url(docsrs))]
pub enum RuntimeError {
	/// For custom runtime errors.
	///
	/// This should be used for errors by generator bodies which are not
	/// covered by the other error types; engine-internal errors should never
	/// use this.
	#[error("external(runtime): {0}")]
	#[diagnostic(code(regen::runtime::external))]
	External(#[from] Box<dyn std::error::Error + Send + Sync>),

	/// Generic I/O error, with some context.
	#[error("io({about}): {err}")]
	#[diagnostic(code(regen::runtime::io_error))]
	IoError {
		/// What it was about.
		about: &'static str,

		/// The I/O error which occurred.
		#[source]
		err: std::io::Error,
	},

	/// Error received when compiling a glob pattern fails.
	#[error("glob({pattern}): {err}")]
	#[diagnostic(code(regen::runtime::glob))]
	Glob {
		/// The pattern that failed to compile.
		pattern: String,

		/// The underlying error.
		#[source]
		err: globset::Error,
	},

	/// Events from a filesystem watcher.
	#[error("fs watcher error")]
	#[diagnostic(code(regen::runtime::fs_watcher))]
	FsWatcher {
		/// The underlying error.
		#[source]
		err: super::FsWatcherError,
	},

	/// The run's cancellation token fired.
	///
	/// This is a control signal, not a failure: the engine swallows it when a
	/// body returns it, and never reports it as an `error` event.
	#[error("aborted: {reason}")]
	#[diagnostic(code(regen::runtime::aborted))]
	Aborted {
		/// Why the token fired.
		reason: AbortReason,
	},

	/// Error received when waiting for a run start times out.
	#[error("no run started within {timeout:?}")]
	#[diagnostic(code(regen::runtime::wait_timeout))]
	WaitTimeout {
		/// How long was waited.
		timeout: Duration,
	},
}

impl RuntimeError {
	/// Shorthand for the [`IoError`](RuntimeError::IoError) variant.
	#[must_use]
	pub fn io(about: &'static str, err: std::io::Error) -> Self {
		Self::IoError { about, err }
	}

	/// Whether this error is an abort control signal.
	#[must_use]
	pub const fn is_abort(&self) -> bool {
		matches!(self, Self::Aborted { .. })
	}
}
