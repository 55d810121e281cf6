use miette::Diagnostic;
use thiserror::Error;
use tokio::task::JoinError;

/// Errors which are not recoverable and stop (or prevent) engine execution.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
#[diagnostic(url(docsrs))]
pub enum CriticalError {
	/// For custom critical errors.
	///
	/// This should be used for errors by external code which are not covered
	/// by the other error types; engine-internal errors should never use this.
	#[error("external(critical): {0}")]
	#[diagnostic(code(regen::critical::external))]
	External(#[from] Box<dyn std::error::Error + Send + Sync>),

	/// A critical I/O error occurred.
	#[error("io({about}): {err}")]
	#[diagnostic(code(regen::critical::io_error))]
	IoError {
		/// What it was about.
		about: &'static str,

		/// The I/O error which occurred.
		#[source]
		err: std::io::Error,
	},

	/// Error received when a filesystem watcher fails to instantiate.
	#[error("fs watcher init")]
	#[diagnostic(code(regen::critical::fs_watcher_init))]
	FsWatcherInit {
		/// The underlying error.
		#[source]
		err: super::FsWatcherError,
	},

	/// Error received when using an engine after [`destroy`](crate::Regen::destroy).
	#[error("engine has been destroyed")]
	#[diagnostic(code(regen::critical::destroyed))]
	Destroyed,

	/// Error received when an initial watch pattern starts with `!`.
	///
	/// Negative patterns only make sense next to the positives they carve
	/// out of; a watch list of nothing but holes is a configuration bug.
	#[error("initial watch pattern may not be negative: {pattern}")]
	#[diagnostic(code(regen::critical::negative_initial_watch))]
	NegativeInitialWatch {
		/// The offending pattern.
		pattern: String,
	},

	/// Error received when an initial watch pattern points outside the root.
	#[error("initial watch pattern outside root: {pattern}")]
	#[diagnostic(code(regen::critical::watch_outside_root))]
	WatchOutsideRoot {
		/// The offending pattern.
		pattern: String,
	},

	/// Error received when an initial watch pattern fails to compile.
	#[error("initial watch pattern: {0}")]
	#[diagnostic(code(regen::critical::initial_watch))]
	InitialWatch(#[source] super::RuntimeError),

	/// Error received when joining the main engine task.
	#[error("main task join: {0}")]
	#[diagnostic(code(regen::critical::main_task_join))]
	MainTaskJoin(#[source] JoinError),
}
