//! Configuration for [`Regen`](crate::Regen) engines.

use std::{path::PathBuf, time::Duration};

use tracing::debug;

use crate::watch::WatcherKind;

/// Whether, and what, an engine watches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum WatchMode {
	/// Run once; the facade performs no registration at all.
	#[default]
	Disabled,

	/// Watch whatever the generator observes through the facade.
	Enabled,

	/// As `Enabled`, plus an initial set of paths and globs watched before
	/// the first run (and re-registered after every hard reset).
	///
	/// Patterns must not start with `!`, and must resolve inside the engine
	/// root.
	Paths(Vec<String>),
}

impl WatchMode {
	/// Whether any watching happens at all.
	#[must_use]
	pub const fn is_enabled(&self) -> bool {
		!matches!(self, Self::Disabled)
	}
}

/// Configuration for an engine, consumed at construction.
///
/// Every setter logs the new value with `debug!`, which gives a quick insight
/// into what an application configures.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
	/// Absolute root used for path resolution.
	///
	/// Defaults to the process working directory; a relative root is resolved
	/// against it at engine construction. Trailing separators are stripped.
	pub root: PathBuf,

	/// The engine's name, tagged onto every event it emits.
	pub name: String,

	/// Watch behaviour.
	pub watch: WatchMode,

	/// The kind of filesystem watcher to be used.
	pub file_watcher: WatcherKind,

	/// The buffer size of the channel which carries filesystem events.
	///
	/// The default (4096) is usually fine. If you expect a much larger
	/// throughput of events, adjusting this value may help.
	///
	/// This is unchangeable at runtime and must be set before engine
	/// instantiation.
	pub event_channel_size: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			root: PathBuf::from("."),
			name: "generator".into(),
			watch: WatchMode::default(),
			file_watcher: WatcherKind::default(),
			event_channel_size: 4096,
		}
	}
}

impl Config {
	/// Start from a root directory.
	#[must_use]
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			..Default::default()
		}
	}

	/// Set the engine name.
	#[must_use]
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		debug!(name=%self.name, "Config: name");
		self
	}

	/// Enable watch mode.
	#[must_use]
	pub fn watch(mut self, watch: bool) -> Self {
		self.watch = if watch {
			WatchMode::Enabled
		} else {
			WatchMode::Disabled
		};
		debug!(watch=?self.watch, "Config: watch");
		self
	}

	/// Enable watch mode with an initial set of paths and globs.
	#[must_use]
	pub fn watch_paths(
		mut self,
		paths: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		self.watch = WatchMode::Paths(paths.into_iter().map(Into::into).collect());
		debug!(watch=?self.watch, "Config: watch paths");
		self
	}

	/// Set the file watcher type to use.
	#[must_use]
	pub fn file_watcher(mut self, watcher: WatcherKind) -> Self {
		self.file_watcher = watcher;
		debug!(watcher=?self.file_watcher, "Config: file watcher");
		self
	}

	/// Use the poll watcher with an interval.
	#[must_use]
	pub fn poll_watcher(self, interval: Duration) -> Self {
		self.file_watcher(WatcherKind::Poll(interval))
	}

	/// Set the event channel size.
	#[must_use]
	pub fn event_channel_size(mut self, size: usize) -> Self {
		self.event_channel_size = size;
		debug!(size=%self.event_channel_size, "Config: event channel size");
		self
	}
}
