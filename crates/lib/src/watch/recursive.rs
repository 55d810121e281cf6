//! The recursive watcher: OS subscriptions for matcher bases and raw files.
//!
//! One notify watcher instance, with a reference-counted set of watch roots.
//! Matcher bases are watched recursively; individual files are covered by a
//! non-recursive watch on their parent directory, which keeps unlink/recreate
//! cycles visible. The notify callback filters events against the shared
//! registry state before anything crosses into the engine loop.

use std::{
	collections::HashMap,
	fs::metadata,
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use notify::RecursiveMode;
use regen_events::ChangeKind;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{normalise_event, registry::WatchState, WatcherKind, WatcherMessage};
use crate::error::{CriticalError, FsWatcherError, RuntimeError};

#[derive(Debug, Default)]
struct Root {
	recursive: usize,
	shallow: usize,
}

impl Root {
	const fn mode(&self) -> RecursiveMode {
		if self.recursive > 0 {
			RecursiveMode::Recursive
		} else {
			RecursiveMode::NonRecursive
		}
	}

	const fn is_empty(&self) -> bool {
		self.recursive == 0 && self.shallow == 0
	}
}

struct Inner {
	watcher: Option<Box<dyn notify::Watcher + Send>>,
	roots: HashMap<PathBuf, Root>,
}

pub(crate) struct RecursiveWatcher {
	kind: WatcherKind,
	state: Arc<Mutex<WatchState>>,
	events: mpsc::Sender<WatcherMessage>,
	inner: Mutex<Inner>,
}

/// The source-side event filter.
///
/// A path passes iff the registry knows it: explicitly watched, a missing
/// target, a fallback ancestor, or matched by an active pattern. On top of
/// that, the interest flags fold out `add` events for empty new files and
/// `change` events nothing asked for.
fn accepts(state: &WatchState, kind: ChangeKind, path: &Path) -> bool {
	let watched = state.watched_files.contains(path);

	if !watched
		&& !state.missing_paths.contains(path)
		&& !state.fallback_paths.contains_key(path)
		&& !state.patterns.matches(path)
	{
		return false;
	}

	if !watched && kind == ChangeKind::Add {
		let mut applicable = state.patterns.applicable(path).peekable();
		if applicable.peek().is_some()
			&& applicable.all(|m| m.options().ignore_empty_new_files)
			&& metadata(path).map_or(false, |m| m.len() == 0)
		{
			trace!(?path, "suppressing add for empty new file");
			return false;
		}
	}

	if !watched && kind == ChangeKind::Change {
		let accepted = state
			.patterns
			.applicable(path)
			.any(|m| m.options().accept_change_events);
		if !accepted {
			trace!(?path, "suppressing change event nothing asked for");
			return false;
		}
	}

	true
}

fn make_handler(
	state: Arc<Mutex<WatchState>>,
	events: mpsc::Sender<WatcherMessage>,
) -> impl Fn(Result<notify::Event, notify::Error>) + Send + 'static {
	move |nev| match nev {
		Err(err) => {
			events
				.try_send(WatcherMessage::Error(RuntimeError::FsWatcher {
					err: FsWatcherError::Event(err),
				}))
				.ok();
		}
		Ok(nev) => {
			trace!(event = ?nev, "receiving possible event from watcher");
			for (kind, path) in normalise_event(nev) {
				let deliver = {
					let state = state.lock().expect("watch state lock poisoned");
					accepts(&state, kind, &path)
				};

				if deliver
					&& events
						.try_send(WatcherMessage::Change { kind, path })
						.is_err()
				{
					trace!("event channel full or closed, dropping filesystem event");
				}
			}
		}
	}
}

impl RecursiveWatcher {
	pub fn new(
		kind: WatcherKind,
		state: Arc<Mutex<WatchState>>,
		events: mpsc::Sender<WatcherMessage>,
	) -> Result<Self, CriticalError> {
		debug!(?kind, "creating recursive watcher");
		let watcher = kind.create(make_handler(state.clone(), events.clone()))?;

		Ok(Self {
			kind,
			state,
			events,
			inner: Mutex::new(Inner {
				watcher: Some(watcher),
				roots: HashMap::new(),
			}),
		})
	}

	fn add_root(&self, path: &Path, recursive: bool) -> Result<(), RuntimeError> {
		let mut inner = self.inner.lock().expect("watcher lock poisoned");
		let root = inner.roots.entry(path.to_path_buf()).or_default();
		let was = if root.is_empty() { None } else { Some(root.mode()) };

		if recursive {
			root.recursive += 1;
		} else {
			root.shallow += 1;
		}
		let mode = root.mode();

		if was == Some(mode) {
			return Ok(());
		}

		let Some(watcher) = inner.watcher.as_mut() else {
			return Ok(());
		};

		if was.is_some() {
			// upgrading from shallow to recursive; the watch below replaces
			// the subscription even if this fails
			if let Err(err) = watcher.unwatch(path) {
				trace!(?err, ?path, "notify unwatch() error before re-watch");
			}
		}

		trace!(?path, ?mode, "adding path to the watcher");
		watcher.watch(path, mode).map_err(|err| RuntimeError::FsWatcher {
			err: FsWatcherError::PathAdd {
				path: path.to_path_buf(),
				err,
			},
		})
	}

	fn remove_root(&self, path: &Path, recursive: bool) -> Result<(), RuntimeError> {
		let mut inner = self.inner.lock().expect("watcher lock poisoned");
		let Some(root) = inner.roots.get_mut(path) else {
			return Ok(());
		};
		let was = root.mode();

		if recursive {
			root.recursive = root.recursive.saturating_sub(1);
		} else {
			root.shallow = root.shallow.saturating_sub(1);
		}

		if root.is_empty() {
			inner.roots.remove(path);
			let Some(watcher) = inner.watcher.as_mut() else {
				return Ok(());
			};

			trace!(?path, "removing path from the watcher");
			return watcher
				.unwatch(path)
				.map_err(|err| RuntimeError::FsWatcher {
					err: FsWatcherError::PathRemove {
						path: path.to_path_buf(),
						err,
					},
				});
		}

		let mode = root.mode();
		if mode != was {
			// last recursive registrant gone, downgrade; the re-watch is
			// attempted even when the unwatch fails, as it replaces the
			// subscription either way
			if let Some(watcher) = inner.watcher.as_mut() {
				let removed = watcher.unwatch(path);
				let added = watcher.watch(path, mode);

				if let Err(err) = removed {
					return Err(RuntimeError::FsWatcher {
						err: FsWatcherError::PathRemove {
							path: path.to_path_buf(),
							err,
						},
					});
				}

				added.map_err(|err| RuntimeError::FsWatcher {
					err: FsWatcherError::PathAdd {
						path: path.to_path_buf(),
						err,
					},
				})?;
			}
		}

		Ok(())
	}

	/// Watch a directory tree (a matcher base).
	pub fn watch_recursive(&self, path: &Path) -> Result<(), RuntimeError> {
		self.add_root(path, true)
	}

	/// Watch a single directory level (a file's parent, or a fallback
	/// ancestor).
	pub fn watch_shallow(&self, path: &Path) -> Result<(), RuntimeError> {
		self.add_root(path, false)
	}

	/// Release a recursive registration.
	pub fn unwatch_recursive(&self, path: &Path) -> Result<(), RuntimeError> {
		self.remove_root(path, true)
	}

	/// Release a shallow registration.
	pub fn unwatch_shallow(&self, path: &Path) -> Result<(), RuntimeError> {
		self.remove_root(path, false)
	}

	/// Drop every subscription and start over with a fresh notify instance.
	pub fn recreate(&self) -> Result<(), CriticalError> {
		debug!("recreating recursive watcher");
		let mut inner = self.inner.lock().expect("watcher lock poisoned");
		inner.watcher = None;
		inner.roots.clear();
		inner.watcher = Some(
			self.kind
				.create(make_handler(self.state.clone(), self.events.clone()))?,
		);
		Ok(())
	}

	/// Drop every subscription for good.
	pub fn close(&self) {
		debug!("closing recursive watcher");
		let mut inner = self.inner.lock().expect("watcher lock poisoned");
		inner.watcher = None;
		inner.roots.clear();
	}
}

impl std::fmt::Debug for RecursiveWatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RecursiveWatcher")
			.field("kind", &self.kind)
			.finish_non_exhaustive()
	}
}
