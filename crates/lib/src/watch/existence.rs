//! The existence watcher: a shallow watcher dedicated to existence probes.
//!
//! Paths used only through the `exists*` APIs don't need content events or
//! recursion: a non-recursive subscription on each probed path's parent is
//! enough to see it appear and disappear. `change` events are suppressed
//! entirely, and paths which are also properly watched are dropped here so the
//! engine never sees the same event twice.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use notify::RecursiveMode;
use regen_events::ChangeKind;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{normalise_event, registry::WatchState, WatcherKind, WatcherMessage};
use crate::error::{CriticalError, FsWatcherError, RuntimeError};

struct Inner {
	watcher: Option<Box<dyn notify::Watcher + Send>>,
	roots: HashMap<PathBuf, usize>,
}

pub(crate) struct ExistenceWatcher {
	kind: WatcherKind,
	state: Arc<Mutex<WatchState>>,
	events: mpsc::Sender<WatcherMessage>,
	inner: Mutex<Inner>,
}

/// An event is relevant iff the path is registered in the matching existence
/// set and is not also a watched file (which the recursive watcher covers).
fn accepts(state: &WatchState, kind: ChangeKind, path: &Path) -> bool {
	if state.watched_files.contains(path) {
		return false;
	}

	if state.existence_paths.contains(path) {
		return true;
	}

	if kind.is_dir() {
		state.dir_existence_paths.contains(path)
	} else {
		state.file_existence_paths.contains(path)
	}
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
			for (kind, path) in normalise_event(nev) {
				if kind == ChangeKind::Change {
					continue;
				}

				let deliver = {
					let state = state.lock().expect("watch state lock poisoned");
					accepts(&state, kind, &path)
				};

				if deliver
					&& events
						.try_send(WatcherMessage::Change { kind, path })
						.is_err()
				{
					trace!("event channel full or closed, dropping existence event");
				}
			}
		}
	}
}

impl ExistenceWatcher {
	pub fn new(
		kind: WatcherKind,
		state: Arc<Mutex<WatchState>>,
		events: mpsc::Sender<WatcherMessage>,
	) -> Result<Self, CriticalError> {
		debug!(?kind, "creating existence watcher");
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

	/// Hold a shallow subscription on a probed path's parent.
	pub fn watch_parent(&self, parent: &Path) -> Result<(), RuntimeError> {
		let mut inner = self.inner.lock().expect("watcher lock poisoned");
		let count = inner.roots.entry(parent.to_path_buf()).or_insert(0);
		*count += 1;
		if *count > 1 {
			return Ok(());
		}

		let Some(watcher) = inner.watcher.as_mut() else {
			return Ok(());
		};

		trace!(?parent, "adding probe parent to the existence watcher");
		watcher
			.watch(parent, RecursiveMode::NonRecursive)
			.map_err(|err| RuntimeError::FsWatcher {
				err: FsWatcherError::PathAdd {
					path: parent.to_path_buf(),
					err,
				},
			})
	}

	/// Release a shallow subscription on a probed path's parent.
	pub fn unwatch_parent(&self, parent: &Path) -> Result<(), RuntimeError> {
		let mut inner = self.inner.lock().expect("watcher lock poisoned");
		let Some(count) = inner.roots.get_mut(parent) else {
			return Ok(());
		};

		*count = count.saturating_sub(1);
		if *count > 0 {
			return Ok(());
		}

		inner.roots.remove(parent);
		let Some(watcher) = inner.watcher.as_mut() else {
			return Ok(());
		};

		trace!(?parent, "removing probe parent from the existence watcher");
		watcher
			.unwatch(parent)
			.map_err(|err| RuntimeError::FsWatcher {
				err: FsWatcherError::PathRemove {
					path: parent.to_path_buf(),
					err,
				},
			})
	}

	/// Drop every subscription and start over with a fresh notify instance.
	pub fn recreate(&self) -> Result<(), CriticalError> {
		debug!("recreating existence watcher");
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
		debug!("closing existence watcher");
		let mut inner = self.inner.lock().expect("watcher lock poisoned");
		inner.watcher = None;
		inner.roots.clear();
	}
}

impl std::fmt::Debug for ExistenceWatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExistenceWatcher")
			.field("kind", &self.kind)
			.finish_non_exhaustive()
	}
}
