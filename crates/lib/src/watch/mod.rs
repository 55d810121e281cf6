//! Filesystem watching: event normalisation, the recursive and existence
//! watchers, and the watch registry that drives them.

use std::{fs::metadata, path::PathBuf, time::Duration};

use normalize_path::NormalizePath;
use regen_events::ChangeKind;
use tracing::trace;

use crate::error::{CriticalError, FsWatcherError, RuntimeError};

mod existence;
mod recursive;
mod registry;

pub(crate) use existence::ExistenceWatcher;
pub(crate) use recursive::RecursiveWatcher;
pub(crate) use registry::{AddFileOptions, ExistenceKind, WatchRegistry};

/// What kind of filesystem watcher to use.
///
/// For now only native and poll watchers are supported. In the future there
/// may be additional watchers available on some platforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum WatcherKind {
	/// The Notify-recommended watcher on the platform.
	///
	/// For platforms Notify supports, that's a [native implementation][notify::RecommendedWatcher],
	/// for others it's polling with a default interval.
	#[default]
	Native,

	/// Notify's [poll watcher][notify::PollWatcher] with a custom interval.
	Poll(Duration),
}

impl WatcherKind {
	pub(crate) fn create(
		self,
		f: impl notify::EventHandler,
	) -> Result<Box<dyn notify::Watcher + Send>, CriticalError> {
		use notify::{Config, Watcher as _};

		match self {
			Self::Native => {
				notify::RecommendedWatcher::new(f, Config::default()).map(|w| Box::new(w) as _)
			}
			Self::Poll(delay) => {
				notify::PollWatcher::new(f, Config::default().with_poll_interval(delay))
					.map(|w| Box::new(w) as _)
			}
		}
		.map_err(|err| CriticalError::FsWatcherInit {
			err: if cfg!(target_os = "linux")
				&& (matches!(err.kind, notify::ErrorKind::MaxFilesWatch)
					|| matches!(err.kind, notify::ErrorKind::Io(ref ioerr) if ioerr.raw_os_error() == Some(28)))
			{
				FsWatcherError::TooManyWatches(err)
			} else if cfg!(target_os = "linux")
				&& matches!(err.kind, notify::ErrorKind::Io(ref ioerr) if ioerr.raw_os_error() == Some(24))
			{
				FsWatcherError::TooManyHandles(err)
			} else {
				FsWatcherError::Create(err)
			},
		})
	}
}

/// What the watchers hand to the engine loop.
#[derive(Debug)]
pub(crate) enum WatcherMessage {
	/// A normalised event which passed the source filter.
	Change {
		kind: ChangeKind,
		path: PathBuf,
	},

	/// A watcher-side error, forwarded to the event bus.
	Error(RuntimeError),
}

fn existing_kind(path: &std::path::Path) -> ChangeKind {
	metadata(path).map_or(ChangeKind::Add, |m| {
		if m.is_dir() {
			ChangeKind::AddDir
		} else {
			ChangeKind::Add
		}
	})
}

/// Collapse a raw notify event into normalised `(kind, path)` pairs.
///
/// Paths are normalised; access events and anything without a usable path are
/// dropped here. Rename pairs split into an unlink and an add.
pub(crate) fn normalise_event(nev: notify::Event) -> Vec<(ChangeKind, PathBuf)> {
	use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};

	let paths: Vec<PathBuf> = nev.paths.iter().map(|p| p.normalize()).collect();
	let mut out = Vec::with_capacity(paths.len());

	match nev.kind {
		EventKind::Create(kind) => {
			for path in paths {
				let kind = match kind {
					CreateKind::Folder => ChangeKind::AddDir,
					CreateKind::File => ChangeKind::Add,
					_ => existing_kind(&path),
				};
				out.push((kind, path));
			}
		}

		EventKind::Remove(kind) => {
			for path in paths {
				let kind = match kind {
					RemoveKind::Folder => ChangeKind::UnlinkDir,
					_ => ChangeKind::Unlink,
				};
				out.push((kind, path));
			}
		}

		EventKind::Modify(ModifyKind::Name(mode)) => match (mode, paths.as_slice()) {
			(RenameMode::Both, [from, to]) => {
				out.push((ChangeKind::Unlink, from.clone()));
				out.push((existing_kind(to), to.clone()));
			}
			(RenameMode::From, _) => {
				out.extend(paths.into_iter().map(|p| (ChangeKind::Unlink, p)));
			}
			(RenameMode::To, _) => {
				for path in paths {
					out.push((existing_kind(&path), path));
				}
			}
			_ => {
				// unqualified rename: existence decides which side we saw
				for path in paths {
					let kind = if path.exists() {
						existing_kind(&path)
					} else {
						ChangeKind::Unlink
					};
					out.push((kind, path));
				}
			}
		},

		EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
			out.extend(paths.into_iter().map(|p| (ChangeKind::Change, p)));
		}

		EventKind::Access(_) => {
			trace!(?paths, "dropping access event");
		}
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind};

	fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
		let mut ev = notify::Event::new(kind);
		for p in paths {
			ev = ev.add_path(PathBuf::from(p));
		}
		ev
	}

	#[test]
	fn removes_map_to_unlink() {
		let out = normalise_event(event(
			EventKind::Remove(RemoveKind::Folder),
			&["/gone/dir"],
		));
		assert_eq!(out, vec![(ChangeKind::UnlinkDir, PathBuf::from("/gone/dir"))]);
	}

	#[test]
	fn data_modify_maps_to_change() {
		let out = normalise_event(event(
			EventKind::Modify(ModifyKind::Any),
			&["/some/file"],
		));
		assert_eq!(out, vec![(ChangeKind::Change, PathBuf::from("/some/file"))]);
	}

	#[test]
	fn access_is_dropped() {
		let out = normalise_event(event(
			EventKind::Access(notify::event::AccessKind::Any),
			&["/some/file"],
		));
		assert!(out.is_empty());
	}

	#[test]
	fn create_folder_maps_to_add_dir() {
		let out = normalise_event(event(
			EventKind::Create(CreateKind::Folder),
			&["/some/dir"],
		));
		assert_eq!(out, vec![(ChangeKind::AddDir, PathBuf::from("/some/dir"))]);
	}
}
