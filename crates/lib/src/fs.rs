//! The filesystem facade: every filesystem primitive the generator may use.
//!
//! Each call maps to two things: a watch-registration effect (so the engine
//! knows to rerun the generator when what it observed changes) and the
//! synchronous I/O itself. Pattern errors surface to the caller; watch
//! registration failures are reported as `error` events and never fail the
//! operation they ride on.

use std::{
	fs::Metadata,
	path::{Path, PathBuf},
	sync::Arc,
};

use regen_events::Event;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::{
	bus::EventBus,
	error::RuntimeError,
	paths::absolutise,
	pattern::{compile_patterns, Matcher, MatcherOptions},
	watch::{AddFileOptions, ExistenceKind, WatchRegistry},
};

/// Options for [`ContextFs::scan`].
#[derive(Clone, Debug)]
pub struct ScanOptions {
	/// Base directory for the patterns; defaults to the engine root.
	pub cwd: Option<PathBuf>,

	/// Register the patterns so matching paths are watched. On by default;
	/// turning it off makes the scan a pure one-shot enumeration.
	pub watch: bool,

	/// Don't rerun for new zero-byte files matched only by these patterns.
	pub ignore_empty_new_files: bool,

	/// Match dotfiles.
	pub dot: bool,

	/// Extra negative patterns.
	pub ignore: Vec<String>,

	/// Return absolute paths instead of cwd-relative ones.
	pub absolute: bool,

	/// Case-insensitive matching.
	pub case_insensitive: bool,
}

impl Default for ScanOptions {
	fn default() -> Self {
		Self {
			cwd: None,
			watch: true,
			ignore_empty_new_files: false,
			dot: false,
			ignore: Vec::new(),
			absolute: false,
			case_insensitive: false,
		}
	}
}

/// Where [`ContextFs::find_up`] stops ascending.
#[derive(Clone)]
pub enum StopAt {
	/// Stop once this directory has been visited.
	Path(PathBuf),

	/// Stop once a directory contains an entry matching any of these globs.
	Globs(Vec<String>),

	/// Stop once the predicate holds for a visited directory.
	Predicate(Arc<dyn Fn(&Path) -> bool + Send + Sync>),
}

impl std::fmt::Debug for StopAt {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
			Self::Globs(g) => f.debug_tuple("Globs").field(g).finish(),
			Self::Predicate(_) => f.write_str("Predicate(..)"),
		}
	}
}

/// Options for [`ContextFs::find_up`].
#[derive(Clone, Debug, Default)]
pub struct FindUpOptions {
	/// Directory to start from; defaults to the engine root.
	pub cwd: Option<PathBuf>,

	/// Return an absolute path instead of a root-relative one.
	pub absolute: bool,

	/// Where to stop ascending. The filesystem root always stops.
	pub stop: Option<StopAt>,
}

/// Options for [`ContextFs::list`].
#[derive(Clone, Debug)]
pub struct ListOptions {
	/// Return absolute paths instead of bare names.
	pub absolute: bool,

	/// Register the listing so membership changes are watched. On by default.
	pub watch: bool,

	/// Name glob to filter entries with; defaults to `*`.
	pub glob: Option<String>,

	/// Match dotfiles.
	pub dot: bool,

	/// Case-insensitive matching.
	pub case_insensitive: bool,
}

impl Default for ListOptions {
	fn default() -> Self {
		Self {
			absolute: false,
			watch: true,
			glob: None,
			dot: false,
			case_insensitive: false,
		}
	}
}

/// Options for [`ContextFs::read`] and friends.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
	/// Mark the file critical: any change to it hard-resets the engine.
	pub critical: bool,
}

/// Options for [`ContextFs::watch`].
#[derive(Clone, Debug, Default)]
pub struct WatchOptions {
	/// Cause files whose invalidation is reported instead of the watched
	/// paths' own.
	pub causes: Vec<PathBuf>,
}

/// The filesystem API surface exposed to generator bodies.
///
/// All I/O is synchronous from the generator's point of view. Paths may be
/// given relative (resolved against the engine root) or absolute.
pub struct ContextFs<T> {
	root: PathBuf,
	name: String,
	registry: Option<Arc<WatchRegistry>>,
	bus: EventBus<T>,
}

impl<T> Clone for ContextFs<T> {
	fn clone(&self) -> Self {
		Self {
			root: self.root.clone(),
			name: self.name.clone(),
			registry: self.registry.clone(),
			bus: self.bus.clone(),
		}
	}
}

impl<T> std::fmt::Debug for ContextFs<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ContextFs")
			.field("root", &self.root)
			.field("name", &self.name)
			.field("watching", &self.registry.is_some())
			.finish_non_exhaustive()
	}
}

impl<T: Clone> ContextFs<T> {
	pub(crate) fn new(
		root: PathBuf,
		name: String,
		registry: Option<Arc<WatchRegistry>>,
		bus: EventBus<T>,
	) -> Self {
		Self {
			root,
			name,
			registry,
			bus,
		}
	}

	fn abs(&self, path: impl AsRef<Path>) -> PathBuf {
		absolutise(&self.root, path)
	}

	/// Registration failures don't fail the I/O they ride on; they surface as
	/// `error` events instead.
	fn register(&self, register: impl FnOnce(&WatchRegistry) -> Result<(), RuntimeError>) {
		if let Some(registry) = &self.registry {
			if let Err(error) = register(registry) {
				self.bus.send(Event::Error {
					error: Arc::new(error),
					name: self.name.clone(),
				});
			}
		}
	}

	/// Enumerate files matching the given globs, and keep watching them.
	///
	/// Patterns may be negated with a leading `!`. Matches are files only,
	/// sorted, relative to `cwd` unless `absolute` is set.
	pub fn scan(
		&self,
		globs: impl IntoIterator<Item = impl AsRef<str>>,
		options: &ScanOptions,
	) -> Result<Vec<PathBuf>, RuntimeError> {
		let cwd = self.abs(options.cwd.as_deref().unwrap_or(&self.root));
		let matcher_options = MatcherOptions {
			dot: options.dot,
			case_insensitive: options.case_insensitive,
			ignore_empty_new_files: options.ignore_empty_new_files,
			accept_change_events: false,
		};
		let matchers = compile_patterns(globs, &options.ignore, &cwd, matcher_options)?;
		debug!(?cwd, patterns=%matchers.len(), watch=%options.watch, "scan");

		if options.watch {
			let registered = matchers.clone();
			self.register(move |reg| reg.add_matchers(registered));
		}

		let mut results = Vec::new();
		for matcher in &matchers {
			let base = matcher.base();
			if !base.exists() {
				continue;
			}

			for entry in WalkDir::new(base).follow_links(false) {
				let entry = entry.map_err(|err| RuntimeError::io("scanning", err.into()))?;
				if !entry.file_type().is_file() {
					continue;
				}
				if matcher.matches(entry.path()) {
					results.push(entry.path().to_path_buf());
				}
			}
		}

		results.sort();
		results.dedup();

		if !options.absolute {
			results = results
				.into_iter()
				.map(|p| p.strip_prefix(&cwd).map_or(p.clone(), Path::to_path_buf))
				.collect();
		}

		Ok(results)
	}

	fn read_dir_sorted(dir: &Path) -> Result<Vec<std::ffi::OsString>, std::io::Error> {
		let mut names: Vec<_> = std::fs::read_dir(dir)?
			.collect::<Result<Vec<_>, _>>()?
			.into_iter()
			.map(|e| e.file_name())
			.collect();
		names.sort();
		Ok(names)
	}

	/// Walk upward from `cwd` until an entry matches one of the globs.
	///
	/// Results are taken in directory-listing order; the first match (in the
	/// lowest directory) wins. The walk continues past a match up to the stop
	/// point or the filesystem root, registering the source and stop globs as
	/// listing patterns in every directory of the range, so additions
	/// anywhere along it rerun the generator. Returns a root-relative path
	/// unless `absolute` is set, and `None` when nothing matched.
	pub fn find_up(
		&self,
		globs: impl IntoIterator<Item = impl AsRef<str>>,
		options: &FindUpOptions,
	) -> Result<Option<PathBuf>, RuntimeError> {
		let globs: Vec<String> = globs
			.into_iter()
			.map(|g| g.as_ref().to_string())
			.collect();
		let stop_globs: Vec<String> = match &options.stop {
			Some(StopAt::Globs(globs)) => globs.clone(),
			_ => Vec::new(),
		};
		let stop_path = match &options.stop {
			Some(StopAt::Path(path)) => Some(self.abs(path)),
			_ => None,
		};

		let mut dir = self.abs(options.cwd.as_deref().unwrap_or(&self.root));
		debug!(?dir, ?globs, stop=?options.stop, "find_up");

		let mut found = None;
		loop {
			let mut source_matchers = Vec::with_capacity(globs.len());
			for glob in &globs {
				source_matchers.push(Matcher::compile_name(
					glob,
					&dir,
					MatcherOptions::default(),
				)?);
			}
			let mut stop_matchers = Vec::with_capacity(stop_globs.len());
			for glob in &stop_globs {
				stop_matchers.push(Matcher::compile_name(glob, &dir, MatcherOptions::default())?);
			}

			{
				let registered: Vec<Matcher> = source_matchers
					.iter()
					.chain(stop_matchers.iter())
					.cloned()
					.collect();
				self.register(move |reg| reg.add_matchers(registered));
			}

			let names = match Self::read_dir_sorted(&dir) {
				Ok(names) => names,
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
				Err(err) => return Err(RuntimeError::io("listing directory", err)),
			};

			if found.is_none() {
				for name in &names {
					let candidate = dir.join(name);
					if source_matchers.iter().any(|m| m.matches(&candidate)) {
						trace!(?candidate, "find_up matched");
						found = Some(candidate);
						break;
					}
				}
			}

			let stopped = stop_path.as_deref() == Some(dir.as_path())
				|| names.iter().any(|name| {
					let candidate = dir.join(name);
					stop_matchers.iter().any(|m| m.matches(&candidate))
				}) || matches!(&options.stop, Some(StopAt::Predicate(f)) if f(&dir));
			if stopped || !dir.pop() {
				trace!(?dir, found=?found, "find_up walk ended");
				break;
			}
		}

		Ok(found.map(|path| {
			if options.absolute {
				path
			} else {
				path.strip_prefix(&self.root)
					.map_or_else(|_| path.clone(), Path::to_path_buf)
			}
		}))
	}

	/// List a directory, filtered by a name glob (default `*`).
	///
	/// Entries come back sorted, as bare names unless `absolute` is set.
	pub fn list(
		&self,
		dir: impl AsRef<Path>,
		options: &ListOptions,
	) -> Result<Vec<PathBuf>, RuntimeError> {
		let dir = self.abs(dir);
		let glob = options.glob.as_deref().unwrap_or("*");
		let matcher = Matcher::compile_name(
			glob,
			&dir,
			MatcherOptions {
				dot: options.dot,
				case_insensitive: options.case_insensitive,
				..Default::default()
			},
		)?;
		debug!(?dir, %glob, watch=%options.watch, "list");

		if options.watch {
			let registered = matcher.clone();
			self.register(move |reg| reg.add_matchers(vec![registered]));
		}

		let names =
			Self::read_dir_sorted(&dir).map_err(|err| RuntimeError::io("listing directory", err))?;

		Ok(names
			.into_iter()
			.filter(|name| matcher.matches(&dir.join(name)))
			.map(|name| {
				if options.absolute {
					dir.join(name)
				} else {
					PathBuf::from(name)
				}
			})
			.collect())
	}

	fn track_file(&self, path: &Path, critical: bool) {
		let target = path.to_path_buf();
		self.register(move |reg| {
			reg.add_file(
				&target,
				AddFileOptions {
					causes: Vec::new(),
					critical,
				},
			)
		});
	}

	/// Read a file as raw bytes, watching it.
	pub fn read(
		&self,
		path: impl AsRef<Path>,
		options: ReadOptions,
	) -> Result<Vec<u8>, RuntimeError> {
		let path = self.abs(path);
		self.track_file(&path, options.critical);
		std::fs::read(&path).map_err(|err| RuntimeError::io("reading file", err))
	}

	/// Read a file as UTF-8, watching it.
	pub fn read_to_string(
		&self,
		path: impl AsRef<Path>,
		options: ReadOptions,
	) -> Result<String, RuntimeError> {
		let path = self.abs(path);
		self.track_file(&path, options.critical);
		std::fs::read_to_string(&path).map_err(|err| RuntimeError::io("reading file", err))
	}

	/// As [`read`](Self::read), but `None` on any I/O error. The file is
	/// watched either way, so it appearing later still reruns the generator.
	pub fn try_read(&self, path: impl AsRef<Path>, options: ReadOptions) -> Option<Vec<u8>> {
		let path = self.abs(path);
		self.track_file(&path, options.critical);
		std::fs::read(&path).ok()
	}

	/// As [`read_to_string`](Self::read_to_string), but `None` on any I/O
	/// error.
	pub fn try_read_to_string(
		&self,
		path: impl AsRef<Path>,
		options: ReadOptions,
	) -> Option<String> {
		let path = self.abs(path);
		self.track_file(&path, options.critical);
		std::fs::read_to_string(&path).ok()
	}

	/// Stat a path, watching it. `None` when it doesn't exist.
	pub fn stat(&self, path: impl AsRef<Path>) -> Option<Metadata> {
		let path = self.abs(path);
		self.track_file(&path, false);
		std::fs::metadata(&path).ok()
	}

	/// Stat a path without following symlinks, watching it. `None` when it
	/// doesn't exist.
	pub fn lstat(&self, path: impl AsRef<Path>) -> Option<Metadata> {
		let path = self.abs(path);
		self.track_file(&path, false);
		std::fs::symlink_metadata(&path).ok()
	}

	fn probe(&self, path: &Path, kind: ExistenceKind) {
		let target = path.to_path_buf();
		self.register(move |reg| reg.add_existence(&target, kind));
	}

	/// Whether anything exists at the path. The probe is watched.
	pub fn exists(&self, path: impl AsRef<Path>) -> bool {
		let path = self.abs(path);
		self.probe(&path, ExistenceKind::Any);
		std::fs::metadata(&path).is_ok()
	}

	/// Whether a file exists at the path. The probe is watched.
	pub fn file_exists(&self, path: impl AsRef<Path>) -> bool {
		let path = self.abs(path);
		self.probe(&path, ExistenceKind::File);
		std::fs::metadata(&path).map_or(false, |m| m.is_file())
	}

	/// Whether a directory exists at the path. The probe is watched.
	pub fn directory_exists(&self, path: impl AsRef<Path>) -> bool {
		let path = self.abs(path);
		self.probe(&path, ExistenceKind::Dir);
		std::fs::metadata(&path).map_or(false, |m| m.is_dir())
	}

	/// Whether a symlink exists at the path (not following it). The probe is
	/// watched.
	pub fn symlink_exists(&self, path: impl AsRef<Path>) -> bool {
		let path = self.abs(path);
		self.probe(&path, ExistenceKind::Any);
		std::fs::symlink_metadata(&path).map_or(false, |m| m.file_type().is_symlink())
	}

	/// Write a file, creating parent directories as needed.
	///
	/// Content-skipping: when the on-disk bytes equal the new data, nothing
	/// is written and no `write` event is emitted. Writes are not
	/// self-dependencies; nothing is registered. Returns whether bytes hit
	/// the disk.
	pub fn write(
		&self,
		path: impl AsRef<Path>,
		data: impl AsRef<[u8]>,
	) -> Result<bool, RuntimeError> {
		let path = self.abs(path);
		let data = data.as_ref();

		if let Ok(existing) = std::fs::read(&path) {
			if existing == data {
				trace!(?path, "write skipped, contents identical");
				return Ok(false);
			}
		}

		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|err| RuntimeError::io("creating parent directories", err))?;
		}

		std::fs::write(&path, data).map_err(|err| RuntimeError::io("writing file", err))?;
		debug!(?path, bytes=%data.len(), "wrote file");

		self.bus.send(Event::Write {
			path,
			name: self.name.clone(),
		});
		Ok(true)
	}

	/// Watch paths without reading them, optionally blaming their changes on
	/// cause files.
	pub fn watch(
		&self,
		paths: impl IntoIterator<Item = impl AsRef<Path>>,
		options: &WatchOptions,
	) {
		let causes: Vec<PathBuf> = options.causes.iter().map(|c| self.abs(c)).collect();
		for path in paths {
			let path = self.abs(path);
			let causes = causes.clone();
			self.register(move |reg| {
				reg.add_file(
					&path,
					AddFileOptions {
						causes,
						critical: false,
					},
				)
			});
		}
	}
}
