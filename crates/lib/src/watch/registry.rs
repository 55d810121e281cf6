//! The watch registry: who depends on what, and why.
//!
//! Tracks watched files, blame ("this change is really about that file"),
//! critical flags, existence probes, and the fallback ancestors held open for
//! paths that don't exist yet. Every facade call lands here; the registry in
//! turn instructs the recursive and existence watchers.

use std::{
	collections::{HashMap, HashSet},
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{ExistenceWatcher, RecursiveWatcher, WatcherKind, WatcherMessage};
use crate::{
	error::{CriticalError, RuntimeError},
	pattern::{Matcher, PatternSet},
};

/// Which flavour of existence probe a path was registered under.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExistenceKind {
	/// `exists` / `symlinkExists`: any kind of entry.
	Any,

	/// `fileExists`: only file events are relevant.
	File,

	/// `directoryExists`: only directory events are relevant.
	Dir,
}

/// Options for registering a watched file.
#[derive(Clone, Debug, Default)]
pub struct AddFileOptions {
	/// Cause files whose invalidation is reported instead of this file's.
	pub causes: Vec<PathBuf>,

	/// Whether a change to this file triggers a hard reset.
	pub critical: bool,
}

/// The registry's bookkeeping, shared with the watcher callbacks.
#[derive(Debug, Default)]
pub(crate) struct WatchState {
	/// Files the generator explicitly depends on via read/watch.
	pub watched_files: HashSet<PathBuf>,

	/// For each watched file, the cause files to report instead.
	/// Cause order is insertion order and is preserved in reports.
	pub blamed_files: HashMap<PathBuf, Vec<PathBuf>>,

	/// Files whose change triggers a hard reset.
	pub critical_files: HashSet<PathBuf>,

	/// Watched targets that did not exist at registration time.
	pub missing_paths: HashSet<PathBuf>,

	/// Ancestors held open because a descendant is missing, with the number
	/// of descendants depending on each.
	pub fallback_paths: HashMap<PathBuf, usize>,

	/// Per missing target: the registered ancestor chain, and whether its
	/// deepest entry holds an OS subscription.
	fallback_chains: HashMap<PathBuf, (Vec<PathBuf>, bool)>,

	/// Untyped existence probes.
	pub existence_paths: HashSet<PathBuf>,

	/// File-typed existence probes.
	pub file_existence_paths: HashSet<PathBuf>,

	/// Directory-typed existence probes.
	pub dir_existence_paths: HashSet<PathBuf>,

	/// Which parent directory the existence watcher holds for each probe.
	existence_parents: HashMap<PathBuf, PathBuf>,

	/// Active matchers, most specific first.
	pub patterns: PatternSet,
}

impl WatchState {
	fn is_probe(&self, path: &Path) -> bool {
		self.existence_paths.contains(path)
			|| self.file_existence_paths.contains(path)
			|| self.dir_existence_paths.contains(path)
	}

	fn is_base(&self, path: &Path) -> bool {
		self.patterns.bases().any(|b| b == path)
	}
}

/// Tracks every dependency the generator has expressed and keeps the OS-level
/// subscriptions in line with them.
pub(crate) struct WatchRegistry {
	root: PathBuf,
	state: Arc<Mutex<WatchState>>,
	recursive: RecursiveWatcher,
	existence: ExistenceWatcher,
	events: mpsc::Sender<WatcherMessage>,
}

impl WatchRegistry {
	pub fn new(
		root: PathBuf,
		kind: WatcherKind,
		events: mpsc::Sender<WatcherMessage>,
	) -> Result<Self, CriticalError> {
		debug!(?root, ?kind, "creating watch registry");
		let state = Arc::new(Mutex::new(WatchState::default()));
		let recursive = RecursiveWatcher::new(kind, state.clone(), events.clone())?;
		let existence = ExistenceWatcher::new(kind, state.clone(), events.clone())?;

		Ok(Self {
			root,
			state,
			recursive,
			existence,
			events,
		})
	}

	/// The engine root this registry resolves against.
	pub fn root(&self) -> &Path {
		&self.root
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, WatchState> {
		self.state.lock().expect("watch state lock poisoned")
	}

	/// Failures releasing an OS subscription cannot fail the operation that
	/// triggered the release; they travel the same channel as watcher-side
	/// errors and surface as `error` events.
	fn report(&self, error: RuntimeError) {
		if self.events.try_send(WatcherMessage::Error(error)).is_err() {
			trace!("event channel full or closed, dropping unwatch error");
		}
	}

	/// Register the ancestor chain for a missing target and subscribe to the
	/// deepest existing ancestor.
	fn register_fallback(
		&self,
		state: &mut WatchState,
		target: &Path,
	) -> Result<(), RuntimeError> {
		state.missing_paths.insert(target.to_path_buf());

		let mut chain = Vec::new();
		let mut watched = false;
		let mut cursor = target.parent();
		while let Some(ancestor) = cursor {
			chain.push(ancestor.to_path_buf());
			*state
				.fallback_paths
				.entry(ancestor.to_path_buf())
				.or_insert(0) += 1;

			if ancestor.exists() {
				self.recursive.watch_shallow(ancestor)?;
				watched = true;
				break;
			}

			cursor = ancestor.parent();
		}

		trace!(?target, ?chain, "registered fallback chain");
		state
			.fallback_chains
			.insert(target.to_path_buf(), (chain, watched));
		Ok(())
	}

	/// Undo [`register_fallback`](Self::register_fallback) for a target.
	fn release_fallback(&self, state: &mut WatchState, target: &Path) {
		state.missing_paths.remove(target);
		let Some((chain, watched)) = state.fallback_chains.remove(target) else {
			return;
		};

		for ancestor in &chain {
			if let Some(count) = state.fallback_paths.get_mut(ancestor) {
				*count = count.saturating_sub(1);
				if *count == 0 {
					state.fallback_paths.remove(ancestor);
				}
			}
		}

		if watched {
			if let Some(deepest) = chain.last() {
				if let Err(err) = self.recursive.unwatch_shallow(deepest) {
					self.report(err);
				}
			}
		}

		trace!(?target, "released fallback chain");
	}

	/// Take the real subscriptions for a path which exists, according to what
	/// it is registered as. The caller has already put it in the relevant
	/// sets.
	fn attach_existing(&self, state: &mut WatchState, path: &Path) -> Result<(), RuntimeError> {
		if state.watched_files.contains(path) {
			if let Some(parent) = path.parent() {
				self.recursive.watch_shallow(parent)?;
			}
		} else if state.is_probe(path) {
			if let Some(parent) = path.parent() {
				self.existence.watch_parent(parent)?;
				state
					.existence_parents
					.insert(path.to_path_buf(), parent.to_path_buf());
			}
		}

		let base_modes: Vec<bool> = state
			.patterns
			.with_base(path)
			.map(Matcher::is_name_only)
			.collect();
		for name_only in base_modes {
			if name_only {
				self.recursive.watch_shallow(path)?;
			} else {
				self.recursive.watch_recursive(path)?;
			}
		}

		Ok(())
	}

	/// Register a watched file (read/watch/addFile semantics).
	pub fn add_file(&self, path: &Path, options: AddFileOptions) -> Result<(), RuntimeError> {
		let mut state = self.lock();

		let already_watched = state.watched_files.contains(path);
		let already_blamed = state.blamed_files.contains_key(path);
		state.watched_files.insert(path.to_path_buf());

		if options.critical {
			state.critical_files.insert(path.to_path_buf());
		}

		if options.causes.is_empty() {
			// re-adding a blamed file without a cause keeps its own changes
			// visible: the file blames itself alongside its causes
			if already_blamed {
				let own = path.to_path_buf();
				let causes = state
					.blamed_files
					.get_mut(path)
					.expect("blamed entry just checked");
				if !causes.contains(&own) {
					causes.push(own);
				}
			}
		} else {
			if !already_blamed {
				let seed = if already_watched {
					vec![path.to_path_buf()]
				} else {
					Vec::new()
				};
				state.blamed_files.insert(path.to_path_buf(), seed);
			}

			let causes = state
				.blamed_files
				.get_mut(path)
				.expect("blamed entry just inserted");
			for cause in options.causes {
				if !causes.contains(&cause) {
					causes.push(cause);
				}
			}
		}

		if already_watched {
			return Ok(());
		}

		trace!(?path, "watching file");
		if path.exists() {
			if let Some(parent) = path.parent() {
				self.recursive.watch_shallow(parent)?;
			}
		} else {
			self.register_fallback(&mut state, path)?;
			if path.exists() {
				// appeared between the check and the subscription
				self.release_fallback(&mut state, path);
				self.attach_existing(&mut state, path)?;
			}
		}

		Ok(())
	}

	/// Register compiled matchers and subscribe to their bases.
	pub fn add_matchers(&self, matchers: Vec<Matcher>) -> Result<(), RuntimeError> {
		let mut state = self.lock();

		for matcher in matchers {
			let base = matcher.base().to_path_buf();
			let shallow = matcher.is_name_only();
			if !state.patterns.add(matcher) {
				continue;
			}

			if !base.exists() {
				self.register_fallback(&mut state, &base)?;
			} else if shallow {
				self.recursive.watch_shallow(&base)?;
			} else {
				self.recursive.watch_recursive(&base)?;
			}
		}

		Ok(())
	}

	/// Register an existence probe.
	pub fn add_existence(&self, path: &Path, kind: ExistenceKind) -> Result<(), RuntimeError> {
		let mut state = self.lock();

		let inserted = match kind {
			ExistenceKind::Any => state.existence_paths.insert(path.to_path_buf()),
			ExistenceKind::File => state.file_existence_paths.insert(path.to_path_buf()),
			ExistenceKind::Dir => state.dir_existence_paths.insert(path.to_path_buf()),
		};

		if !inserted
			|| state.existence_parents.contains_key(path)
			|| state.missing_paths.contains(path)
		{
			return Ok(());
		}

		match path.parent() {
			Some(parent) if parent.exists() => {
				self.existence.watch_parent(parent)?;
				state
					.existence_parents
					.insert(path.to_path_buf(), parent.to_path_buf());
			}
			Some(_) => {
				self.register_fallback(&mut state, path)?;
				if path.parent().is_some_and(Path::exists) {
					self.release_fallback(&mut state, path);
					self.attach_existing(&mut state, path)?;
				}
			}
			None => {}
		}

		Ok(())
	}

	fn unwatch_locked(&self, state: &mut WatchState, path: &Path) {
		let was_watched = state.watched_files.remove(path);
		let was_missing = state.missing_paths.contains(path);
		state.critical_files.remove(path);
		state.blamed_files.remove(path);

		let was_probe = state.existence_paths.remove(path)
			| state.file_existence_paths.remove(path)
			| state.dir_existence_paths.remove(path);
		if let Some(parent) = state.existence_parents.remove(path) {
			if let Err(err) = self.existence.unwatch_parent(&parent) {
				self.report(err);
			}
		}

		if was_missing && (was_watched || was_probe) && !state.is_base(path) {
			self.release_fallback(state, path);
		} else if was_watched && !was_missing {
			if let Some(parent) = path.parent() {
				if let Err(err) = self.recursive.unwatch_shallow(parent) {
					self.report(err);
				}
			}
		}

		if !(was_watched || was_probe) {
			return;
		}

		trace!(?path, "unwatched");

		// blame cascade: forget this path as a cause; files left with no
		// causes at all are forgotten too
		let mut orphans = Vec::new();
		for (blamed, causes) in &mut state.blamed_files {
			if let Some(at) = causes.iter().position(|c| c == path) {
				causes.remove(at);
				if causes.is_empty() {
					orphans.push(blamed.clone());
				}
			}
		}

		for orphan in orphans {
			self.unwatch_locked(state, &orphan);
		}
	}

	/// Forget a watched file or probe entirely.
	pub fn unwatch(&self, path: &Path) {
		let mut state = self.lock();
		self.unwatch_locked(&mut state, path);
	}

	/// React to an observed `add`/`addDir`: resolve fallback chains which the
	/// new path satisfies or shortens.
	///
	/// Returns any other missing targets found to have materialised while
	/// their chains were being re-anchored; the caller owes those an `add`.
	pub fn check_added_path(&self, path: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
		let mut state = self.lock();

		if state.missing_paths.contains(path) {
			// a missing target appeared: swap the fallback chain for the
			// real subscription
			self.release_fallback(&mut state, path);
			self.attach_existing(&mut state, path)?;
			return Ok(Vec::new());
		}

		let mut appeared = Vec::new();
		if state.fallback_paths.contains_key(path) {
			// an intermediate ancestor appeared: re-anchor the chains that
			// pass through it, moving their subscriptions deeper
			let targets: Vec<PathBuf> = state
				.fallback_chains
				.iter()
				.filter(|(_, (chain, _))| chain.iter().any(|a| a == path))
				.map(|(target, _)| target.clone())
				.collect();

			for target in targets {
				self.release_fallback(&mut state, &target);
				if target.exists() {
					// materialised before the deeper subscription was in
					// place; no event for it will ever arrive
					self.attach_existing(&mut state, &target)?;
					appeared.push(target);
				} else {
					self.register_fallback(&mut state, &target)?;
				}
			}
		}

		Ok(appeared)
	}

	/// Whether a change to this file triggers a hard reset.
	pub fn is_file_critical(&self, path: &Path) -> bool {
		self.lock().critical_files.contains(path)
	}

	/// The registered causes for a path, in insertion order.
	pub fn causes_of(&self, path: &Path) -> Vec<PathBuf> {
		self.lock()
			.blamed_files
			.get(path)
			.cloned()
			.unwrap_or_default()
	}

	/// Whether an event for this path is of interest to the engine.
	pub fn is_relevant(&self, path: &Path) -> bool {
		let state = self.lock();
		state.watched_files.contains(path) || state.is_probe(path) || state.patterns.matches(path)
	}

	/// Snapshot of the watched file set, sorted.
	pub fn watched_files(&self) -> Vec<PathBuf> {
		let mut files: Vec<_> = self.lock().watched_files.iter().cloned().collect();
		files.sort();
		files
	}

	/// Snapshot of the blame mapping, sorted by blamed path.
	pub fn blamed_files(&self) -> Vec<(PathBuf, Vec<PathBuf>)> {
		let mut blamed: Vec<_> = self
			.lock()
			.blamed_files
			.iter()
			.map(|(p, c)| (p.clone(), c.clone()))
			.collect();
		blamed.sort_by(|a, b| a.0.cmp(&b.0));
		blamed
	}

	/// Soft reset: drop watches for paths whose folded event was not `add`,
	/// and release matchers whose base went away.
	pub fn apply_soft_reset(&self, raw: &[(PathBuf, regen_events::ChangeKind)]) {
		use regen_events::ChangeKind;

		let mut state = self.lock();
		for (path, kind) in raw {
			match kind {
				ChangeKind::Add | ChangeKind::AddDir => {}
				ChangeKind::Change => self.unwatch_locked(&mut state, path),
				ChangeKind::Unlink | ChangeKind::UnlinkDir => {
					self.unwatch_locked(&mut state, path);
					for matcher in state.patterns.drop_bases_under(path) {
						let base = matcher.base();
						let released = if state.fallback_chains.contains_key(base) {
							self.release_fallback(&mut state, base);
							Ok(())
						} else if matcher.is_name_only() {
							self.recursive.unwatch_shallow(base)
						} else {
							self.recursive.unwatch_recursive(base)
						};
						if let Err(err) = released {
							self.report(err);
						}
					}
				}
			}
		}
	}

	/// Hard reset: clear every registration and rebuild the OS watchers.
	pub fn reset(&self) -> Result<(), CriticalError> {
		debug!("hard-resetting watch registry");
		let mut state = self.lock();
		*state = WatchState::default();
		self.recursive.recreate()?;
		self.existence.recreate()?;
		Ok(())
	}

	/// Release everything; the registry is unusable afterwards.
	pub fn close(&self) {
		debug!("closing watch registry");
		let mut state = self.lock();
		*state = WatchState::default();
		self.recursive.close();
		self.existence.close();
	}
}

impl std::fmt::Debug for WatchRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WatchRegistry")
			.field("root", &self.root)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pattern::MatcherOptions;
	use regen_events::ChangeKind;

	fn registry(root: &Path) -> WatchRegistry {
		let (tx, _rx) = mpsc::channel(64);
		WatchRegistry::new(root.to_path_buf(), WatcherKind::default(), tx).expect("registry")
	}

	fn opts_with_cause(cause: &Path) -> AddFileOptions {
		AddFileOptions {
			causes: vec![cause.to_path_buf()],
			..Default::default()
		}
	}

	#[test]
	fn add_file_tracks_and_unwatch_forgets() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let file = tmp.path().join("a.txt");
		std::fs::write(&file, "a").expect("write");

		let reg = registry(tmp.path());
		reg.add_file(&file, AddFileOptions::default()).expect("add");
		assert_eq!(reg.watched_files(), vec![file.clone()]);

		reg.unwatch(&file);
		assert!(reg.watched_files().is_empty());
	}

	#[test]
	fn critical_implies_watched() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let file = tmp.path().join("config.json");
		std::fs::write(&file, "{}").expect("write");

		let reg = registry(tmp.path());
		reg.add_file(
			&file,
			AddFileOptions {
				critical: true,
				..Default::default()
			},
		)
		.expect("add");

		assert!(reg.is_file_critical(&file));
		assert_eq!(reg.watched_files(), vec![file]);
	}

	#[test]
	fn blame_seeds_self_when_already_watched() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let gen = tmp.path().join("gen.out");
		let src = tmp.path().join("src.in");
		std::fs::write(&gen, "g").expect("write");

		let reg = registry(tmp.path());
		reg.add_file(&gen, AddFileOptions::default()).expect("add");
		reg.add_file(&gen, opts_with_cause(&src)).expect("add with cause");

		assert_eq!(reg.causes_of(&gen), vec![gen.clone(), src]);
	}

	#[test]
	fn readding_blamed_file_blames_itself_too() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let gen = tmp.path().join("gen.out");
		let src = tmp.path().join("src.in");
		std::fs::write(&gen, "g").expect("write");

		let reg = registry(tmp.path());
		reg.add_file(&gen, opts_with_cause(&src)).expect("add with cause");
		assert_eq!(reg.causes_of(&gen), vec![src.clone()]);

		reg.add_file(&gen, AddFileOptions::default()).expect("re-add");
		assert_eq!(reg.causes_of(&gen), vec![src, gen.clone()]);
	}

	#[test]
	fn removing_last_cause_forgets_the_blamed_file() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let gen = tmp.path().join("gen.out");
		let src = tmp.path().join("src.in");
		std::fs::write(&gen, "g").expect("write");
		std::fs::write(&src, "s").expect("write");

		let reg = registry(tmp.path());
		reg.add_file(&src, AddFileOptions::default()).expect("add src");
		reg.add_file(&gen, opts_with_cause(&src)).expect("add gen");
		assert_eq!(reg.watched_files(), {
			let mut v = vec![gen.clone(), src.clone()];
			v.sort();
			v
		});

		reg.unwatch(&src);
		assert!(reg.watched_files().is_empty(), "cascade forgot gen too");
	}

	#[test]
	fn missing_path_registers_fallback_ancestors() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let missing = tmp.path().join("sub/deeper/target.txt");

		let reg = registry(tmp.path());
		reg.add_file(&missing, AddFileOptions::default()).expect("add");

		{
			let state = reg.lock();
			assert!(state.missing_paths.contains(&missing));
			assert_eq!(
				state.fallback_paths.get(&tmp.path().join("sub/deeper")),
				Some(&1)
			);
			assert_eq!(state.fallback_paths.get(&tmp.path().join("sub")), Some(&1));
			assert_eq!(state.fallback_paths.get(tmp.path()), Some(&1));
		}

		// target appears: the chain is released
		std::fs::create_dir_all(missing.parent().expect("parent")).expect("mkdir");
		std::fs::write(&missing, "t").expect("write");
		reg.check_added_path(&missing).expect("check");

		let state = reg.lock();
		assert!(state.missing_paths.is_empty());
		assert!(state.fallback_paths.is_empty());
	}

	#[test]
	fn intermediate_ancestor_reanchors_chain() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let missing = tmp.path().join("sub/deeper/target.txt");

		let reg = registry(tmp.path());
		reg.add_file(&missing, AddFileOptions::default()).expect("add");

		std::fs::create_dir_all(tmp.path().join("sub")).expect("mkdir");
		reg.check_added_path(&tmp.path().join("sub")).expect("check");

		let state = reg.lock();
		assert!(state.missing_paths.contains(&missing));
		// the chain no longer includes the root: it re-anchored at sub
		assert_eq!(state.fallback_paths.get(tmp.path()), None);
		assert_eq!(state.fallback_paths.get(&tmp.path().join("sub")), Some(&1));
	}

	#[test]
	fn soft_reset_unwatches_changed_and_unlinked() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let changed = tmp.path().join("changed.txt");
		let gone = tmp.path().join("gone.txt");
		let added = tmp.path().join("added.txt");
		for f in [&changed, &gone, &added] {
			std::fs::write(f, "x").expect("write");
		}

		let reg = registry(tmp.path());
		for f in [&changed, &gone, &added] {
			reg.add_file(f, AddFileOptions::default()).expect("add");
		}

		reg.apply_soft_reset(&[
			(changed.clone(), ChangeKind::Change),
			(gone.clone(), ChangeKind::Unlink),
			(added.clone(), ChangeKind::Add),
		]);

		assert_eq!(reg.watched_files(), vec![added]);
	}

	#[test]
	fn hard_reset_clears_everything() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let file = tmp.path().join("a.txt");
		std::fs::write(&file, "a").expect("write");

		let reg = registry(tmp.path());
		reg.add_file(&file, AddFileOptions::default()).expect("add");
		let matchers = crate::pattern::compile_patterns(
			["*.txt"],
			Vec::<String>::new(),
			tmp.path(),
			MatcherOptions::default(),
		)
		.expect("compile");
		reg.add_matchers(matchers).expect("add matchers");

		reg.reset().expect("reset");
		assert!(reg.watched_files().is_empty());
		assert!(!reg.is_relevant(&file));
	}
}
