//! The change log: folded filesystem events between two runs.
//!
//! Raw events are folded per path so a rerun sees exactly one entry per
//! affected path. Two folds are kept side by side:
//!
//! - the *reported* fold is blame-resolved at insertion: an event on a file
//!   with registered causes is logged once per cause, under the cause's path,
//!   and never under the file itself;
//! - the *raw* fold keys by the path that physically changed, which is what
//!   reset decisions need (a critical file must hard-reset even when its
//!   changes are blamed elsewhere, and an unlinked file must really be
//!   unwatched).
//!
//! Both folds are insertion-ordered.

use std::path::{Path, PathBuf};

use regen_events::{Change, ChangeKind};
use tracing::trace;

/// Fold a later event into an earlier one for the same path.
///
/// Directory variants collapse into their file counterparts first. A `change`
/// may not overwrite an `add` or an `unlink`; everything else is last-wins.
const fn fold_kind(earlier: ChangeKind, later: ChangeKind) -> ChangeKind {
	match (earlier, later.folded()) {
		(ChangeKind::Add | ChangeKind::Unlink, ChangeKind::Change) => earlier,
		(_, later) => later,
	}
}

fn upsert(entries: &mut Vec<(PathBuf, ChangeKind)>, path: &Path, kind: ChangeKind) {
	match entries.iter_mut().find(|(p, _)| p == path) {
		Some((_, existing)) => *existing = fold_kind(*existing, kind),
		None => entries.push((path.to_path_buf(), kind.folded())),
	}
}

/// What a drained change log hands to the reset step.
#[derive(Debug)]
pub(crate) struct DrainedChanges {
	/// Blame-resolved, folded changes, in observation order. This becomes the
	/// `changes` field on the next run's context.
	pub reported: Vec<Change>,

	/// Folded events keyed by the actually-changed path.
	pub raw: Vec<(PathBuf, ChangeKind)>,

	/// Whether any changed path was critical at observation time.
	pub critical: bool,
}

/// Ordered mapping from affected path to a single folded change event.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
	reported: Vec<(PathBuf, ChangeKind)>,
	raw: Vec<(PathBuf, ChangeKind)>,
	critical_hit: bool,
}

impl ChangeLog {
	/// Fold one observed event into the log.
	///
	/// `causes` is the file's registered blame set at observation time;
	/// `critical` whether the changed path itself is critical.
	pub fn fold(&mut self, kind: ChangeKind, path: &Path, causes: &[PathBuf], critical: bool) {
		trace!(%kind, ?path, ?causes, critical, "folding change");

		upsert(&mut self.raw, path, kind);
		self.critical_hit |= critical;

		if causes.is_empty() {
			upsert(&mut self.reported, path, kind);
		} else {
			for cause in causes {
				upsert(&mut self.reported, cause, kind);
			}
		}
	}

	/// Whether nothing has been observed since the last drain.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.reported.is_empty() && self.raw.is_empty()
	}

	/// Take everything folded so far, leaving the log empty.
	pub fn drain(&mut self, root: &Path) -> DrainedChanges {
		let reported = std::mem::take(&mut self.reported)
			.into_iter()
			.map(|(path, kind)| Change::new(kind, path, root))
			.collect();

		DrainedChanges {
			reported,
			raw: std::mem::take(&mut self.raw),
			critical: std::mem::take(&mut self.critical_hit),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const ROOT: &str = "/r";

	fn drain(log: &mut ChangeLog) -> DrainedChanges {
		log.drain(Path::new(ROOT))
	}

	#[test]
	fn change_does_not_overwrite_add_or_unlink() {
		let mut log = ChangeLog::default();
		log.fold(ChangeKind::Add, Path::new("/r/a"), &[], false);
		log.fold(ChangeKind::Change, Path::new("/r/a"), &[], false);
		log.fold(ChangeKind::Unlink, Path::new("/r/b"), &[], false);
		log.fold(ChangeKind::Change, Path::new("/r/b"), &[], false);

		let drained = drain(&mut log);
		assert_eq!(drained.reported[0].kind, ChangeKind::Add);
		assert_eq!(drained.reported[1].kind, ChangeKind::Unlink);
	}

	#[test]
	fn repeated_add_unlink_is_last_value() {
		let mut log = ChangeLog::default();
		log.fold(ChangeKind::Add, Path::new("/r/a"), &[], false);
		log.fold(ChangeKind::Unlink, Path::new("/r/a"), &[], false);
		assert_eq!(drain(&mut log).reported[0].kind, ChangeKind::Unlink);

		log.fold(ChangeKind::Unlink, Path::new("/r/a"), &[], false);
		log.fold(ChangeKind::Add, Path::new("/r/a"), &[], false);
		assert_eq!(drain(&mut log).reported[0].kind, ChangeKind::Add);
	}

	#[test]
	fn dir_events_collapse() {
		let mut log = ChangeLog::default();
		log.fold(ChangeKind::AddDir, Path::new("/r/d"), &[], false);
		log.fold(ChangeKind::UnlinkDir, Path::new("/r/e"), &[], false);

		let drained = drain(&mut log);
		assert_eq!(drained.reported[0].kind, ChangeKind::Add);
		assert_eq!(drained.reported[1].kind, ChangeKind::Unlink);
	}

	#[test]
	fn blamed_changes_report_causes_only() {
		let mut log = ChangeLog::default();
		let causes = vec![PathBuf::from("/r/src.in"), PathBuf::from("/r/extra.in")];
		log.fold(ChangeKind::Change, Path::new("/r/gen.out"), &causes, false);

		let drained = drain(&mut log);
		let paths: Vec<_> = drained.reported.iter().map(|c| c.path.clone()).collect();
		assert_eq!(
			paths,
			vec![PathBuf::from("/r/src.in"), PathBuf::from("/r/extra.in")]
		);

		// the raw fold still names the real file
		assert_eq!(drained.raw, vec![(PathBuf::from("/r/gen.out"), ChangeKind::Change)]);
	}

	#[test]
	fn one_entry_per_path() {
		let mut log = ChangeLog::default();
		log.fold(ChangeKind::Change, Path::new("/r/a"), &[], false);
		log.fold(ChangeKind::Change, Path::new("/r/a"), &[], false);
		log.fold(ChangeKind::Change, Path::new("/r/b"), &[], false);

		let drained = drain(&mut log);
		assert_eq!(drained.reported.len(), 2);
		assert_eq!(drained.reported[0].rel, PathBuf::from("a"));
		assert_eq!(drained.reported[1].rel, PathBuf::from("b"));
	}

	#[test]
	fn critical_flag_sticks_until_drain() {
		let mut log = ChangeLog::default();
		log.fold(ChangeKind::Change, Path::new("/r/config"), &[], true);
		log.fold(ChangeKind::Change, Path::new("/r/other"), &[], false);
		assert!(drain(&mut log).critical);
		log.fold(ChangeKind::Change, Path::new("/r/other"), &[], false);
		assert!(!drain(&mut log).critical);
	}
}
