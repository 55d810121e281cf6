use std::{
	fmt,
	path::{Path, PathBuf},
};

/// The kind of a normalised filesystem event.
///
/// Raw notification backends report a zoo of event shapes; the engine collapses
/// them into these five before anything else looks at them. The directory
/// variants survive up to the event bus, but fold into their file counterparts
/// inside the change log.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ChangeKind {
	/// A file appeared.
	Add,

	/// A directory appeared.
	AddDir,

	/// The contents (or metadata) of a file changed.
	Change,

	/// A file went away.
	Unlink,

	/// A directory went away.
	UnlinkDir,
}

impl ChangeKind {
	/// Whether this is one of the two directory variants.
	#[must_use]
	pub const fn is_dir(self) -> bool {
		matches!(self, Self::AddDir | Self::UnlinkDir)
	}

	/// Whether this event makes the path exist (`add`/`addDir`).
	#[must_use]
	pub const fn is_add(self) -> bool {
		matches!(self, Self::Add | Self::AddDir)
	}

	/// Whether this event makes the path go away (`unlink`/`unlinkDir`).
	#[must_use]
	pub const fn is_unlink(self) -> bool {
		matches!(self, Self::Unlink | Self::UnlinkDir)
	}

	/// The change-log rendition of this kind: directory variants collapse into
	/// their file counterparts.
	#[must_use]
	pub const fn folded(self) -> Self {
		match self {
			Self::AddDir => Self::Add,
			Self::UnlinkDir => Self::Unlink,
			other => other,
		}
	}
}

impl fmt::Display for ChangeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}",
			match self {
				Self::Add => "add",
				Self::AddDir => "addDir",
				Self::Change => "change",
				Self::Unlink => "unlink",
				Self::UnlinkDir => "unlinkDir",
			}
		)
	}
}

/// One folded change, as delivered to a generator rerun.
///
/// A `Change` is always about a single path, carries the event the change log
/// folded all raw events for that path into, and both the absolute and the
/// root-relative rendition of the path. When the changed file is blamed on one
/// or more cause files, the change is reported under the cause's path, not the
/// file that physically changed.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Change {
	/// The folded event for this path.
	pub kind: ChangeKind,

	/// Absolute, normalised path.
	pub path: PathBuf,

	/// The same path, relative to the engine root (or absolute when the path
	/// lies outside the root).
	pub rel: PathBuf,
}

impl Change {
	/// Build a change, deriving the root-relative path.
	#[must_use]
	pub fn new(kind: ChangeKind, path: PathBuf, root: &Path) -> Self {
		let rel = path
			.strip_prefix(root)
			.map_or_else(|_| path.clone(), Path::to_path_buf);
		Self { kind, path, rel }
	}
}

impl fmt::Display for Change {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.kind, self.rel.display())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn folds_dir_kinds() {
		assert_eq!(ChangeKind::AddDir.folded(), ChangeKind::Add);
		assert_eq!(ChangeKind::UnlinkDir.folded(), ChangeKind::Unlink);
		assert_eq!(ChangeKind::Change.folded(), ChangeKind::Change);
	}

	#[test]
	fn relativises_inside_root() {
		let change = Change::new(
			ChangeKind::Change,
			PathBuf::from("/project/src/main.rs"),
			Path::new("/project"),
		);
		assert_eq!(change.rel, PathBuf::from("src/main.rs"));
	}

	#[test]
	fn keeps_absolute_outside_root() {
		let change = Change::new(
			ChangeKind::Unlink,
			PathBuf::from("/elsewhere/file"),
			Path::new("/project"),
		);
		assert_eq!(change.rel, PathBuf::from("/elsewhere/file"));
	}

	#[cfg(feature = "serde")]
	#[test]
	fn serde_round_trip() {
		let change = Change::new(
			ChangeKind::AddDir,
			PathBuf::from("/project/new-dir"),
			Path::new("/project"),
		);
		let json = serde_json::to_string(&change).expect("serialise");
		assert!(json.contains("\"add-dir\""));
		let back: Change = serde_json::from_str(&json).expect("deserialise");
		assert_eq!(back, change);
	}
}
