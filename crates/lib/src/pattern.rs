//! Compiled glob matchers and the ordered pattern registry.
//!
//! A [`Matcher`] is one positive glob compiled together with the negative
//! patterns registered alongside it, plus the event-interest flags that apply
//! to paths it matches. The [`PatternSet`] keeps matchers ordered by descending
//! base depth, so the most specific matcher is consulted first, and answers the
//! watcher's "is this path of interest?" question.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::trace;

use crate::{
	error::RuntimeError,
	paths::{separator_depth, split_pattern, to_glob_text},
};

/// Flags controlling how a matcher is compiled and which events it accepts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MatcherOptions {
	/// Match dotfiles under the base. Off by default, like a scan.
	pub dot: bool,

	/// Case-insensitive matching.
	pub case_insensitive: bool,

	/// Suppress `add` events for zero-byte new files matched only by this
	/// matcher.
	pub ignore_empty_new_files: bool,

	/// Accept `change` events for matched paths. Scans leave this off: a scan
	/// expresses interest in which paths exist, not in their contents.
	pub accept_change_events: bool,
}

/// A compiled glob predicate with its literal base and interest flags.
#[derive(Clone, Debug)]
pub struct Matcher {
	base: PathBuf,
	depth: usize,
	source: String,
	is_globstar: bool,
	name_only: bool,
	show_hidden: bool,
	positive: GlobSet,
	negative: GlobSet,
	options: MatcherOptions,
}

/// Patterns which name dotfiles explicitly (any component starting with `.`)
/// match them regardless of the `dot` option.
fn names_dotfiles(glob: &str) -> bool {
	glob.split('/').any(|component| component.starts_with('.'))
}

fn build_globset(
	patterns: impl IntoIterator<Item = String>,
	options: MatcherOptions,
) -> Result<GlobSet, RuntimeError> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = GlobBuilder::new(&pattern)
			.literal_separator(true)
			.case_insensitive(options.case_insensitive)
			.backslash_escape(true)
			.build()
			.map_err(|err| RuntimeError::Glob { pattern, err })?;
		builder.add(glob);
	}

	builder
		.build()
		.map_err(|err| RuntimeError::Glob {
			pattern: String::new(),
			err,
		})
}

fn absolutise_pattern(pattern: &str, cwd: &Path) -> String {
	if Path::new(pattern).is_absolute() {
		pattern.into()
	} else {
		format!("{}/{}", to_glob_text(cwd), pattern)
	}
}

impl Matcher {
	/// Compile a positive pattern (and the negative patterns registered with
	/// it) relative to `cwd`.
	pub fn compile(
		pattern: &str,
		negatives: &[String],
		cwd: &Path,
		options: MatcherOptions,
	) -> Result<Self, RuntimeError> {
		let source = absolutise_pattern(pattern, cwd);
		let split = split_pattern(&source);
		let base = PathBuf::from(&split.base);

		let positive = build_globset([source.clone()], options)?;
		let negative = build_globset(
			negatives.iter().map(|n| absolutise_pattern(n, cwd)),
			options,
		)?;

		trace!(?source, base=?base, globstar=%split.is_globstar, "compiled matcher");
		Ok(Self {
			depth: separator_depth(&base),
			base,
			source,
			is_globstar: split.is_globstar,
			name_only: false,
			show_hidden: options.dot || names_dotfiles(&split.glob),
			positive,
			negative,
			options,
		})
	}

	/// Compile a single-name pattern for directory listings (`list`/`findUp`).
	///
	/// `**` and separators carry no meaning here: only direct children of
	/// `dir` are tested, by file name.
	pub fn compile_name(
		glob: &str,
		dir: &Path,
		options: MatcherOptions,
	) -> Result<Self, RuntimeError> {
		let glob = glob.trim_start_matches('/');
		let positive = build_globset([glob.to_string()], options)?;

		Ok(Self {
			depth: separator_depth(dir),
			base: dir.to_path_buf(),
			source: format!("{}/{glob}", to_glob_text(dir)),
			is_globstar: false,
			name_only: true,
			show_hidden: options.dot || names_dotfiles(glob),
			positive,
			negative: GlobSet::empty(),
			options,
		})
	}

	/// The literal base directory of the pattern.
	#[must_use]
	pub fn base(&self) -> &Path {
		&self.base
	}

	/// The absolute pattern text this matcher was compiled from.
	#[must_use]
	pub fn source(&self) -> &str {
		&self.source
	}

	/// Whether the glob tail contains a `**`.
	#[must_use]
	pub const fn is_globstar(&self) -> bool {
		self.is_globstar
	}

	/// Whether this is a single-name (listing) matcher. Listing matchers only
	/// need a shallow subscription on their base.
	#[must_use]
	pub const fn is_name_only(&self) -> bool {
		self.name_only
	}

	/// The interest flags this matcher carries.
	#[must_use]
	pub const fn options(&self) -> MatcherOptions {
		self.options
	}

	fn hides(&self, path: &Path) -> bool {
		if self.show_hidden {
			return false;
		}

		path.strip_prefix(&self.base).map_or(false, |rest| {
			rest.components().any(|c| {
				c.as_os_str()
					.to_str()
					.map_or(false, |s| s.starts_with('.'))
			})
		})
	}

	/// Test an absolute path against the compiled predicate.
	#[must_use]
	pub fn matches(&self, path: &Path) -> bool {
		if self.name_only {
			return path.parent() == Some(self.base.as_path())
				&& path.file_name().map_or(false, |name| {
					self.positive.is_match(Path::new(name)) && !self.hides(path)
				});
		}

		if self.negative.is_match(path) {
			return false;
		}

		self.positive.is_match(path) && !self.hides(path)
	}
}

/// The ordered collection of active matchers.
///
/// Matchers are kept sorted by descending depth of their literal base;
/// identical re-registrations replace the earlier entry rather than
/// accumulating.
#[derive(Debug, Default)]
pub struct PatternSet {
	matchers: Vec<Matcher>,
}

impl PatternSet {
	/// Insert a matcher, keeping depth order and deduplicating by source.
	///
	/// Returns false when an identical registration was replaced in place, so
	/// callers know not to take another base subscription.
	pub fn add(&mut self, matcher: Matcher) -> bool {
		if let Some(existing) = self
			.matchers
			.iter_mut()
			.find(|m| m.source == matcher.source && m.name_only == matcher.name_only)
		{
			*existing = matcher;
			return false;
		}

		let at = self
			.matchers
			.iter()
			.position(|m| m.depth < matcher.depth)
			.unwrap_or(self.matchers.len());
		self.matchers.insert(at, matcher);
		true
	}

	/// True iff `path` equals any matcher's base or satisfies any matcher's
	/// predicate.
	#[must_use]
	pub fn matches(&self, path: &Path) -> bool {
		self.matchers
			.iter()
			.any(|m| m.base == path || m.matches(path))
	}

	/// All matchers whose predicate covers `path`, most specific first.
	pub fn applicable<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Matcher> {
		self.matchers.iter().filter(move |m| m.matches(path))
	}

	/// The literal bases of all matchers, most specific first.
	pub fn bases(&self) -> impl Iterator<Item = &Path> {
		self.matchers.iter().map(|m| m.base.as_path())
	}

	/// The matchers whose base is exactly `path`.
	pub fn with_base<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Matcher> {
		self.matchers.iter().filter(move |m| m.base == path)
	}

	/// Drop matchers whose base is `gone` or lies under it, returning them so
	/// their base subscriptions can be released.
	pub fn drop_bases_under(&mut self, gone: &Path) -> Vec<Matcher> {
		let (dropped, kept) = std::mem::take(&mut self.matchers)
			.into_iter()
			.partition(|m| m.base == gone || m.base.starts_with(gone));
		self.matchers = kept;
		dropped
	}

	/// Remove every matcher.
	pub fn clear(&mut self) {
		self.matchers.clear();
	}

	/// Number of active matchers.
	#[must_use]
	pub fn len(&self) -> usize {
		self.matchers.len()
	}

	/// Whether no matchers are registered.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.matchers.is_empty()
	}
}

/// Split raw patterns into positives and negatives (leading `!`), compile the
/// positives, and return the matchers.
pub fn compile_patterns(
	patterns: impl IntoIterator<Item = impl AsRef<str>>,
	extra_ignores: impl IntoIterator<Item = impl AsRef<str>>,
	cwd: &Path,
	options: MatcherOptions,
) -> Result<Vec<Matcher>, RuntimeError> {
	let mut positives = Vec::new();
	let mut negatives: Vec<String> = extra_ignores
		.into_iter()
		.map(|i| i.as_ref().to_string())
		.collect();

	for pattern in patterns {
		let pattern = pattern.as_ref();
		match pattern.strip_prefix('!') {
			Some(negative) => negatives.push(negative.to_string()),
			None => positives.push(pattern.to_string()),
		}
	}

	positives
		.iter()
		.map(|p| Matcher::compile(p, &negatives, cwd, options))
		.collect()
}
