use std::{
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};

use regen_events::RunStatus;
use tempfile::TempDir;

pub fn tracing_init() {
	use tracing_subscriber::{
		fmt::{format::FmtSpan, Subscriber},
		util::SubscriberInitExt,
		EnvFilter,
	};
	Subscriber::builder()
		.pretty()
		.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
		.with_env_filter(EnvFilter::from_default_env())
		.finish()
		.try_init()
		.ok();
}

/// A scratch tree for one test. The root is canonicalised so paths compare
/// equal with what the watcher reports.
pub struct Scratch {
	_dir: TempDir,
	root: PathBuf,
}

impl Scratch {
	pub fn new() -> Self {
		tracing_init();
		let dir = TempDir::new().expect("creating scratch dir");
		let root = std::fs::canonicalize(dir.path()).expect("canonicalising scratch dir");
		Self { _dir: dir, root }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
		self.root.join(rel)
	}

	pub fn file(&self, rel: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> PathBuf {
		let path = self.path(rel);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).expect("creating parents");
		}
		std::fs::write(&path, contents).expect("writing fixture");
		path
	}

	pub fn dir(&self, rel: impl AsRef<Path>) -> PathBuf {
		let path = self.path(rel);
		std::fs::create_dir_all(&path).expect("creating dir");
		path
	}

	/// Write via a temp name and rename into place, so the add event never
	/// observes a half-written file.
	pub fn file_atomic(&self, rel: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> PathBuf {
		let path = self.path(rel);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).expect("creating parents");
		}
		let staging = path.with_extension("staging");
		std::fs::write(&staging, contents).expect("writing staging file");
		std::fs::rename(&staging, &path).expect("renaming into place");
		path
	}
}

/// A shared run counter for bodies to bump.
#[derive(Clone, Default)]
pub struct RunCounter(Arc<AtomicUsize>);

impl RunCounter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bump(&self) -> usize {
		self.0.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub fn count(&self) -> usize {
		self.0.load(Ordering::SeqCst)
	}
}

/// Poll a condition until it holds or the deadline passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + timeout;
	loop {
		if condition() {
			return true;
		}
		if Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(25)).await;
	}
}

/// Wait for at least `n` runs to have begun and the engine to have settled.
pub async fn settled_after<T: Clone + Send + Sync + 'static>(
	engine: &regen::Regen<T>,
	counter: &RunCounter,
	n: usize,
) -> bool {
	eventually(Duration::from_secs(10), || {
		counter.count() >= n && engine.status() == RunStatus::Finished
	})
	.await
}

/// Generous wall-clock slack for real filesystem events to arrive.
pub const EVENT_SLACK: Duration = Duration::from_secs(10);
