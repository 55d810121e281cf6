//! The main engine type.

use std::{
	fmt,
	future::Future,
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
	time::Duration,
};

use futures::FutureExt;
use regen_events::{AbortReason, Event, RunStatus};
use tokio::{
	spawn,
	sync::{broadcast, mpsc, oneshot, watch},
	task::JoinHandle,
};
use tracing::debug;

use crate::{
	bus::EventBus,
	config::{Config, WatchMode},
	context::Context,
	error::{CriticalError, RuntimeError},
	paths::{absolutise, split_pattern},
	run::{self, Control, GeneratorFn, RunResult, Worker},
	store::Store,
	watch::WatchRegistry,
};

/// The engine: runs a generator body against a filesystem and, in watch mode,
/// reruns it whenever an observed dependency changes.
///
/// Constructing an engine starts it. The first run begins on a yield point
/// after the constructor returns, so subscribing to
/// [`events`](Regen::events) immediately after construction observes the
/// first `start`. There is never more than one body executing per engine.
pub struct Regen<T: Clone + Send + Sync + 'static> {
	name: String,
	root: PathBuf,
	bus: EventBus<T>,
	registry: Option<Arc<WatchRegistry>>,
	control: mpsc::Sender<Control>,
	status: watch::Receiver<RunStatus>,
	runs: watch::Receiver<u64>,
	result: watch::Receiver<Option<RunResult<T>>>,
	handle: Mutex<Option<JoinHandle<Result<(), CriticalError>>>>,
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for Regen<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Regen")
			.field("name", &self.name)
			.field("root", &self.root)
			.finish_non_exhaustive()
	}
}

/// Watch-mode introspection, exposed by [`Regen::watcher`].
#[derive(Clone, Debug)]
pub struct WatcherHandle {
	registry: Arc<WatchRegistry>,
	runs: watch::Receiver<u64>,
}

impl WatcherHandle {
	/// Resolves once the first run has started, i.e. once the initial watch
	/// registrations are in place.
	pub async fn ready(&self) {
		let mut runs = self.runs.clone();
		runs.wait_for(|n| *n >= 1).await.ok();
	}

	/// Snapshot of the watched file set, sorted.
	#[must_use]
	pub fn watched_files(&self) -> Vec<PathBuf> {
		self.registry.watched_files()
	}

	/// Snapshot of the blame mapping, sorted by blamed path; cause order is
	/// registration order.
	#[must_use]
	pub fn blamed_files(&self) -> Vec<(PathBuf, Vec<PathBuf>)> {
		self.registry.blamed_files()
	}
}

fn resolve_root(configured: &Path) -> Result<PathBuf, CriticalError> {
	if configured.is_absolute() {
		Ok(absolutise(Path::new("/"), configured))
	} else {
		let cwd = std::env::current_dir().map_err(|err| CriticalError::IoError {
			about: "resolving working directory",
			err,
		})?;
		Ok(absolutise(&cwd, configured))
	}
}

fn validate_initial(patterns: &[String], root: &Path) -> Result<(), CriticalError> {
	for pattern in patterns {
		if pattern.starts_with('!') {
			return Err(CriticalError::NegativeInitialWatch {
				pattern: pattern.clone(),
			});
		}

		let base = absolutise(root, Path::new(&split_pattern(pattern).base));
		if !base.starts_with(root) {
			return Err(CriticalError::WatchOutsideRoot {
				pattern: pattern.clone(),
			});
		}
	}

	Ok(())
}

impl<T: Clone + Send + Sync + 'static> Regen<T> {
	/// Instantiate and start an engine from configuration and a body.
	///
	/// Returns an [`Arc`] for convenience; use
	/// [`try_unwrap`][Arc::try_unwrap()] to get the value directly if needed.
	pub fn new<F, Fut>(config: Config, body: F) -> Result<Arc<Self>, CriticalError>
	where
		F: Fn(Context<T>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
	{
		Self::with_bus(config, EventBus::default(), body)
	}

	/// As [`new`](Self::new), with an externally provided event bus, shared
	/// across engines.
	pub fn with_bus<F, Fut>(
		config: Config,
		bus: EventBus<T>,
		body: F,
	) -> Result<Arc<Self>, CriticalError>
	where
		F: Fn(Context<T>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
	{
		let handler: GeneratorFn<T> = Arc::new(move |ctx| body(ctx).boxed());
		Self::from_parts(config, bus, handler)
	}

	/// The all-parts constructor behind [`new`](Self::new) and
	/// [`compose`](crate::compose()).
	pub fn from_parts(
		config: Config,
		bus: EventBus<T>,
		handler: GeneratorFn<T>,
	) -> Result<Arc<Self>, CriticalError> {
		debug!(?config, pid=%std::process::id(), version=%env!("CARGO_PKG_VERSION"), "initialising");

		let root = resolve_root(&config.root)?;

		let initial = match &config.watch {
			WatchMode::Paths(patterns) => {
				validate_initial(patterns, &root)?;
				patterns.clone()
			}
			_ => Vec::new(),
		};

		let (events_tx, events_rx) = mpsc::channel(config.event_channel_size);
		let registry = if config.watch.is_enabled() {
			Some(Arc::new(WatchRegistry::new(
				root.clone(),
				config.file_watcher,
				events_tx,
			)?))
		} else {
			None
		};

		let (control_tx, control_rx) = mpsc::channel(16);
		let (status_tx, status_rx) = watch::channel(RunStatus::Pending);
		let (runs_tx, runs_rx) = watch::channel(0_u64);
		let (result_tx, result_rx) = watch::channel(None);

		let worker = Worker {
			root: root.clone(),
			name: config.name.clone(),
			handler,
			bus: bus.clone(),
			registry: registry.clone(),
			initial,
			events: events_rx,
			control: control_rx,
			status: status_tx,
			runs: runs_tx,
			result: result_tx,
			store: Arc::new(Store::default()),
		};

		debug!("spawning engine worker");
		let handle = spawn(run::worker(worker));

		Ok(Arc::new(Self {
			name: config.name,
			root,
			bus,
			registry,
			control: control_tx,
			status: status_rx,
			runs: runs_rx,
			result: result_rx,
			handle: Mutex::new(Some(handle)),
		}))
	}

	/// The engine's name, as tagged onto its events.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The absolute engine root.
	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Where the engine currently is in its lifecycle.
	#[must_use]
	pub fn status(&self) -> RunStatus {
		*self.status.borrow()
	}

	/// The engine's event bus.
	#[must_use]
	pub fn events(&self) -> &EventBus<T> {
		&self.bus
	}

	/// Subscribe to the engine's events.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<Event<T>> {
		self.bus.subscribe()
	}

	/// Watch-mode introspection; `None` when watching is disabled.
	#[must_use]
	pub fn watcher(&self) -> Option<WatcherHandle> {
		self.registry.as_ref().map(|registry| WatcherHandle {
			registry: registry.clone(),
			runs: self.runs.clone(),
		})
	}

	/// Wait for a run to settle and return its result.
	///
	/// Resolves with the first settled run if none has settled yet, or with
	/// the most recently settled one otherwise. Aborted runs don't settle:
	/// they lead to a rerun instead.
	pub async fn wait(&self) -> RunResult<T> {
		let mut result = self.result.clone();
		let outcome = match result.wait_for(Option::is_some).await {
			Ok(settled) => settled.clone().expect("checked Some above"),
			Err(_) => Err(Arc::new(RuntimeError::Aborted {
				reason: AbortReason::Destroy,
			})),
		};
		outcome
	}

	/// Wait until the next run starts.
	///
	/// With a timeout, gives up after that long with
	/// [`RuntimeError::WaitTimeout`]; the engine itself is unaffected.
	pub async fn wait_for_start(&self, timeout: Option<Duration>) -> Result<(), RuntimeError> {
		let mut runs = self.runs.clone();
		let seen = *runs.borrow();
		let started = runs.wait_for(|n| *n > seen);

		match timeout {
			Some(timeout) => match tokio::time::timeout(timeout, started).await {
				Err(_) => Err(RuntimeError::WaitTimeout { timeout }),
				Ok(Ok(_)) => Ok(()),
				Ok(Err(_)) => Err(RuntimeError::Aborted {
					reason: AbortReason::Destroy,
				}),
			},
			None => started.await.map(drop).map_err(|_| RuntimeError::Aborted {
				reason: AbortReason::Destroy,
			}),
		}
	}

	/// Rerun the generator.
	///
	/// If a body is executing, it is aborted first; if a rerun is already
	/// pending, this piggybacks on it. Resolves once the new run has started.
	pub async fn rerun(&self) -> Result<(), CriticalError> {
		let (ack, acked) = oneshot::channel();
		self.control
			.send(Control::Rerun { ack })
			.await
			.map_err(|_| CriticalError::Destroyed)?;
		acked.await.map_err(|_| CriticalError::Destroyed)
	}

	/// Destroy the engine: abort any executing body, close the watchers, and
	/// emit `destroy`. Terminal and idempotent; any later
	/// [`rerun`](Self::rerun) fails with [`CriticalError::Destroyed`].
	pub async fn destroy(&self) -> Result<(), CriticalError> {
		let (ack, acked) = oneshot::channel();
		if self.control.send(Control::Destroy { ack }).await.is_err() {
			// worker already gone
			return Ok(());
		}
		acked.await.ok();
		Ok(())
	}

	/// Obtain the handle to the engine's main task.
	///
	/// This must only be called once.
	///
	/// # Panics
	/// Panics if called twice.
	pub fn main(&self) -> JoinHandle<Result<(), CriticalError>> {
		debug!("handing over main task handle");
		self.handle
			.lock()
			.expect("handle lock poisoned")
			.take()
			.expect("Regen::main was called twice")
	}
}
