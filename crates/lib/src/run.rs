//! The run lifecycle: at most one generator body at a time, reruns driven by
//! folded filesystem changes, resets in between.
//!
//! The worker owns the engine loop. It starts the first run after a yield (so
//! engine constructors return before anything happens), then cycles: reset,
//! start, poll the body while ingesting filesystem events and control
//! messages, settle, and either rerun or go idle. Exactly one reset runs
//! between two bodies.

use std::{path::PathBuf, sync::Arc};

use futures::future::BoxFuture;
use regen_events::{AbortReason, Change, Event, RunStatus};
use tokio::{
	sync::{mpsc, oneshot, watch},
	task::yield_now,
};
use tracing::{debug, trace};

use crate::{
	bus::EventBus,
	changes::ChangeLog,
	context::Context,
	error::{CriticalError, RuntimeError},
	paths::{absolutise, has_glob_syntax},
	pattern::{compile_patterns, MatcherOptions},
	store::Store,
	token::AbortToken,
	watch::{AddFileOptions, WatchRegistry, WatcherMessage},
};

/// What a settled run resolves to: the body's value, or its error (shared
/// with the event bus).
pub type RunResult<T> = Result<T, Arc<RuntimeError>>;

/// The generator body: called once per run with a fresh [`Context`].
pub type GeneratorFn<T> =
	Arc<dyn Fn(Context<T>) -> BoxFuture<'static, Result<T, RuntimeError>> + Send + Sync>;

/// Control messages from the engine handle.
#[derive(Debug)]
pub(crate) enum Control {
	Rerun { ack: oneshot::Sender<()> },
	Destroy { ack: oneshot::Sender<()> },
}

pub(crate) struct Worker<T: Clone + Send + Sync + 'static> {
	pub root: PathBuf,
	pub name: String,
	pub handler: GeneratorFn<T>,
	pub bus: EventBus<T>,
	pub registry: Option<Arc<WatchRegistry>>,
	pub initial: Vec<String>,
	pub events: mpsc::Receiver<WatcherMessage>,
	pub control: mpsc::Receiver<Control>,
	pub status: watch::Sender<RunStatus>,
	pub runs: watch::Sender<u64>,
	pub result: watch::Sender<Option<RunResult<T>>>,
	pub store: Arc<Store>,
}

/// Register the initial watch list: globs go to the pattern registry, plain
/// paths are watched as files. Also re-run after every hard reset.
pub(crate) fn register_initial(
	registry: &WatchRegistry,
	root: &std::path::Path,
	patterns: &[String],
) -> Result<(), RuntimeError> {
	for pattern in patterns {
		if has_glob_syntax(pattern) {
			let matchers = compile_patterns(
				[pattern],
				Vec::<String>::new(),
				root,
				MatcherOptions {
					accept_change_events: true,
					..Default::default()
				},
			)?;
			registry.add_matchers(matchers)?;
		} else {
			let path = absolutise(root, pattern);
			registry.add_file(&path, AddFileOptions::default())?;
		}
	}

	Ok(())
}

impl<T: Clone + Send + Sync + 'static> Worker<T> {
	fn emit_error(&self, error: RuntimeError) {
		self.bus.send(Event::Error {
			error: Arc::new(error),
			name: self.name.clone(),
		});
	}

	/// Fold one watcher message. Returns whether it was relevant, i.e.
	/// whether a rerun is warranted.
	fn ingest(&self, log: &mut ChangeLog, msg: WatcherMessage) -> bool {
		match msg {
			WatcherMessage::Error(error) => {
				self.emit_error(error);
				false
			}
			WatcherMessage::Change { kind, path } => {
				let Some(registry) = &self.registry else {
					return false;
				};

				let mut relevant = false;
				let mut queue = vec![(kind, path)];
				while let Some((kind, path)) = queue.pop() {
					if kind.is_add() {
						// fallback bookkeeping; targets which materialised
						// unseen are owed a synthetic add
						match registry.check_added_path(&path) {
							Ok(appeared) => queue.extend(
								appeared
									.into_iter()
									.map(|p| (regen_events::ChangeKind::Add, p)),
							),
							Err(err) => self.emit_error(err),
						}
					}

					if !registry.is_relevant(&path) {
						trace!(?path, "bookkeeping-only event");
						continue;
					}

					self.bus.send(Event::Watch {
						kind,
						path: path.clone(),
						name: self.name.clone(),
					});

					let causes = registry.causes_of(&path);
					let critical = registry.is_file_critical(&path);
					log.fold(kind, &path, &causes, critical);
					relevant = true;
				}

				relevant
			}
		}
	}

	/// The reset between two runs: hard iff a critical file changed.
	fn reset(&self, log: &mut ChangeLog) -> Result<Vec<Change>, CriticalError> {
		let drained = log.drain(&self.root);

		if let Some(registry) = &self.registry {
			if drained.critical {
				debug!("hard reset: critical file changed");
				self.store.clear();
				registry.reset()?;
				register_initial(registry, &self.root, &self.initial)
					.map_err(CriticalError::InitialWatch)?;
			} else {
				trace!(changes=%drained.raw.len(), "soft reset");
				registry.apply_soft_reset(&drained.raw);
			}
		}

		Ok(drained.reported)
	}

	fn abort(&self, token: &AbortToken, reason: AbortReason) {
		if token.abort(reason) {
			debug!(%reason, "aborting current run");
			self.bus.send(Event::Abort {
				reason,
				name: self.name.clone(),
			});
		}
	}

	fn settle(&self, outcome: Result<T, RuntimeError>) {
		match outcome {
			Ok(value) => {
				self.result.send_replace(Some(Ok(value.clone())));
				self.bus.send(Event::Finish {
					result: value,
					name: self.name.clone(),
				});
			}
			Err(err) if err.is_abort() => {
				// control signal, not a failure
				trace!("body honoured abort");
			}
			Err(err) => {
				let err = Arc::new(err);
				self.result.send_replace(Some(Err(err.clone())));
				let error: Arc<dyn std::error::Error + Send + Sync> = err;
				self.bus.send(Event::Error {
					error,
					name: self.name.clone(),
				});
			}
		}
	}

	fn cleanup(&self) {
		if let Some(registry) = &self.registry {
			registry.close();
		}
		self.status.send_replace(RunStatus::Finished);
		self.bus.send(Event::Destroy {
			name: self.name.clone(),
		});
		debug!("engine destroyed");
	}
}

pub(crate) async fn worker<T: Clone + Send + Sync + 'static>(
	mut w: Worker<T>,
) -> Result<(), CriticalError> {
	if let Some(registry) = &w.registry {
		register_initial(registry, &w.root, &w.initial).map_err(CriticalError::InitialWatch)?;
	}

	// the constructor must return before the first run starts, so callers
	// can subscribe to events in between
	yield_now().await;

	let mut log = ChangeLog::default();
	let mut first = true;
	let mut rerun_acks: Vec<oneshot::Sender<()>> = Vec::new();
	let mut destroy_requested = false;
	let mut destroy_ack: Option<oneshot::Sender<()>> = None;
	let mut control_open = true;
	let mut events_open = true;

	'runs: loop {
		let changes = if first {
			Vec::new()
		} else {
			w.reset(&mut log)?
		};
		first = false;

		let token = AbortToken::new();
		let ctx = Context::new(
			w.root.clone(),
			w.name.clone(),
			w.store.clone(),
			changes,
			token.clone(),
			w.bus.clone(),
			w.registry.clone(),
		);

		w.status.send_replace(RunStatus::Running);
		w.runs.send_modify(|n| *n += 1);
		w.bus.send(Event::Start {
			name: w.name.clone(),
		});
		debug!(run=%*w.runs.borrow(), "run started");
		for ack in rerun_acks.drain(..) {
			ack.send(()).ok();
		}

		let mut body = (w.handler)(ctx);
		let outcome = loop {
			tokio::select! {
				biased;

				res = &mut body => break res,

				ctl = w.control.recv(), if control_open => match ctl {
					Some(Control::Rerun { ack }) => {
						if destroy_requested {
							drop(ack);
						} else {
							rerun_acks.push(ack);
							w.abort(&token, AbortReason::Rerun);
							w.status.send_replace(RunStatus::Pending);
						}
					}
					Some(Control::Destroy { ack }) => {
						destroy_requested = true;
						destroy_ack = Some(ack);
						w.abort(&token, AbortReason::Destroy);
					}
					None => {
						control_open = false;
						destroy_requested = true;
						w.abort(&token, AbortReason::Destroy);
					}
				},

				msg = w.events.recv(), if events_open => match msg {
					Some(msg) => {
						if w.ingest(&mut log, msg) && !destroy_requested && !token.is_aborted() {
							w.abort(&token, AbortReason::Watch);
							w.status.send_replace(RunStatus::Pending);
						}
					}
					None => events_open = false,
				},
			}
		};

		w.settle(outcome);

		if destroy_requested {
			w.cleanup();
			if let Some(ack) = destroy_ack.take() {
				ack.send(()).ok();
			}
			return Ok(());
		}

		if token.is_aborted() || !log.is_empty() {
			// a rerun is already owed
			continue 'runs;
		}

		w.status.send_replace(RunStatus::Finished);
		debug!("run finished, engine idle");

		loop {
			tokio::select! {
				ctl = w.control.recv(), if control_open => match ctl {
					Some(Control::Rerun { ack }) => {
						rerun_acks.push(ack);
						w.status.send_replace(RunStatus::Pending);
						continue 'runs;
					}
					Some(Control::Destroy { ack }) => {
						w.cleanup();
						ack.send(()).ok();
						return Ok(());
					}
					None => {
						w.cleanup();
						return Ok(());
					}
				},

				msg = w.events.recv(), if events_open => match msg {
					Some(msg) => {
						if w.ingest(&mut log, msg) {
							w.status.send_replace(RunStatus::Pending);
							continue 'runs;
						}
					}
					None => events_open = false,
				},
			}
		}
	}
}
