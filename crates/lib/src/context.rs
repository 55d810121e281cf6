//! The context handed to each run of the generator body.

use std::{path::PathBuf, sync::Arc};

use regen_events::{Change, Event};

use crate::{bus::EventBus, fs::ContextFs, store::Store, token::AbortToken, watch::WatchRegistry};

/// Everything a generator body gets to work with.
///
/// A fresh `Context` is built for every run: `changes` and `signal` are
/// per-run, `store` survives soft resets, and `fs` is the sole sanctioned way
/// to touch the filesystem (dependency tracking happens in there).
#[derive(Clone, Debug)]
pub struct Context<T: Clone> {
	/// Absolute engine root.
	pub root: PathBuf,

	/// The engine's name.
	pub name: String,

	/// User-owned state, preserved across soft resets, cleared on hard reset.
	pub store: Arc<Store>,

	/// The folded changes observed since the previous run's start. Empty on
	/// the first run and after a hard reset.
	pub changes: Arc<Vec<Change>>,

	/// This run's cancellation token.
	pub signal: AbortToken,

	/// The filesystem facade.
	pub fs: ContextFs<T>,

	bus: EventBus<T>,
	registry: Option<Arc<WatchRegistry>>,
}

impl<T: Clone> Context<T> {
	pub(crate) fn new(
		root: PathBuf,
		name: String,
		store: Arc<Store>,
		changes: Vec<Change>,
		signal: AbortToken,
		bus: EventBus<T>,
		registry: Option<Arc<WatchRegistry>>,
	) -> Self {
		let fs = ContextFs::new(root.clone(), name.clone(), registry.clone(), bus.clone());
		Self {
			root,
			name,
			store,
			changes: Arc::new(changes),
			signal,
			fs,
			bus,
			registry,
		}
	}

	/// Emit a custom event on the engine's event bus.
	pub fn emit(&self, event: impl Into<String>) {
		self.bus.send(Event::Custom {
			event: event.into(),
			name: self.name.clone(),
		});
	}

	/// The engine's event bus.
	#[must_use]
	pub fn events(&self) -> &EventBus<T> {
		&self.bus
	}

	/// Whether this engine watches at all.
	#[must_use]
	pub fn watching(&self) -> bool {
		self.registry.is_some()
	}
}
