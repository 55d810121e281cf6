//! Parallel composition of engines over a shared event bus.
//!
//! Children run concurrently (cooperatively: each is its own worker task) and
//! publish onto one bus, distinguished by name. Per-child event ordering is
//! preserved; cross-child ordering is only partial.

use std::{future::Future, path::PathBuf, sync::Arc};

use futures::{future::try_join_all, FutureExt};
use regen_events::RunStatus;
use tracing::debug;

use crate::{
	bus::EventBus,
	config::Config,
	context::Context,
	error::{CriticalError, RuntimeError},
	run::{GeneratorFn, RunResult},
	Regen,
};

/// A child engine waiting to be composed: its configuration and its body.
pub struct GeneratorSpec<T: Clone + Send + Sync + 'static> {
	config: Config,
	handler: GeneratorFn<T>,
}

impl<T: Clone + Send + Sync + 'static> GeneratorSpec<T> {
	/// Pair a configuration with a generator body.
	pub fn new<F, Fut>(config: Config, body: F) -> Self
	where
		F: Fn(Context<T>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
	{
		Self {
			config,
			handler: Arc::new(move |ctx| body(ctx).boxed()),
		}
	}
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for GeneratorSpec<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GeneratorSpec")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

/// Build and start every child on a fresh shared bus.
pub fn compose<T: Clone + Send + Sync + 'static>(
	specs: impl IntoIterator<Item = GeneratorSpec<T>>,
) -> Result<Composition<T>, CriticalError> {
	compose_on(EventBus::default(), specs)
}

/// Build and start every child on the given bus.
pub fn compose_on<T: Clone + Send + Sync + 'static>(
	bus: EventBus<T>,
	specs: impl IntoIterator<Item = GeneratorSpec<T>>,
) -> Result<Composition<T>, CriticalError> {
	let children = specs
		.into_iter()
		.map(|spec| Regen::from_parts(spec.config, bus.clone(), spec.handler))
		.collect::<Result<Vec<_>, _>>()?;

	debug!(children=%children.len(), "composed engines");
	Ok(Composition { bus, children })
}

/// A set of engines running side by side on one bus.
#[derive(Debug)]
pub struct Composition<T: Clone + Send + Sync + 'static> {
	bus: EventBus<T>,
	children: Vec<Arc<Regen<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Composition<T> {
	/// The shared event bus.
	#[must_use]
	pub fn events(&self) -> &EventBus<T> {
		&self.bus
	}

	/// The child engines, in composition order.
	#[must_use]
	pub fn children(&self) -> &[Arc<Regen<T>>] {
		&self.children
	}

	/// Aggregate status: `Running` if any child is, else `Pending` if any
	/// is, else `Finished`.
	#[must_use]
	pub fn status(&self) -> RunStatus {
		let statuses: Vec<RunStatus> = self.children.iter().map(|c| c.status()).collect();
		if statuses.contains(&RunStatus::Running) {
			RunStatus::Running
		} else if statuses.contains(&RunStatus::Pending) {
			RunStatus::Pending
		} else {
			RunStatus::Finished
		}
	}

	/// Wait for every child to settle; results come back in child order.
	/// The first erroring child short-circuits.
	pub async fn wait(&self) -> RunResult<Vec<T>> {
		let mut results = Vec::with_capacity(self.children.len());
		for child in &self.children {
			results.push(child.wait().await?);
		}
		Ok(results)
	}

	/// Rerun every child.
	pub async fn rerun(&self) -> Result<(), CriticalError> {
		try_join_all(self.children.iter().map(|c| c.rerun()))
			.await
			.map(drop)
	}

	/// Destroy every child.
	pub async fn destroy(&self) -> Result<(), CriticalError> {
		try_join_all(self.children.iter().map(|c| c.destroy()))
			.await
			.map(drop)
	}

	/// Union of the children's watched files, sorted.
	#[must_use]
	pub fn watched_files(&self) -> Vec<PathBuf> {
		let mut files: Vec<PathBuf> = self
			.children
			.iter()
			.filter_map(|c| c.watcher())
			.flat_map(|w| w.watched_files())
			.collect();
		files.sort();
		files.dedup();
		files
	}

	/// Union of the children's blame mappings; cause sets for the same path
	/// are merged in child order.
	#[must_use]
	pub fn blamed_files(&self) -> Vec<(PathBuf, Vec<PathBuf>)> {
		let mut merged: Vec<(PathBuf, Vec<PathBuf>)> = Vec::new();
		for (path, causes) in self
			.children
			.iter()
			.filter_map(|c| c.watcher())
			.flat_map(|w| w.blamed_files())
		{
			match merged.iter_mut().find(|(p, _)| *p == path) {
				Some((_, existing)) => {
					for cause in causes {
						if !existing.contains(&cause) {
							existing.push(cause);
						}
					}
				}
				None => merged.push((path, causes)),
			}
		}
		merged.sort_by(|a, b| a.0.cmp(&b.0));
		merged
	}
}
