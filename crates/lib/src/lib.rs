//! Regen: a reactive filesystem access engine for build-time code generators.
//!
//! A generator body reads, scans, writes and probes files through an
//! engine-provided [`Context`]; the engine records every dependency the body
//! observes and, in watch mode, reruns the body automatically when any of
//! them changes. The engine is the sole mediator between generator code and
//! the filesystem, which is what makes the dependency tracking transparent
//! and complete.
//!
//! This library is powered by [Tokio](https://tokio.rs).
//!
//! ```no_run
//! use miette::{IntoDiagnostic, Result};
//! use regen::{fs::ReadOptions, Config, Regen};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = Regen::new(Config::new("/project").watch(true), |ctx| async move {
//!         let manifest = ctx.fs.read_to_string("package.json", ReadOptions::default())?;
//!         ctx.fs.write("out/manifest.txt", manifest)?;
//!         Ok(())
//!     })?;
//!
//!     engine.wait().await.map_err(|e| miette::miette!("{e}"))?;
//!     engine.main().await.into_diagnostic()??;
//!     Ok(())
//! }
//! ```
//!
//! It's recommended to use the [miette] erroring library in applications, but
//! all errors implement [`std::error::Error`] so your favourite error
//! handling library can of course be used.
//!
//! Note that the library generates a _lot_ of debug messaging with [tracing].
//! **You should not enable printing even `error`-level log messages for this
//! crate unless it's for debugging.** Subscribe to `error` events on the
//! engine's bus instead.

#![warn(clippy::unwrap_used, missing_docs)]
#![deny(rust_2018_idioms)]

// the toolkit to make your own
pub mod bus;
pub mod config;
pub mod error;
pub mod fs;
pub mod paths;
pub mod pattern;

// the core experience
mod changes;
mod compose;
mod context;
mod regen;
mod run;
mod store;
mod token;
mod watch;

#[doc(inline)]
pub use crate::{
	compose::{compose, compose_on, Composition, GeneratorSpec},
	context::Context,
	regen::{Regen, WatcherHandle},
	run::{GeneratorFn, RunResult},
	store::Store,
	token::{AbortToken, Aborted},
	watch::WatcherKind,
};

#[doc(no_inline)]
pub use crate::config::{Config, WatchMode};
#[doc(no_inline)]
pub use regen_events as events;
