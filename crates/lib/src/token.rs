//! The per-run cancellation token.
//!
//! A fresh token is installed before every run; it is aborted at most once,
//! with a reason, and stays aborted. Generator bodies receive it as
//! `ctx.signal` and may await [`AbortToken::aborted`] (or poll
//! [`AbortToken::check`] between steps) to honour cancellation. The wakeup
//! mechanics follow [`futures::task::AtomicWaker`].

use std::{
	future::Future,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering::Relaxed},
		Arc, OnceLock,
	},
	task::{Context, Poll},
};

use futures::task::AtomicWaker;
use regen_events::AbortReason;

use crate::error::RuntimeError;

#[derive(Debug)]
struct Inner {
	waker: AtomicWaker,
	fired: AtomicBool,
	reason: OnceLock<AbortReason>,
}

/// A cancellation token with an abort reason.
#[derive(Clone, Debug, Default)]
pub struct AbortToken(Arc<Inner>);

impl Default for Inner {
	fn default() -> Self {
		Self {
			waker: AtomicWaker::new(),
			fired: AtomicBool::new(false),
			reason: OnceLock::new(),
		}
	}
}

impl AbortToken {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Abort, recording the reason. The first reason wins; returns whether
	/// this call was the one that aborted.
	pub(crate) fn abort(&self, reason: AbortReason) -> bool {
		let first = self.0.reason.set(reason).is_ok();
		self.0.fired.store(true, Relaxed);
		self.0.waker.wake();
		first
	}

	/// Whether the token has fired.
	#[must_use]
	pub fn is_aborted(&self) -> bool {
		self.0.fired.load(Relaxed)
	}

	/// The abort reason, if the token has fired.
	#[must_use]
	pub fn reason(&self) -> Option<AbortReason> {
		self.0.reason.get().copied()
	}

	/// `Err(RuntimeError::Aborted)` once the token has fired.
	///
	/// Sprinkle `ctx.signal.check()?` through a body to make long synchronous
	/// stretches cancellable.
	pub fn check(&self) -> Result<(), RuntimeError> {
		if self.is_aborted() {
			Err(RuntimeError::Aborted {
				reason: self.reason().unwrap_or(AbortReason::Watch),
			})
		} else {
			Ok(())
		}
	}

	/// Resolves once the token fires.
	pub fn aborted(&self) -> Aborted {
		Aborted(self.clone())
	}
}

/// Future returned by [`AbortToken::aborted`].
#[derive(Debug)]
pub struct Aborted(AbortToken);

impl Future for Aborted {
	type Output = AbortReason;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let inner = &self.0 .0;

		// quick check to avoid registration if already fired
		if inner.fired.load(Relaxed) {
			return Poll::Ready(inner.reason.get().copied().unwrap_or(AbortReason::Watch));
		}

		inner.waker.register(cx.waker());

		// re-check after register, else a wake between the check and the
		// registration is lost
		if inner.fired.load(Relaxed) {
			Poll::Ready(inner.reason.get().copied().unwrap_or(AbortReason::Watch))
		} else {
			Poll::Pending
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_reason_wins() {
		let token = AbortToken::new();
		assert!(!token.is_aborted());
		assert!(token.abort(AbortReason::Rerun));
		assert!(!token.abort(AbortReason::Destroy));
		assert_eq!(token.reason(), Some(AbortReason::Rerun));
		assert!(token.check().is_err());
	}

	#[tokio::test]
	async fn aborted_future_resolves() {
		let token = AbortToken::new();
		let waiter = token.clone();
		let task = tokio::spawn(async move { waiter.aborted().await });
		token.abort(AbortReason::Destroy);
		assert_eq!(task.await.expect("join"), AbortReason::Destroy);
	}
}
