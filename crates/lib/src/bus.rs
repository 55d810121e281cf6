//! The typed event bus.
//!
//! A thin wrapper over a broadcast channel: the engine publishes lifecycle
//! events, any number of subscribers consume them. A bus can be shared across
//! engines (that is what [`compose`](crate::compose()) does), in which case
//! the `name` on each event tells the children apart. Sending never blocks
//! and never fails; events published with no subscribers are simply dropped.

use regen_events::Event;
use tokio::sync::broadcast;
use tracing::trace;

/// A shareable, typed event emitter.
#[derive(Debug)]
pub struct EventBus<T> {
	sender: broadcast::Sender<Event<T>>,
}

impl<T: Clone> EventBus<T> {
	/// Create a bus with the given buffer capacity.
	///
	/// Slow subscribers that fall more than `capacity` events behind skip
	/// ahead and observe a [`broadcast::error::RecvError::Lagged`].
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Subscribe to events published from now on.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<Event<T>> {
		self.sender.subscribe()
	}

	/// Publish an event.
	pub fn send(&self, event: Event<T>) {
		trace!(%event, "publishing event");
		// a send error only means nobody is listening
		self.sender.send(event).ok();
	}

	/// How many subscribers are listening.
	#[must_use]
	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl<T> Clone for EventBus<T> {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}

impl<T: Clone> Default for EventBus<T> {
	fn default() -> Self {
		Self::new(1024)
	}
}
