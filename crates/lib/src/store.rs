//! The per-engine state store.
//!
//! An opaque, string-keyed map the generator owns. The engine never inspects
//! its contents; its only involvement is clearing the map on a hard reset and
//! leaving it alone on a soft one.

use std::{
	any::Any,
	collections::HashMap,
	fmt,
	sync::Mutex,
};

type Value = Box<dyn Any + Send + Sync>;

/// Key-value state preserved across soft resets.
#[derive(Default)]
pub struct Store {
	inner: Mutex<HashMap<String, Value>>,
}

impl Store {
	/// Store a value under a key, replacing any previous value.
	pub fn insert<V: Send + Sync + 'static>(&self, key: impl Into<String>, value: V) {
		self.inner
			.lock()
			.expect("store lock poisoned")
			.insert(key.into(), Box::new(value));
	}

	/// Get a clone of the value under a key, if present and of type `V`.
	#[must_use]
	pub fn get<V: Clone + 'static>(&self, key: &str) -> Option<V> {
		self.inner
			.lock()
			.expect("store lock poisoned")
			.get(key)
			.and_then(|v| v.downcast_ref::<V>())
			.cloned()
	}

	/// Remove a key; returns whether it was present.
	pub fn remove(&self, key: &str) -> bool {
		self.inner
			.lock()
			.expect("store lock poisoned")
			.remove(key)
			.is_some()
	}

	/// Whether a key is present.
	#[must_use]
	pub fn contains(&self, key: &str) -> bool {
		self.inner
			.lock()
			.expect("store lock poisoned")
			.contains_key(key)
	}

	/// Drop every entry. This is what a hard reset does.
	pub fn clear(&self) {
		self.inner.lock().expect("store lock poisoned").clear();
	}

	/// Number of stored entries.
	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.lock().expect("store lock poisoned").len()
	}

	/// Whether the store holds nothing.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl fmt::Debug for Store {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Store")
			.field("len", &self.len())
			.finish_non_exhaustive()
	}
}
