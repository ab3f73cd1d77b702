// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A counting rendezvous between producers of engine events and a consumer that needs to wait
//! until a given number of them have arrived.

use tokio::sync::Notify;

use std::sync::Mutex;

struct TrackerState<E> {
	events: Vec<E>,
	count: usize,
	preloaded: bool,
}

/// Buffers events handed over by producers and lets a consumer block until a threshold number
/// of them has been added, then drain them.
///
/// The count is monotonic: it counts every event ever added and is not reset by
/// [`get_and_clear_events`]. Waiters should therefore compute their threshold relative to
/// [`get_count`] taken *before* they trigger whatever produces the events.
///
/// The tracker also carries a one-shot "preloaded" flag which flips from `false` to `true`
/// exactly once, see [`preload`].
///
/// [`get_and_clear_events`]: Self::get_and_clear_events
/// [`get_count`]: Self::get_count
/// [`preload`]: Self::preload
pub struct PendingEventTracker<E> {
	state: Mutex<TrackerState<E>>,
	added: Notify,
}

impl<E> PendingEventTracker<E> {
	/// Creates an empty tracker which has not been preloaded.
	pub fn new() -> Self {
		Self {
			state: Mutex::new(TrackerState { events: Vec::new(), count: 0, preloaded: false }),
			added: Notify::new(),
		}
	}

	/// Sets the preloaded flag, returning its previous value. A caller seeing `true` must skip
	/// whatever one-time work the flag guards.
	pub fn preload(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		let was_preloaded = state.preloaded;
		state.preloaded = true;
		was_preloaded
	}

	/// Returns whether [`preload`](Self::preload) has been called.
	pub fn is_preloaded(&self) -> bool {
		self.state.lock().unwrap().preloaded
	}

	/// Appends `events` to the buffer, bumps the count and wakes every waiter.
	pub fn add_events(&self, events: Vec<E>) {
		{
			let mut state = self.state.lock().unwrap();
			state.count += events.len();
			state.events.extend(events);
		}
		self.added.notify_waiters();
	}

	/// Suspends until the next call to [`add_events`](Self::add_events).
	pub async fn await_addition(&self) {
		self.added.notified().await
	}

	/// Returns the number of events added since creation.
	pub fn get_count(&self) -> usize {
		self.state.lock().unwrap().count
	}

	/// Takes every buffered event, leaving the buffer empty.
	pub fn get_and_clear_events(&self) -> Vec<E> {
		core::mem::take(&mut self.state.lock().unwrap().events)
	}

	/// Waits until the count reaches `expected`, then drains the buffer.
	///
	/// Registration for the wakeup happens before the count is checked, so an
	/// [`add_events`](Self::add_events) racing with the check is never missed.
	pub async fn await_events(&self, expected: usize) -> Vec<E> {
		loop {
			let mut notified = std::pin::pin!(self.added.notified());
			notified.as_mut().enable();
			if self.get_count() >= expected {
				return self.get_and_clear_events();
			}
			notified.await;
		}
	}
}

impl<E> Default for PendingEventTracker<E> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::sync::Arc;
	use std::time::Duration;

	#[test]
	fn preload_flips_exactly_once() {
		let tracker = PendingEventTracker::<u32>::new();
		assert!(!tracker.is_preloaded());
		assert!(!tracker.preload());
		assert!(tracker.is_preloaded());
		assert!(tracker.preload());
		assert!(tracker.preload());
	}

	#[test]
	fn count_survives_clearing() {
		let tracker = PendingEventTracker::new();
		tracker.add_events(vec![1, 2]);
		assert_eq!(tracker.get_count(), 2);
		assert_eq!(tracker.get_and_clear_events(), vec![1, 2]);
		assert!(tracker.get_and_clear_events().is_empty());
		assert_eq!(tracker.get_count(), 2);

		tracker.add_events(vec![3]);
		assert_eq!(tracker.get_count(), 3);
		assert_eq!(tracker.get_and_clear_events(), vec![3]);
	}

	#[tokio::test]
	async fn await_events_returns_immediately_when_threshold_met() {
		let tracker = PendingEventTracker::new();
		tracker.add_events(vec!["a"]);
		let events = tracker.await_events(1).await;
		assert_eq!(events, vec!["a"]);
	}

	#[tokio::test]
	async fn await_addition_wakes_on_next_add() {
		let tracker = Arc::new(PendingEventTracker::new());
		let waiter = {
			let tracker = Arc::clone(&tracker);
			tokio::spawn(async move {
				tracker.await_addition().await;
				tracker.get_count()
			})
		};
		tokio::time::sleep(Duration::from_millis(20)).await;
		tracker.add_events(vec![7u8]);
		let count = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
		assert_eq!(count, 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn threshold_releases_only_at_expected_count() {
		let tracker = Arc::new(PendingEventTracker::new());
		let expected = 40;

		let waiter = {
			let tracker = Arc::clone(&tracker);
			tokio::spawn(async move {
				let events = tracker.await_events(expected).await;
				(tracker.get_count(), events.len())
			})
		};

		let mut producers = Vec::new();
		for p in 0..4usize {
			let tracker = Arc::clone(&tracker);
			producers.push(tokio::spawn(async move {
				for i in 0..10usize {
					tracker.add_events(vec![p * 100 + i]);
					tokio::task::yield_now().await;
				}
			}));
		}
		for producer in producers {
			producer.await.unwrap();
		}

		let (count_at_release, drained) =
			tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
		assert!(count_at_release >= expected);
		assert!(drained >= 1);
		assert_eq!(tracker.get_count(), expected);
	}

	#[tokio::test]
	async fn threshold_not_released_early() {
		let tracker = Arc::new(PendingEventTracker::new());
		let waiter = {
			let tracker = Arc::clone(&tracker);
			tokio::spawn(async move { tracker.await_events(3).await })
		};

		tracker.add_events(vec![1]);
		tracker.add_events(vec![2]);
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!waiter.is_finished());

		tracker.add_events(vec![3]);
		let events = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
		assert_eq!(events, vec![1, 2, 3]);
	}
}
