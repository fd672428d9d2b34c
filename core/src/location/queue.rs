use crate::event::FileEvent;

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

#[derive(Debug, Default)]
struct QueueState {
	events: VecDeque<FileEvent>,
	in_flight: usize,
	paused: bool,
}

impl QueueState {
	fn pending(&self) -> usize {
		self.events.len() + self.in_flight
	}
}

/// FIFO of detected events for one location.
///
/// Any number of producers push; the single processing loop pops. While
/// paused, pushes still land but `pop` waits. The reported size counts
/// queued and in-flight events, so an empty queue means fully drained.
#[derive(Debug)]
pub struct EventQueue {
	state: Mutex<QueueState>,
	available: Notify,
	size_tx: watch::Sender<usize>,
}

impl EventQueue {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(QueueState::default()),
			available: Notify::new(),
			size_tx: watch::Sender::new(0),
		}
	}

	pub fn push(&self, event: FileEvent) {
		let mut state = self.state.lock();
		state.events.push_back(event);
		self.size_tx.send_replace(state.pending());
		drop(state);

		self.available.notify_one();
	}

	/// Wait for the next event while not paused, marking it in flight.
	///
	/// Cancel safe: an event is only taken inside a single poll.
	pub async fn pop(&self) -> FileEvent {
		loop {
			{
				let mut state = self.state.lock();
				if !state.paused {
					if let Some(event) = state.events.pop_front() {
						state.in_flight += 1;
						return event;
					}
				}
			}

			self.available.notified().await;
		}
	}

	/// Mark the in-flight event as done
	pub fn complete(&self) {
		let mut state = self.state.lock();
		state.in_flight = state.in_flight.saturating_sub(1);
		self.size_tx.send_replace(state.pending());
	}

	/// Put an in-flight event back at the head, ahead of anything queued after it
	pub fn requeue_front(&self, event: FileEvent) {
		let mut state = self.state.lock();
		state.in_flight = state.in_flight.saturating_sub(1);
		state.events.push_front(event);
		self.size_tx.send_replace(state.pending());
		drop(state);

		self.available.notify_one();
	}

	pub fn set_paused(&self, paused: bool) {
		self.state.lock().paused = paused;
		if !paused {
			self.available.notify_one();
		}
	}

	pub fn is_paused(&self) -> bool {
		self.state.lock().paused
	}

	pub fn len(&self) -> usize {
		self.state.lock().pending()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Resolves once nothing is queued or in flight
	pub async fn wait_empty(&self) {
		let mut size_rx = self.size_tx.subscribe();
		// The sender lives as long as `self`, so this can't observe a closed channel
		let _ = size_rx.wait_for(|size| *size == 0).await;
	}
}

impl Default for EventQueue {
	fn default() -> Self {
		Self::new()
	}
}
