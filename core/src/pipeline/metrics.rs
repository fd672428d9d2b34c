//! Processing counters of a location

use crate::location::LocationName;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

#[derive(Debug, Default)]
pub struct ProcessingMetrics {
	/// Events whose pipeline run ended in success
	processed: AtomicU64,
	/// Events whose pipeline run ended in failure, after retries
	failed: AtomicU64,
	/// Extra attempts spent on retries
	retried: AtomicU64,
	/// Most attempts any single event needed
	max_attempts: AtomicU64,
}

impl ProcessingMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_outcome(&self, success: bool, attempts: u32) {
		if success {
			self.processed.fetch_add(1, Ordering::Relaxed);
		} else {
			self.failed.fetch_add(1, Ordering::Relaxed);
		}

		let attempts = u64::from(attempts);
		self.retried
			.fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
		self.max_attempts.fetch_max(attempts, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> ProcessingStats {
		ProcessingStats {
			processed: self.processed.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			retried: self.retried.load(Ordering::Relaxed),
			max_attempts: self.max_attempts.load(Ordering::Relaxed),
		}
	}

	pub fn log_metrics(&self, location: &LocationName) {
		let stats = self.snapshot();
		info!(
			%location,
			processed = stats.processed,
			failed = stats.failed,
			retried = stats.retried,
			max_attempts = stats.max_attempts,
			"Processing metrics"
		);
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
	pub processed: u64,
	pub failed: u64,
	pub retried: u64,
	pub max_attempts: u64,
}
