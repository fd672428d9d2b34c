//! Scan counters shared by every location

use super::MonitoringBehavior;
use crate::{
	event::{EventType, FileEvent},
	scanner::FileScanContext,
};

use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct ScanMetrics {
	scans_started: AtomicU64,
	scans_completed: AtomicU64,
	files_added: AtomicU64,
	files_modified: AtomicU64,
	files_deleted: AtomicU64,
	/// Milliseconds
	last_scan_duration: AtomicU64,
	/// Milliseconds
	max_scan_duration: AtomicU64,
}

impl ScanMetrics {
	pub const NAME: &'static str = "scan_metrics";

	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> ScanMetricsSnapshot {
		ScanMetricsSnapshot {
			scans_started: self.scans_started.load(Ordering::Relaxed),
			scans_completed: self.scans_completed.load(Ordering::Relaxed),
			files_added: self.files_added.load(Ordering::Relaxed),
			files_modified: self.files_modified.load(Ordering::Relaxed),
			files_deleted: self.files_deleted.load(Ordering::Relaxed),
			last_scan_duration_ms: self.last_scan_duration.load(Ordering::Relaxed),
			max_scan_duration_ms: self.max_scan_duration.load(Ordering::Relaxed),
		}
	}

	pub fn log_metrics(&self) {
		let snapshot = self.snapshot();
		info!(
			scans_started = snapshot.scans_started,
			scans_completed = snapshot.scans_completed,
			added = snapshot.files_added,
			modified = snapshot.files_modified,
			deleted = snapshot.files_deleted,
			last_scan_ms = snapshot.last_scan_duration_ms,
			max_scan_ms = snapshot.max_scan_duration_ms,
			"Scan metrics"
		);
	}
}

impl MonitoringBehavior for ScanMetrics {
	fn name(&self) -> &str {
		Self::NAME
	}

	fn on_scan_started(&self, ctx: &FileScanContext) {
		self.scans_started.fetch_add(1, Ordering::Relaxed);
		debug!(location = %ctx.location, "Scan started");
	}

	fn on_file_detected(&self, _ctx: &FileScanContext, event: &FileEvent) {
		let counter = match event.event_type {
			EventType::Added => &self.files_added,
			EventType::Modified => &self.files_modified,
			EventType::Deleted => &self.files_deleted,
		};
		counter.fetch_add(1, Ordering::Relaxed);
	}

	fn on_scan_completed(&self, ctx: &FileScanContext, duration: Duration) {
		let duration_ms = duration.as_millis() as u64;

		self.scans_completed.fetch_add(1, Ordering::Relaxed);
		self.last_scan_duration
			.store(duration_ms, Ordering::Relaxed);
		self.max_scan_duration
			.fetch_max(duration_ms, Ordering::Relaxed);

		debug!(
			location = %ctx.location,
			events = ctx.events.len(),
			duration_ms,
			"Scan completed",
		);
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanMetricsSnapshot {
	pub scans_started: u64,
	pub scans_completed: u64,
	pub files_added: u64,
	pub files_modified: u64,
	pub files_deleted: u64,
	pub last_scan_duration_ms: u64,
	pub max_scan_duration_ms: u64,
}
