//! Scan lifecycle observers
//!
//! Monitoring behaviors are process-wide and see every location's scans.
//! They are plain synchronous callbacks; a panicking observer is logged and
//! skipped so it can't abort the scan or starve the other observers.

mod metrics;

pub use metrics::{ScanMetrics, ScanMetricsSnapshot};

use crate::{event::FileEvent, scanner::FileScanContext};

use std::{
	any::Any,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
	time::Duration,
};

use tracing::error;

pub trait MonitoringBehavior: Send + Sync {
	fn name(&self) -> &str;

	fn on_scan_started(&self, _ctx: &FileScanContext) {}

	/// Called once per detected event, before it is enqueued
	fn on_file_detected(&self, _ctx: &FileScanContext, _event: &FileEvent) {}

	fn on_scan_completed(&self, _ctx: &FileScanContext, _duration: Duration) {}
}

#[derive(Clone, Default)]
pub struct MonitoringBehaviors {
	behaviors: Vec<Arc<dyn MonitoringBehavior>>,
}

impl MonitoringBehaviors {
	pub fn new(behaviors: Vec<Arc<dyn MonitoringBehavior>>) -> Self {
		Self { behaviors }
	}

	pub fn len(&self) -> usize {
		self.behaviors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.behaviors.is_empty()
	}

	pub fn scan_started(&self, ctx: &FileScanContext) {
		self.notify("on_scan_started", |behavior| behavior.on_scan_started(ctx));
	}

	pub fn file_detected(&self, ctx: &FileScanContext, event: &FileEvent) {
		self.notify("on_file_detected", |behavior| {
			behavior.on_file_detected(ctx, event)
		});
	}

	pub fn scan_completed(&self, ctx: &FileScanContext, duration: Duration) {
		self.notify("on_scan_completed", |behavior| {
			behavior.on_scan_completed(ctx, duration)
		});
	}

	fn notify(&self, hook: &str, call: impl Fn(&dyn MonitoringBehavior)) {
		for behavior in &self.behaviors {
			if let Err(panic) = catch_unwind(AssertUnwindSafe(|| call(behavior.as_ref()))) {
				error!(
					behavior = behavior.name(),
					hook,
					panic = panic_message(&panic),
					"Monitoring behavior panicked",
				);
			}
		}
	}
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
	panic
		.downcast_ref::<&str>()
		.copied()
		.or_else(|| panic.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("<non-string panic payload>")
}
