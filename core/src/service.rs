//! The monitoring service
//!
//! [`FileMonitoringService`] owns one [`LocationHandler`] per configured
//! location and is the only thing callers talk to. Every location scoped
//! operation goes through [`FileMonitoringService::handler`], so an unknown
//! name fails the same way everywhere.

use crate::{
	baseline::{BaselineStore, MemoryBaselineStore},
	error::MonitorError,
	location::{Location, LocationHandler, LocationHandlerParts, LocationName, LocationStatus},
	monitoring::{MonitoringBehavior, MonitoringBehaviors, ScanMetrics, ScanMetricsSnapshot},
	pipeline::{
		FileProcessor, LoggingBehavior, ProcessorBehavior, ProcessorRegistry, RetryBehavior,
		RetryPolicy,
	},
	scanner::{FileScanContext, ProgressSender, ScanOptions},
	storage::StorageProvider,
	watch::{NotifyWatchProvider, WatchProvider},
};

use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ServiceBuilder {
	locations: Vec<(Location, Arc<dyn StorageProvider>)>,
	baselines: Option<Arc<dyn BaselineStore>>,
	watcher: Option<Arc<dyn WatchProvider>>,
	behaviors: Vec<Arc<dyn ProcessorBehavior>>,
	processors: Vec<Arc<dyn FileProcessor>>,
	monitors: Vec<Arc<dyn MonitoringBehavior>>,
	retry: RetryPolicy,
	builtin_behaviors: bool,
}

impl Default for ServiceBuilder {
	fn default() -> Self {
		Self {
			locations: Vec::new(),
			baselines: None,
			watcher: None,
			behaviors: Vec::new(),
			processors: Vec::new(),
			monitors: Vec::new(),
			retry: RetryPolicy::default(),
			builtin_behaviors: true,
		}
	}
}

impl ServiceBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn location(mut self, location: Location, storage: Arc<dyn StorageProvider>) -> Self {
		self.locations.push((location, storage));
		self
	}

	/// Defaults to an in-memory store
	pub fn baseline_store(mut self, baselines: Arc<dyn BaselineStore>) -> Self {
		self.baselines = Some(baselines);
		self
	}

	/// Defaults to the `notify` backed watcher
	pub fn watch_provider(mut self, watcher: Arc<dyn WatchProvider>) -> Self {
		self.watcher = Some(watcher);
		self
	}

	/// Registered after the built-in logging and retry behaviors
	pub fn behavior(mut self, behavior: Arc<dyn ProcessorBehavior>) -> Self {
		self.behaviors.push(behavior);
		self
	}

	pub fn processor(mut self, processor: Arc<dyn FileProcessor>) -> Self {
		self.processors.push(processor);
		self
	}

	pub fn monitoring_behavior(mut self, monitor: Arc<dyn MonitoringBehavior>) -> Self {
		self.monitors.push(monitor);
		self
	}

	pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	/// Leave out the logging and retry behaviors
	pub fn without_builtin_behaviors(mut self) -> Self {
		self.builtin_behaviors = false;
		self
	}

	pub fn build(self) -> Result<FileMonitoringService, MonitorError> {
		let mut registry = ProcessorRegistry::new();
		if self.builtin_behaviors {
			registry.register_behavior(Arc::new(LoggingBehavior));
			registry.register_behavior(Arc::new(RetryBehavior::new(self.retry)));
		}
		for behavior in self.behaviors {
			registry.register_behavior(behavior);
		}
		for processor in self.processors {
			registry.register_processor(processor);
		}
		let registry = Arc::new(registry);

		let scan_metrics = Arc::new(ScanMetrics::new());
		let monitors = MonitoringBehaviors::new(
			std::iter::once(Arc::clone(&scan_metrics) as Arc<dyn MonitoringBehavior>)
				.chain(self.monitors)
				.collect(),
		);

		let baselines = self
			.baselines
			.unwrap_or_else(|| Arc::new(MemoryBaselineStore::new()));
		let watcher = self
			.watcher
			.unwrap_or_else(|| Arc::new(NotifyWatchProvider::default()));

		let mut handlers = HashMap::with_capacity(self.locations.len());
		for (location, storage) in self.locations {
			if handlers.contains_key(&location.name) {
				return Err(MonitorError::DuplicateLocation(location.name));
			}

			let handler = LocationHandler::new(LocationHandlerParts {
				location,
				storage,
				baselines: Arc::clone(&baselines),
				registry: Arc::clone(&registry),
				monitors: monitors.clone(),
				watcher: Some(Arc::clone(&watcher)),
			})?;
			handlers.insert(handler.name().clone(), handler);
		}

		Ok(FileMonitoringService {
			handlers,
			scan_metrics,
			running: AtomicBool::new(false),
			shutdown: Mutex::new(CancellationToken::new()),
		})
	}
}

pub struct FileMonitoringService {
	handlers: HashMap<LocationName, LocationHandler>,
	scan_metrics: Arc<ScanMetrics>,
	running: AtomicBool,
	/// Cancelled by `stop`, replaced by `start`
	shutdown: Mutex<CancellationToken>,
}

impl FileMonitoringService {
	pub fn builder() -> ServiceBuilder {
		ServiceBuilder::new()
	}

	pub fn handler(&self, name: &str) -> Result<&LocationHandler, MonitorError> {
		self.handlers
			.get(name)
			.ok_or_else(|| MonitorError::LocationNotFound(LocationName::from(name)))
	}

	pub fn location_names(&self) -> Vec<LocationName> {
		let mut names = self.handlers.keys().cloned().collect::<Vec<_>>();
		names.sort();
		names
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	/// Start every location. A location that fails to start is logged and
	/// left stopped, which shows up as unhealthy.
	pub async fn start(&self) -> Result<(), MonitorError> {
		if self.running.swap(true, Ordering::AcqRel) {
			info!("Monitoring service already started");
			return Ok(());
		}

		{
			let mut shutdown = self.shutdown.lock();
			if shutdown.is_cancelled() {
				*shutdown = CancellationToken::new();
			}
		}

		info!(locations = self.handlers.len(), "Starting monitoring service");

		let results = join_all(self.handlers.values().map(|handler| async move {
			(handler.name().clone(), handler.start().await)
		}))
		.await;

		for (name, result) in results {
			if let Err(e) = result {
				error!(location = %name, ?e, "Failed to start location");
			}
		}

		Ok(())
	}

	pub async fn stop(&self) -> Result<(), MonitorError> {
		if !self.running.swap(false, Ordering::AcqRel) {
			info!("Monitoring service already stopped");
			return Ok(());
		}

		info!("Stopping monitoring service");
		self.shutdown.lock().cancel();

		let results = join_all(self.handlers.values().map(|handler| async move {
			(handler.name().clone(), handler.stop().await)
		}))
		.await;

		for (name, result) in results {
			if let Err(e) = result {
				error!(location = %name, ?e, "Failed to stop location");
			}
		}

		self.scan_metrics.log_metrics();

		Ok(())
	}

	pub async fn scan_location(
		&self,
		name: &str,
		options: ScanOptions,
		progress: Option<ProgressSender>,
	) -> Result<FileScanContext, MonitorError> {
		self.handler(name)?.scan(options, progress).await
	}

	pub async fn pause_location(&self, name: &str) -> Result<(), MonitorError> {
		self.handler(name)?.pause().await
	}

	pub async fn resume_location(&self, name: &str) -> Result<(), MonitorError> {
		self.handler(name)?.resume().await
	}

	pub async fn restart_location(&self, name: &str) -> Result<(), MonitorError> {
		self.handler(name)?.restart().await
	}

	pub async fn location_status(&self, name: &str) -> Result<LocationStatus, MonitorError> {
		Ok(self.handler(name)?.status())
	}

	pub async fn all_location_status(&self) -> BTreeMap<LocationName, LocationStatus> {
		self.handlers
			.iter()
			.map(|(name, handler)| (name.clone(), handler.status()))
			.collect()
	}

	pub async fn is_location_active(&self, name: &str) -> Result<bool, MonitorError> {
		Ok(self.handler(name)?.status().is_active)
	}

	/// Every location is either active or paused
	pub async fn is_healthy(&self) -> bool {
		let unhealthy = self
			.handlers
			.values()
			.map(LocationHandler::status)
			.filter(|status| !status.is_healthy())
			.map(|status| status.name)
			.collect::<Vec<_>>();

		if !unhealthy.is_empty() {
			debug!(?unhealthy, "Unhealthy locations");
		}

		unhealthy.is_empty()
	}

	/// Queued plus in-flight events across all locations
	pub fn queue_size(&self) -> usize {
		self.handlers.values().map(LocationHandler::queue_size).sum()
	}

	pub async fn is_queue_empty(&self) -> bool {
		self.queue_size() == 0
	}

	/// Wait until every location's queue is empty at the same time.
	///
	/// Fails with [`MonitorError::Timeout`] once `timeout` elapses and with
	/// [`MonitorError::Cancelled`] if the service is stopped meanwhile.
	pub async fn wait_for_queue_empty(&self, timeout: Duration) -> Result<(), MonitorError> {
		if self.queue_size() == 0 {
			return Ok(());
		}

		let shutdown = self.shutdown.lock().clone();
		let drained = async {
			// A location may refill while another one drains
			while self.queue_size() != 0 {
				join_all(self.handlers.values().map(LocationHandler::wait_for_queue_empty)).await;
			}
		};

		tokio::select! {
			_ = shutdown.cancelled() => Err(MonitorError::Cancelled),
			res = tokio::time::timeout(timeout, drained) => res.map_err(|_| {
				warn!(?timeout, pending = self.queue_size(), "Timed out waiting for queues to drain");
				MonitorError::Timeout(timeout)
			}),
		}
	}

	pub async fn active_processors(&self, name: &str) -> Result<Vec<String>, MonitorError> {
		Ok(self.handler(name)?.active_processors())
	}

	pub async fn enable_processor(&self, name: &str, processor: &str) -> Result<(), MonitorError> {
		self.handler(name)?.enable_processor(processor)
	}

	pub async fn disable_processor(&self, name: &str, processor: &str) -> Result<(), MonitorError> {
		self.handler(name)?.disable_processor(processor)
	}

	pub fn scan_metrics(&self) -> ScanMetricsSnapshot {
		self.scan_metrics.snapshot()
	}
}
