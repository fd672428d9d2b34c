//! Shared fixtures for the integration tests
#![allow(dead_code)]

use filemon_core::{
	error::MonitorError,
	event::{EventType, FileEvent},
	location::{Location, LocationName},
	monitoring::MonitoringBehavior,
	pipeline::{
		Directive, FileProcessor, ProcessingContext, ProcessingFailure, ProcessingResult,
		ProcessorBehavior,
	},
	scanner::FileScanContext,
	storage::{FileReader, MemoryStorage, StorageEntry, StorageError, StorageProvider},
	watch::{WatchProvider, WatchSource},
};
use filemon_fs_watcher::FsEvent;

use std::{
	collections::HashMap,
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
	sync::{mpsc, Notify, Semaphore},
	time::Instant,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `WAIT` elapses
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + WAIT;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	condition()
}

// ============================================================================
// Watcher
// ============================================================================

/// Watch provider fed by hand
#[derive(Default)]
pub struct ChannelWatchProvider {
	senders: Mutex<HashMap<LocationName, mpsc::UnboundedSender<FsEvent>>>,
}

struct ChannelSource(mpsc::UnboundedReceiver<FsEvent>);

#[async_trait]
impl WatchSource for ChannelSource {
	async fn next(&mut self) -> Option<FsEvent> {
		self.0.recv().await
	}
}

impl ChannelWatchProvider {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// `false` when the location isn't subscribed
	pub fn emit(&self, location: &str, event: FsEvent) -> bool {
		self.senders
			.lock()
			.get(location)
			.is_some_and(|tx| tx.send(event).is_ok())
	}

	pub fn is_subscribed(&self, location: &str) -> bool {
		self.senders
			.lock()
			.get(location)
			.is_some_and(|tx| !tx.is_closed())
	}
}

impl WatchProvider for ChannelWatchProvider {
	fn subscribe(&self, location: &Location) -> Result<Box<dyn WatchSource>, MonitorError> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.senders.lock().insert(location.name.clone(), tx);
		Ok(Box::new(ChannelSource(rx)))
	}
}

// ============================================================================
// Storage
// ============================================================================

/// Memory storage whose listing blocks until released
pub struct GatedStorage {
	pub inner: MemoryStorage,
	pub entered: Notify,
	gate: Semaphore,
}

impl GatedStorage {
	pub fn new(root: &str) -> Arc<Self> {
		Arc::new(Self {
			inner: MemoryStorage::new(root),
			entered: Notify::new(),
			gate: Semaphore::new(0),
		})
	}

	pub fn release(&self) {
		self.gate.add_permits(1);
	}
}

#[async_trait]
impl StorageProvider for GatedStorage {
	async fn list(&self) -> Result<Vec<StorageEntry>, StorageError> {
		self.entered.notify_one();
		let permit = self
			.gate
			.acquire()
			.await
			.map_err(|e| StorageError::Unavailable(e.to_string()))?;
		permit.forget();
		self.inner.list().await
	}

	async fn stat(&self, path: &str) -> Result<Option<StorageEntry>, StorageError> {
		self.inner.stat(path).await
	}

	async fn open(&self, path: &str) -> Result<FileReader, StorageError> {
		self.inner.open(path).await
	}

	async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
		self.inner.write(path, data).await
	}

	async fn remove(&self, path: &str) -> Result<(), StorageError> {
		self.inner.remove(path).await
	}

	fn resolve(&self, absolute: &Path) -> Option<String> {
		self.inner.resolve(absolute)
	}
}

/// Memory storage that refuses to read one chosen path
pub struct UnreadableStorage {
	pub inner: MemoryStorage,
	unreadable: Mutex<Option<String>>,
}

impl UnreadableStorage {
	pub fn new(root: &str) -> Arc<Self> {
		Arc::new(Self {
			inner: MemoryStorage::new(root),
			unreadable: Mutex::new(None),
		})
	}

	pub fn set_unreadable(&self, path: Option<&str>) {
		*self.unreadable.lock() = path.map(str::to_string);
	}
}

#[async_trait]
impl StorageProvider for UnreadableStorage {
	async fn list(&self) -> Result<Vec<StorageEntry>, StorageError> {
		self.inner.list().await
	}

	async fn stat(&self, path: &str) -> Result<Option<StorageEntry>, StorageError> {
		self.inner.stat(path).await
	}

	async fn open(&self, path: &str) -> Result<FileReader, StorageError> {
		if self.unreadable.lock().as_deref() == Some(path) {
			return Err(StorageError::Unavailable(format!("cannot read {path}")));
		}
		self.inner.open(path).await
	}

	async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
		self.inner.write(path, data).await
	}

	async fn remove(&self, path: &str) -> Result<(), StorageError> {
		self.inner.remove(path).await
	}

	fn resolve(&self, absolute: &Path) -> Option<String> {
		self.inner.resolve(absolute)
	}
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum FailMode {
	Never,
	Always { retryable: bool },
	/// Fail this many attempts per path, then succeed
	FirstAttempts(usize),
}

#[derive(Debug, Clone)]
pub struct Attempt {
	pub path: String,
	pub event_type: EventType,
	pub at: Instant,
}

/// Terminal processor that records every call
pub struct RecordingProcessor {
	name: String,
	mode: FailMode,
	attempts: Mutex<Vec<Attempt>>,
	failures: Mutex<HashMap<String, usize>>,
}

impl RecordingProcessor {
	pub fn new(name: &str, mode: FailMode) -> Arc<Self> {
		Arc::new(Self {
			name: name.to_string(),
			mode,
			attempts: Mutex::new(Vec::new()),
			failures: Mutex::new(HashMap::new()),
		})
	}

	pub fn succeeding(name: &str) -> Arc<Self> {
		Self::new(name, FailMode::Never)
	}

	pub fn attempts(&self) -> Vec<Attempt> {
		self.attempts.lock().clone()
	}

	pub fn attempt_count(&self) -> usize {
		self.attempts.lock().len()
	}

	pub fn attempts_for(&self, path: &str) -> Vec<Instant> {
		self.attempts
			.lock()
			.iter()
			.filter(|attempt| attempt.path == path)
			.map(|attempt| attempt.at)
			.collect()
	}

	pub fn seen(&self) -> Vec<(String, EventType)> {
		self.attempts
			.lock()
			.iter()
			.map(|attempt| (attempt.path.clone(), attempt.event_type))
			.collect()
	}
}

#[async_trait]
impl FileProcessor for RecordingProcessor {
	fn name(&self) -> &str {
		&self.name
	}

	async fn process(&self, ctx: &mut ProcessingContext) -> ProcessingResult {
		let event = ctx.event();
		self.attempts.lock().push(Attempt {
			path: event.path.clone(),
			event_type: event.event_type,
			at: Instant::now(),
		});

		let fail = match self.mode {
			FailMode::Never => None,
			FailMode::Always { retryable } => Some(retryable),
			FailMode::FirstAttempts(n) => {
				let mut failures = self.failures.lock();
				let count = failures.entry(event.path.clone()).or_default();
				*count += 1;
				(*count <= n).then_some(true)
			}
		};

		match fail {
			None => ProcessingResult::Success,
			Some(true) => ProcessingResult::Failure(ProcessingFailure::retryable("simulated failure")),
			Some(false) => ProcessingResult::Failure(ProcessingFailure::fatal("simulated failure")),
		}
	}
}

/// Behavior recording the hook order, optionally refusing every event
pub struct TracingBehavior {
	name: String,
	pub log: Arc<Mutex<Vec<String>>>,
	refuse: bool,
}

impl TracingBehavior {
	pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>, refuse: bool) -> Arc<Self> {
		Arc::new(Self {
			name: name.to_string(),
			log,
			refuse,
		})
	}
}

#[async_trait]
impl ProcessorBehavior for TracingBehavior {
	fn name(&self) -> &str {
		&self.name
	}

	async fn before_process(&self, _ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure> {
		self.log.lock().push(format!("before:{}", self.name));
		if self.refuse {
			return Err(ProcessingFailure::fatal(format!("{} refused", self.name)));
		}
		Ok(())
	}

	async fn after_process(
		&self,
		_ctx: &mut ProcessingContext,
		_result: &ProcessingResult,
	) -> Directive {
		self.log.lock().push(format!("after:{}", self.name));
		Directive::Proceed
	}
}

// ============================================================================
// Monitoring
// ============================================================================

#[derive(Default)]
pub struct RecordingMonitor {
	pub calls: Mutex<Vec<String>>,
}

impl RecordingMonitor {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}
}

impl MonitoringBehavior for RecordingMonitor {
	fn name(&self) -> &str {
		"recording"
	}

	fn on_scan_started(&self, ctx: &FileScanContext) {
		self.calls.lock().push(format!("started:{}", ctx.location));
	}

	fn on_file_detected(&self, _ctx: &FileScanContext, event: &FileEvent) {
		self.calls
			.lock()
			.push(format!("detected:{}:{}", event.event_type, event.path));
	}

	fn on_scan_completed(&self, ctx: &FileScanContext, _duration: Duration) {
		assert!(ctx.finished_at.is_some());
		self.calls.lock().push(format!("completed:{}", ctx.events.len()));
	}
}

#[derive(Default)]
pub struct PanickingMonitor {
	pub calls: AtomicUsize,
}

impl MonitoringBehavior for PanickingMonitor {
	fn name(&self) -> &str {
		"panicking"
	}

	fn on_file_detected(&self, _ctx: &FileScanContext, _event: &FileEvent) {
		self.calls.fetch_add(1, Ordering::SeqCst);
		panic!("monitor bug");
	}
}
