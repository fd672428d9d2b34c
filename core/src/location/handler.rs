use super::{
	state::{transition, Command, LocationState, Transition},
	EventQueue, IgnoreRules, Location, LocationName, LocationStatus,
};
use crate::{
	baseline::BaselineStore,
	error::MonitorError,
	event::{EventIdentity, EventSource, EventType, FileEvent},
	monitoring::{panic_message, MonitoringBehaviors},
	pipeline::{Pipeline, ProcessingContext, ProcessingMetrics, ProcessorRegistry},
	scanner::{checksum, FileScanContext, ProgressSender, ScanOptions, Scanner},
	storage::{FileIOError, StorageError, StorageProvider},
	watch::{WatchProvider, WatchSource},
};

use std::{
	collections::HashMap,
	panic::AssertUnwindSafe,
	path::Path,
	sync::Arc,
	time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use filemon_fs_watcher::{FsEvent, FsEventKind};
use futures::FutureExt;
use tokio::{
	sync::{watch, Mutex as AsyncMutex},
	task::JoinHandle,
	time::{interval_at, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Everything a handler is built from
pub struct LocationHandlerParts {
	pub location: Location,
	pub storage: Arc<dyn StorageProvider>,
	pub baselines: Arc<dyn BaselineStore>,
	pub registry: Arc<ProcessorRegistry>,
	pub monitors: MonitoringBehaviors,
	/// Only used when the location asks to be watched
	pub watcher: Option<Arc<dyn WatchProvider>>,
}

/// Background tasks of a started handler
struct Running {
	cancel: CancellationToken,
	tasks: Vec<JoinHandle<()>>,
}

struct Inner {
	location: Location,
	storage: Arc<dyn StorageProvider>,
	scanner: Scanner,
	ignore: IgnoreRules,
	queue: EventQueue,
	pipeline: ArcSwap<Pipeline>,
	/// Serializes read-modify-write of the pipeline snapshot
	pipeline_update: parking_lot::Mutex<()>,
	registry: Arc<ProcessorRegistry>,
	monitors: MonitoringBehaviors,
	watcher: Option<Arc<dyn WatchProvider>>,
	state: watch::Sender<LocationState>,
	/// Held for the whole of every lifecycle command
	lifecycle: AsyncMutex<Option<Running>>,
	scan_lock: AsyncMutex<()>,
	/// Identity of the last event enqueued per path, dropped once a deletion
	/// of that path has been processed
	last_enqueued: parking_lot::Mutex<HashMap<String, EventIdentity>>,
	metrics: ProcessingMetrics,
	last_scan: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

/// Drives one location: lifecycle, event queue, watcher and processing loop.
///
/// Cheap to clone; clones share the same handler.
#[derive(Clone)]
pub struct LocationHandler {
	inner: Arc<Inner>,
}

impl LocationHandler {
	pub fn new(
		LocationHandlerParts {
			location,
			storage,
			baselines,
			registry,
			monitors,
			watcher,
		}: LocationHandlerParts,
	) -> Result<Self, MonitorError> {
		let ignore = IgnoreRules::new(&location.ignore)?;
		let enabled = (!location.processors.is_empty()).then_some(location.processors.as_slice());
		let pipeline = registry.build(&location.name, enabled)?;

		let scanner = Scanner::new(
			location.name.clone(),
			Arc::clone(&storage),
			baselines,
			ignore.clone(),
		);

		Ok(Self {
			inner: Arc::new(Inner {
				location,
				storage,
				scanner,
				ignore,
				queue: EventQueue::new(),
				pipeline: ArcSwap::from_pointee(pipeline),
				pipeline_update: parking_lot::Mutex::new(()),
				registry,
				monitors,
				watcher,
				state: watch::Sender::new(LocationState::Stopped),
				lifecycle: AsyncMutex::new(None),
				scan_lock: AsyncMutex::new(()),
				last_enqueued: parking_lot::Mutex::new(HashMap::new()),
				metrics: ProcessingMetrics::new(),
				last_scan: parking_lot::Mutex::new(None),
			}),
		})
	}

	pub fn name(&self) -> &LocationName {
		&self.inner.location.name
	}

	pub fn location(&self) -> &Location {
		&self.inner.location
	}

	pub fn state(&self) -> LocationState {
		self.inner.state()
	}

	/// Follow state changes
	pub fn subscribe_state(&self) -> watch::Receiver<LocationState> {
		self.inner.state.subscribe()
	}

	#[instrument(skip_all, fields(location = %self.inner.location.name))]
	pub async fn start(&self) -> Result<(), MonitorError> {
		let mut running = self.inner.lifecycle.lock().await;
		if !self.inner.apply(Command::Start)? {
			return Ok(());
		}

		let cancel = CancellationToken::new();
		let mut tasks = Vec::with_capacity(3);

		if self.inner.location.watch {
			if let Some(provider) = &self.inner.watcher {
				let source = match provider.subscribe(&self.inner.location) {
					Ok(source) => source,
					Err(e) => {
						self.inner.set_state(LocationState::Stopped);
						return Err(e);
					}
				};
				tasks.push(tokio::spawn(run_watch_loop(
					Arc::clone(&self.inner),
					source,
					cancel.clone(),
				)));
			} else {
				warn!("Location asks to be watched but no watch provider is configured");
			}
		}

		self.inner.queue.set_paused(false);
		tasks.push(tokio::spawn(run_processing_loop(
			Arc::clone(&self.inner),
			cancel.clone(),
		)));

		if let Some(period) = self.inner.location.scan_interval {
			tasks.push(tokio::spawn(run_scan_schedule(
				Arc::clone(&self.inner),
				period,
				cancel.clone(),
			)));
		}

		*running = Some(Running { cancel, tasks });
		self.inner.set_state(LocationState::Active);

		info!(
			root = %self.inner.location.root.display(),
			queued = self.inner.queue.len(),
			"Location started",
		);

		Ok(())
	}

	/// Stop watching and processing.
	///
	/// An event in the middle of a retry wait goes back to the head of the
	/// queue. Queued events are kept for the next start.
	#[instrument(skip_all, fields(location = %self.inner.location.name))]
	pub async fn stop(&self) -> Result<(), MonitorError> {
		let mut running = self.inner.lifecycle.lock().await;
		if !self.inner.apply(Command::Stop)? {
			return Ok(());
		}

		if let Some(Running { cancel, tasks }) = running.take() {
			cancel.cancel();
			for task in tasks {
				if let Err(e) = task.await {
					error!(?e, "Location task failed while stopping");
				}
			}
		}

		self.inner.set_state(LocationState::Stopped);
		self.inner.metrics.log_metrics(&self.inner.location.name);
		info!(queued = self.inner.queue.len(), "Location stopped");

		Ok(())
	}

	pub async fn pause(&self) -> Result<(), MonitorError> {
		let _running = self.inner.lifecycle.lock().await;
		if self.inner.apply(Command::Pause)? {
			self.inner.queue.set_paused(true);
			info!(location = %self.inner.location.name, "Location paused");
		}
		Ok(())
	}

	pub async fn resume(&self) -> Result<(), MonitorError> {
		let _running = self.inner.lifecycle.lock().await;
		if self.inner.apply(Command::Resume)? {
			self.inner.queue.set_paused(false);
			info!(location = %self.inner.location.name, "Location resumed");
		}
		Ok(())
	}

	pub async fn restart(&self) -> Result<(), MonitorError> {
		self.stop().await?;
		self.start().await
	}

	/// Run one scan pass and enqueue what it found.
	///
	/// Allowed in every state but `Stopping`. A scan already running for this
	/// location makes this fail with [`MonitorError::ScanInProgress`].
	#[instrument(skip_all, fields(location = %self.inner.location.name, dry_run = options.dry_run))]
	pub async fn scan(
		&self,
		options: ScanOptions,
		progress: Option<ProgressSender>,
	) -> Result<FileScanContext, MonitorError> {
		self.inner.scan(&options, progress.as_ref()).await
	}

	/// Queue an event unless it repeats the last one queued for its path
	pub fn enqueue(&self, event: FileEvent) -> bool {
		self.inner.enqueue(event)
	}

	pub fn queue_size(&self) -> usize {
		self.inner.queue.len()
	}

	pub async fn wait_for_queue_empty(&self) {
		self.inner.queue.wait_empty().await
	}

	pub fn active_processors(&self) -> Vec<String> {
		self.inner.pipeline.load().names()
	}

	pub fn enable_processor(&self, name: &str) -> Result<(), MonitorError> {
		let _update = self.inner.pipeline_update.lock();
		let current = self.inner.pipeline.load_full();

		if current.contains(name) {
			debug!(location = %self.inner.location.name, processor = name, "Processor already enabled");
			return Ok(());
		}

		if !self.inner.registry.contains(name) {
			return Err(self.inner.processor_not_found(name));
		}

		// Keep the configured order, unlisted processors go last
		let configured = if self.inner.location.processors.is_empty() {
			self.inner.registry.names()
		} else {
			self.inner.location.processors.clone()
		};
		let mut enabled = configured
			.into_iter()
			.filter(|candidate| candidate == name || current.contains(candidate))
			.collect::<Vec<_>>();
		if !enabled.iter().any(|candidate| candidate == name) {
			enabled.push(name.to_string());
		}

		let pipeline = self
			.inner
			.registry
			.build(&self.inner.location.name, Some(&enabled))?;
		self.inner.pipeline.store(Arc::new(pipeline));

		info!(location = %self.inner.location.name, processor = name, "Enabled processor");
		Ok(())
	}

	pub fn disable_processor(&self, name: &str) -> Result<(), MonitorError> {
		let _update = self.inner.pipeline_update.lock();
		let current = self.inner.pipeline.load_full();

		if !current.contains(name) {
			if self.inner.registry.contains(name) {
				debug!(location = %self.inner.location.name, processor = name, "Processor already disabled");
				return Ok(());
			}
			return Err(self.inner.processor_not_found(name));
		}

		self.inner.pipeline.store(Arc::new(current.without(name)));

		info!(location = %self.inner.location.name, processor = name, "Disabled processor");
		Ok(())
	}

	/// Best effort snapshot, never fails
	pub fn status(&self) -> LocationStatus {
		let state = self.state();
		LocationStatus {
			name: self.inner.location.name.clone(),
			state,
			is_active: state == LocationState::Active,
			is_paused: state == LocationState::Paused,
			queue_size: self.inner.queue.len(),
			processors: self.active_processors(),
			last_scan: *self.inner.last_scan.lock(),
			stats: self.inner.metrics.snapshot(),
		}
	}
}

impl Inner {
	fn state(&self) -> LocationState {
		*self.state.borrow()
	}

	fn set_state(&self, state: LocationState) {
		let previous = self.state.send_replace(state);
		trace!(location = %self.location.name, from = %previous, to = %state, "State changed");
	}

	/// Apply a lifecycle command to the state machine.
	///
	/// `Ok(true)` means the caller must carry out the move; for stop and start
	/// the intermediate state has already been entered.
	fn apply(&self, command: Command) -> Result<bool, MonitorError> {
		let state = self.state();
		match transition(state, command) {
			Transition::Move(next) => {
				self.set_state(next);
				Ok(true)
			}
			Transition::NoOp => {
				warn!(location = %self.location.name, %command, %state, "Ignoring lifecycle command");
				Ok(false)
			}
			Transition::Rejected => Err(MonitorError::InvalidTransition {
				location: self.location.name.clone(),
				command,
				state,
			}),
		}
	}

	fn processor_not_found(&self, name: &str) -> MonitorError {
		MonitorError::ProcessorNotFound {
			location: self.location.name.clone(),
			processor: name.to_string(),
		}
	}

	async fn scan(
		&self,
		options: &ScanOptions,
		progress: Option<&ProgressSender>,
	) -> Result<FileScanContext, MonitorError> {
		if self.state() == LocationState::Stopping {
			return Err(MonitorError::LocationStopping(self.location.name.clone()));
		}

		let Ok(_scanning) = self.scan_lock.try_lock() else {
			return Err(MonitorError::ScanInProgress(self.location.name.clone()));
		};

		let mut ctx = FileScanContext::new(self.location.name.clone());
		let started = Instant::now();
		self.monitors.scan_started(&ctx);

		self.scanner.scan(&mut ctx, options, progress).await?;
		ctx.finished_at = Some(Utc::now());

		let mut enqueued = 0;
		for event in &ctx.events {
			self.monitors.file_detected(&ctx, event);
			if !options.dry_run && self.enqueue(event.clone()) {
				enqueued += 1;
			}
		}

		if !options.dry_run {
			*self.last_scan.lock() = ctx.finished_at;
		}

		let duration = started.elapsed();
		self.monitors.scan_completed(&ctx, duration);

		debug!(
			detected = ctx.events.len(),
			enqueued,
			duration_ms = duration.as_millis() as u64,
			"Scan finished",
		);

		Ok(ctx)
	}

	fn enqueue(&self, event: FileEvent) -> bool {
		let identity = event.identity();
		let mut last_enqueued = self.last_enqueued.lock();

		if last_enqueued.get(&event.path) == Some(&identity) {
			debug!(
				location = %self.location.name,
				path = %event.path,
				event_type = %event.event_type,
				source = %event.source,
				"Dropping duplicate event",
			);
			return false;
		}

		last_enqueued.insert(event.path.clone(), identity);
		// Still under the dedup lock, so concurrent producers can't interleave
		self.queue.push(event);

		true
	}

	/// Stop tracking a path whose deletion was the last thing queued for it
	fn forget_processed(&self, event: &FileEvent) {
		if event.event_type != EventType::Deleted {
			return;
		}

		let mut last_enqueued = self.last_enqueued.lock();
		if last_enqueued.get(&event.path) == Some(&event.identity()) {
			last_enqueued.remove(&event.path);
		}
	}

	/// Relative, non-ignored path of a watcher reported path
	fn relative(&self, path: &Path) -> Option<String> {
		let relative = self.storage.resolve(path)?;
		if self.ignore.is_ignored(&relative) {
			trace!(location = %self.location.name, path = %relative, "Ignoring watcher event");
			return None;
		}
		Some(relative)
	}

	/// Turn a watcher event into file events, reading the file where needed
	async fn normalize(&self, event: FsEvent) -> Result<Vec<FileEvent>, MonitorError> {
		let mut events = Vec::with_capacity(2);

		match event.kind {
			FsEventKind::Create => {
				if let Some(path) = self.relative(&event.path) {
					events.extend(self.present(path, true).await?);
				}
			}
			FsEventKind::Modify => {
				if let Some(path) = self.relative(&event.path) {
					events.extend(self.present(path, false).await?);
				}
			}
			FsEventKind::Remove => {
				if let Some(path) = self.relative(&event.path) {
					events.push(FileEvent::deleted(
						self.location.name.clone(),
						path,
						EventSource::Watcher,
					));
				}
			}
			FsEventKind::Rename { from } => {
				if let Some(from) = self.relative(&from) {
					events.push(FileEvent::deleted(
						self.location.name.clone(),
						from,
						EventSource::Watcher,
					));
				}
				if let Some(to) = self.relative(&event.path) {
					events.extend(self.present(to, true).await?);
				}
			}
		}

		Ok(events)
	}

	/// `None` for directories and files that vanished before we got to them
	async fn present(&self, path: String, added: bool) -> Result<Option<FileEvent>, MonitorError> {
		if self.storage.stat(&path).await?.is_none() {
			trace!(location = %self.location.name, %path, "Skipping non-file watcher path");
			return Ok(None);
		}

		let mut reader = match self.storage.open(&path).await {
			Ok(reader) => reader,
			Err(StorageError::NotFound(_)) => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		let fingerprint = checksum::compute(&mut reader)
			.await
			.map_err(|e| StorageError::from(FileIOError::from((&path, e, "Failed to fingerprint file"))))?;

		let name = self.location.name.clone();
		Ok(Some(if added {
			FileEvent::added(name, path, fingerprint, EventSource::Watcher)
		} else {
			FileEvent::modified(name, path, fingerprint, EventSource::Watcher)
		}))
	}
}

async fn run_processing_loop(inner: Arc<Inner>, cancel: CancellationToken) {
	debug!(location = %inner.location.name, "Processing loop started");

	loop {
		let event = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			event = inner.queue.pop() => event,
		};

		// One snapshot per event, toggles only affect the next one
		let pipeline = inner.pipeline.load_full();
		let mut ctx = ProcessingContext::new(event);

		let outcome = AssertUnwindSafe(pipeline.run(&mut ctx, &cancel))
			.catch_unwind()
			.await;

		match outcome {
			Ok(Ok(outcome)) => {
				inner
					.metrics
					.record_outcome(outcome.result.is_success(), outcome.attempts);
				inner.forget_processed(ctx.event());
				inner.queue.complete();
			}
			Ok(Err(_)) => {
				debug!(
					location = %inner.location.name,
					path = %ctx.event().path,
					"Processing interrupted, putting event back",
				);
				inner.queue.requeue_front(ctx.into_event());
				break;
			}
			Err(panic) => {
				error!(
					location = %inner.location.name,
					path = %ctx.event().path,
					panic = panic_message(&panic),
					"Pipeline panicked, dropping event",
				);
				inner.metrics.record_outcome(false, 1);
				inner.forget_processed(ctx.event());
				inner.queue.complete();
			}
		}
	}

	debug!(location = %inner.location.name, "Processing loop stopped");
}

async fn run_watch_loop(
	inner: Arc<Inner>,
	mut source: Box<dyn WatchSource>,
	cancel: CancellationToken,
) {
	loop {
		let event = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			event = source.next() => event,
		};

		let Some(event) = event else {
			warn!(location = %inner.location.name, "Watcher closed");
			break;
		};

		match inner.normalize(event).await {
			Ok(events) => {
				for event in events {
					inner.enqueue(event);
				}
			}
			Err(e) => warn!(location = %inner.location.name, ?e, "Failed to handle watcher event"),
		}
	}

	debug!(location = %inner.location.name, "Watch loop stopped");
}

async fn run_scan_schedule(inner: Arc<Inner>, period: Duration, cancel: CancellationToken) {
	let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {}
		}

		let options = ScanOptions::default().with_cancel(cancel.child_token());
		match inner.scan(&options, None).await {
			Ok(ctx) => trace!(
				location = %inner.location.name,
				events = ctx.events.len(),
				"Scheduled scan done",
			),
			Err(MonitorError::ScanInProgress(_)) => {
				debug!(location = %inner.location.name, "Scan already running, skipping tick");
			}
			Err(MonitorError::Cancelled | MonitorError::LocationStopping(_)) => break,
			Err(e) => error!(location = %inner.location.name, ?e, "Scheduled scan failed"),
		}
	}
}
