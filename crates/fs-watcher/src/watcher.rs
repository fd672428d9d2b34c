use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{
	sync::{mpsc, oneshot},
	time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, warn};

use crate::{
	event::{FsEvent, RawNotifyEvent},
	handler::{EventHandler, StabilizingHandler},
	Error, Result,
};

#[derive(Debug, Clone)]
pub struct WatcherConfig {
	/// How long a path must stay quiet before its create/modify is released
	pub stabilization: Duration,
	/// How often buffered events are checked for release
	pub tick_interval: Duration,
	/// Capacity of the channel towards the consumer
	pub buffer_size: usize,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			stabilization: Duration::from_millis(100),
			tick_interval: Duration::from_millis(50),
			buffer_size: 1024,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct FsWatcher {
	config: WatcherConfig,
}

impl FsWatcher {
	pub fn new(config: WatcherConfig) -> Self {
		Self { config }
	}

	pub fn config(&self) -> &WatcherConfig {
		&self.config
	}

	/// Start watching `root` recursively.
	///
	/// Must be called from within a tokio runtime. Watching stops when the
	/// returned handle is dropped.
	pub fn watch(&self, root: impl AsRef<Path>) -> Result<WatchHandle> {
		let root = root.as_ref();
		if !root.exists() {
			return Err(Error::RootNotFound(root.to_path_buf()));
		}

		// Backends report canonical paths, so consumers must compare against the same
		let root = root.canonicalize().map_err(|source| Error::Canonicalize {
			path: root.to_path_buf(),
			source,
		})?;

		let (raw_tx, raw_rx) = mpsc::unbounded_channel();
		let mut watcher =
			notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
				Ok(event) => {
					// Receiver gone means the handle was dropped, nothing left to do
					let _ = raw_tx.send(RawNotifyEvent::from_notify(event));
				}
				Err(e) => error!(?e, "Filesystem watcher backend error"),
			})?;
		watcher.watch(&root, RecursiveMode::Recursive)?;

		let (events_tx, events_rx) = mpsc::channel(self.config.buffer_size.max(1));
		let (stop_tx, stop_rx) = oneshot::channel();

		tokio::spawn(run_event_loop(
			root.clone(),
			Arc::new(StabilizingHandler::new(self.config.stabilization)),
			self.config.tick_interval,
			raw_rx,
			events_tx,
			stop_rx,
		));

		debug!(root = %root.display(), "Started filesystem watcher");

		Ok(WatchHandle {
			root,
			events: events_rx,
			stop_tx: Some(stop_tx),
			_watcher: watcher,
		})
	}
}

async fn run_event_loop(
	root: PathBuf,
	handler: Arc<dyn EventHandler>,
	tick_interval: Duration,
	mut raw_rx: mpsc::UnboundedReceiver<RawNotifyEvent>,
	events_tx: mpsc::Sender<FsEvent>,
	mut stop_rx: oneshot::Receiver<()>,
) {
	let mut ticker = interval(tick_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

	'outer: loop {
		let ready = tokio::select! {
			_ = &mut stop_rx => break,
			Some(raw) = raw_rx.recv() => handler.process(raw).await,
			_ = ticker.tick() => handler.tick().await,
		};

		match ready {
			Ok(events) => {
				for event in events {
					if events_tx.send(event).await.is_err() {
						break 'outer;
					}
				}
			}
			Err(e) => warn!(?e, root = %root.display(), "Failed to handle filesystem event"),
		}
	}

	handler.reset().await;
	debug!(root = %root.display(), "Stopped filesystem watcher");
}

/// Live subscription on a watched root
pub struct WatchHandle {
	root: PathBuf,
	events: mpsc::Receiver<FsEvent>,
	stop_tx: Option<oneshot::Sender<()>>,
	_watcher: RecommendedWatcher,
}

impl WatchHandle {
	/// Canonical root being watched
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Next normalized event, `None` once the watcher has stopped
	pub async fn recv(&mut self) -> Option<FsEvent> {
		self.events.recv().await
	}
}

impl Drop for WatchHandle {
	fn drop(&mut self) {
		if let Some(stop_tx) = self.stop_tx.take() {
			// The loop may already be gone if the consumer side closed first
			let _ = stop_tx.send(());
		}
	}
}
