//! Real-time change sources
//!
//! A [`WatchProvider`] hands each watched location a [`WatchSource`] of
//! normalized filesystem events. The default provider is backed by the
//! `notify` based [`FsWatcher`]; embedders and tests can plug in any other.

use crate::{error::MonitorError, location::Location};

use async_trait::async_trait;
use filemon_fs_watcher::{FsEvent, FsWatcher, WatchHandle, WatcherConfig};
use tracing::debug;

#[async_trait]
pub trait WatchSource: Send {
	/// `None` once the source has shut down
	async fn next(&mut self) -> Option<FsEvent>;
}

pub trait WatchProvider: Send + Sync {
	/// Subscribe to changes under the location's root until the source is dropped
	fn subscribe(&self, location: &Location) -> Result<Box<dyn WatchSource>, MonitorError>;
}

#[async_trait]
impl WatchSource for WatchHandle {
	async fn next(&mut self) -> Option<FsEvent> {
		self.recv().await
	}
}

#[derive(Debug, Clone, Default)]
pub struct NotifyWatchProvider {
	watcher: FsWatcher,
}

impl NotifyWatchProvider {
	pub fn new(config: WatcherConfig) -> Self {
		Self {
			watcher: FsWatcher::new(config),
		}
	}
}

impl WatchProvider for NotifyWatchProvider {
	fn subscribe(&self, location: &Location) -> Result<Box<dyn WatchSource>, MonitorError> {
		let handle = self.watcher.watch(&location.root)?;
		debug!(location = %location.name, root = %handle.root().display(), "Subscribed watcher");
		Ok(Box::new(handle))
	}
}
