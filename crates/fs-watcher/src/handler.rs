//! Event buffering between the backend and consumers
//!
//! Editors and copy tools rarely produce a single notification per write. A
//! create is followed by a run of modifies, and temporary files appear and
//! vanish inside the same burst. The [`StabilizingHandler`] keeps the latest
//! pending kind per path and only releases it once the path has been quiet
//! for the stabilization window:
//!
//! - create then modify stays a create
//! - create then remove cancels out
//! - modify then remove becomes a remove
//!
//! Removes and paired renames are released immediately.

use std::{
	collections::HashMap,
	path::PathBuf,
	time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::trace;

use crate::{
	event::{FsEvent, RawEventKind, RawNotifyEvent},
	Result,
};

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
	/// Handle one raw notification, returning whatever is ready to emit
	async fn process(&self, event: RawNotifyEvent) -> Result<Vec<FsEvent>>;

	/// Called periodically to release buffered events that have settled
	async fn tick(&self) -> Result<Vec<FsEvent>>;

	/// Drop every buffered event
	async fn reset(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
	Create,
	Modify,
}

#[derive(Debug)]
pub struct StabilizingHandler {
	stabilization: Duration,
	pending: RwLock<HashMap<PathBuf, (PendingKind, Instant)>>,
}

impl StabilizingHandler {
	pub fn new(stabilization: Duration) -> Self {
		Self {
			stabilization,
			pending: RwLock::new(HashMap::new()),
		}
	}

	async fn buffer(&self, path: PathBuf, kind: PendingKind) {
		let mut pending = self.pending.write().await;
		let kind = match pending.get(&path) {
			// A file created in this burst is still new to consumers
			Some((PendingKind::Create, _)) => PendingKind::Create,
			_ => kind,
		};
		pending.insert(path, (kind, Instant::now()));
	}

	async fn evict_settled(&self) -> Vec<FsEvent> {
		let mut pending = self.pending.write().await;
		let settled = pending
			.iter()
			.filter(|(_, (_, since))| since.elapsed() >= self.stabilization)
			.map(|(path, (kind, _))| (path.clone(), *kind))
			.collect::<Vec<_>>();

		settled
			.into_iter()
			.map(|(path, kind)| {
				pending.remove(&path);
				trace!(path = %path.display(), ?kind, "Evicting settled event");
				match kind {
					PendingKind::Create => FsEvent::create(path),
					PendingKind::Modify => FsEvent::modify(path),
				}
			})
			.collect()
	}

	async fn remove(&self, path: PathBuf) -> Vec<FsEvent> {
		match self.pending.write().await.remove(&path) {
			Some((PendingKind::Create, _)) => {
				trace!(path = %path.display(), "Create and remove neutralized");
				vec![]
			}
			_ => vec![FsEvent::remove(path)],
		}
	}
}

impl Default for StabilizingHandler {
	fn default() -> Self {
		Self::new(Duration::from_millis(100))
	}
}

#[async_trait::async_trait]
impl EventHandler for StabilizingHandler {
	async fn process(&self, event: RawNotifyEvent) -> Result<Vec<FsEvent>> {
		let Some(path) = event.primary_path().cloned() else {
			return Ok(vec![]);
		};

		match event.kind {
			RawEventKind::Create | RawEventKind::RenameTo => {
				self.buffer(path, PendingKind::Create).await;
				Ok(vec![])
			}
			RawEventKind::Modify => {
				self.buffer(path, PendingKind::Modify).await;
				Ok(vec![])
			}
			RawEventKind::Remove | RawEventKind::RenameFrom => Ok(self.remove(path).await),
			RawEventKind::Rename if event.paths.len() >= 2 => {
				let from = event.paths[0].clone();
				let to = event.paths[1].clone();
				let mut pending = self.pending.write().await;
				if let Some((PendingKind::Create, _)) = pending.remove(&from) {
					// The source never reached consumers, so the destination is simply new
					pending.insert(to, (PendingKind::Create, Instant::now()));
					return Ok(vec![]);
				}
				pending.remove(&to);
				Ok(vec![FsEvent::rename(from, to)])
			}
			RawEventKind::Rename => {
				// Incomplete rename, treat as modify
				self.buffer(path, PendingKind::Modify).await;
				Ok(vec![])
			}
			RawEventKind::Other(ref kind) => {
				trace!("Ignoring unknown event kind: {}", kind);
				Ok(vec![])
			}
		}
	}

	async fn tick(&self) -> Result<Vec<FsEvent>> {
		Ok(self.evict_settled().await)
	}

	async fn reset(&self) {
		self.pending.write().await.clear();
	}
}
