//! Baseline diffing
//!
//! A scan lists the live files of a location, fingerprints them and compares
//! the result with the committed [`Baseline`]. New paths become `Added`,
//! changed fingerprints `Modified`, and baseline paths that were not seen
//! `Deleted`. The observed file set replaces the baseline only once the whole
//! listing succeeded.

pub mod checksum;

use crate::{
	baseline::{Baseline, BaselineEntry, BaselineStore},
	error::MonitorError,
	event::{EventSource, FileEvent},
	location::{IgnoreRules, LocationName},
	storage::{FileIOError, StorageEntry, StorageError, StorageProvider},
};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use checksum::Fingerprint;

/// Result of one scan pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileScanContext {
	pub location: LocationName,
	pub started_at: DateTime<Utc>,
	/// `None` while the scan is running
	pub finished_at: Option<DateTime<Utc>>,
	pub events: Vec<FileEvent>,
}

impl FileScanContext {
	pub fn new(location: LocationName) -> Self {
		Self {
			location,
			started_at: Utc::now(),
			finished_at: None,
			events: Vec::new(),
		}
	}

	pub fn is_finished(&self) -> bool {
		self.finished_at.is_some()
	}
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
	/// Detect and report, but neither commit the baseline nor enqueue events
	pub dry_run: bool,
	/// Reuse the stored checksum of a file whose size and modification time
	/// match its baseline entry instead of reading its content
	pub trust_metadata: bool,
	pub cancel: Option<CancellationToken>,
}

impl ScanOptions {
	pub fn dry_run() -> Self {
		Self {
			dry_run: true,
			..Default::default()
		}
	}

	pub fn trust_metadata() -> Self {
		Self {
			trust_metadata: true,
			..Default::default()
		}
	}

	pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
		self.cancel = Some(cancel);
		self
	}

	fn is_cancelled(&self) -> bool {
		self.cancel
			.as_ref()
			.is_some_and(CancellationToken::is_cancelled)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
	pub processed: usize,
	pub total: usize,
}

pub type ProgressSender = mpsc::UnboundedSender<ScanProgress>;

pub struct Scanner {
	location: LocationName,
	storage: Arc<dyn StorageProvider>,
	baselines: Arc<dyn BaselineStore>,
	ignore: IgnoreRules,
}

impl Scanner {
	pub fn new(
		location: LocationName,
		storage: Arc<dyn StorageProvider>,
		baselines: Arc<dyn BaselineStore>,
		ignore: IgnoreRules,
	) -> Self {
		Self {
			location,
			storage,
			baselines,
			ignore,
		}
	}

	/// Diff the live file set against the baseline, appending events to `ctx`.
	///
	/// Nothing is committed when an error or cancellation cuts the pass short.
	pub async fn scan(
		&self,
		ctx: &mut FileScanContext,
		options: &ScanOptions,
		progress: Option<&ProgressSender>,
	) -> Result<(), MonitorError> {
		let baseline = self.baselines.load(&self.location).await?;

		let live = self
			.storage
			.list()
			.await?
			.into_iter()
			.filter(|entry| {
				let ignored = self.ignore.is_ignored(&entry.path);
				if ignored {
					trace!(location = %self.location, path = %entry.path, "Ignoring file");
				}
				!ignored
			})
			.collect::<Vec<_>>();

		let total = live.len();
		let mut observed = Baseline::new();

		for (processed, entry) in live.into_iter().enumerate() {
			if options.is_cancelled() {
				return Err(MonitorError::Cancelled);
			}

			let fingerprint = self
				.fingerprint(&entry, baseline.get(&entry.path), options)
				.await?;

			if let Some(progress) = progress {
				// Nobody listening anymore is not our problem
				let _ = progress.send(ScanProgress {
					processed: processed + 1,
					total,
				});
			}

			let Some(fingerprint) = fingerprint else {
				// Gone between listing and reading, so it counts as not observed
				debug!(location = %self.location, path = %entry.path, "File vanished during scan");
				continue;
			};

			match baseline.get(&entry.path) {
				None => ctx.events.push(FileEvent::added(
					self.location.clone(),
					&entry.path,
					fingerprint.clone(),
					EventSource::Scan,
				)),
				Some(known) if !known.matches(&fingerprint) => {
					ctx.events.push(FileEvent::modified(
						self.location.clone(),
						&entry.path,
						fingerprint.clone(),
						EventSource::Scan,
					))
				}
				Some(_) => {}
			}

			observed.insert(BaselineEntry {
				path: entry.path,
				checksum: fingerprint.checksum,
				size: fingerprint.size,
				modified: entry.modified,
				last_seen: Utc::now(),
			});
		}

		for path in baseline.paths() {
			if !observed.contains(path) {
				ctx.events.push(FileEvent::deleted(
					self.location.clone(),
					path,
					EventSource::Scan,
				));
			}
		}

		if options.is_cancelled() {
			return Err(MonitorError::Cancelled);
		}

		if options.dry_run {
			debug!(location = %self.location, events = ctx.events.len(), "Dry run, baseline left untouched");
		} else {
			let files = observed.len();
			self.baselines.commit(&self.location, observed).await?;
			info!(
				location = %self.location,
				files,
				events = ctx.events.len(),
				"Scan committed baseline",
			);
		}

		Ok(())
	}

	async fn fingerprint(
		&self,
		entry: &StorageEntry,
		known: Option<&BaselineEntry>,
		options: &ScanOptions,
	) -> Result<Option<Fingerprint>, MonitorError> {
		if options.trust_metadata {
			if let Some(known) = known {
				if known.size == entry.size && known.modified.is_some() && known.modified == entry.modified
				{
					return Ok(Some(known.fingerprint()));
				}
			}
		}

		let mut reader = match self.storage.open(&entry.path).await {
			Ok(reader) => reader,
			Err(StorageError::NotFound(_)) => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		let fingerprint = checksum::compute(&mut reader)
			.await
			.map_err(|e| {
				StorageError::from(FileIOError::from((&entry.path, e, "Failed to fingerprint file")))
			})?;

		Ok(Some(fingerprint))
	}
}
