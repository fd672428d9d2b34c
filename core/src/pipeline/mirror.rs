use super::{FileProcessor, ProcessingContext, ProcessingFailure, ProcessingResult};
use crate::{
	event::EventType,
	location::LocationName,
	storage::{StorageError, StorageProvider},
};

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

struct MirrorTarget {
	source: Arc<dyn StorageProvider>,
	target: Arc<dyn StorageProvider>,
}

/// Keeps a copy of each registered location in a target storage.
///
/// Added and modified files are copied from the location's storage, deleted
/// ones are removed from the target. Events of unregistered locations pass
/// through untouched.
#[derive(Default)]
pub struct MirrorProcessor {
	targets: HashMap<LocationName, MirrorTarget>,
}

impl MirrorProcessor {
	pub const NAME: &'static str = "mirror";

	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_target(
		mut self,
		location: impl Into<LocationName>,
		source: Arc<dyn StorageProvider>,
		target: Arc<dyn StorageProvider>,
	) -> Self {
		self.targets
			.insert(location.into(), MirrorTarget { source, target });
		self
	}

	pub fn is_empty(&self) -> bool {
		self.targets.is_empty()
	}

	async fn copy(&self, mirror: &MirrorTarget, path: &str) -> Result<(), StorageError> {
		let mut reader = mirror.source.open(path).await?;
		let mut data = Vec::new();
		reader
			.read_to_end(&mut data)
			.await
			.map_err(|e| StorageError::Unavailable(format!("failed to read '{path}': {e}")))?;

		mirror.target.write(path, &data).await
	}
}

#[async_trait]
impl FileProcessor for MirrorProcessor {
	fn name(&self) -> &str {
		Self::NAME
	}

	async fn process(&self, ctx: &mut ProcessingContext) -> ProcessingResult {
		let event = ctx.event();
		let Some(mirror) = self.targets.get(&event.location) else {
			return ProcessingResult::Success;
		};

		let result = match event.event_type {
			EventType::Added | EventType::Modified => self.copy(mirror, &event.path).await,
			EventType::Deleted => mirror.target.remove(&event.path).await,
		};

		match result {
			Ok(()) => {
				debug!(location = %event.location, path = %event.path, "Mirrored file");
				ProcessingResult::Success
			}
			Err(e @ StorageError::InvalidPath(_)) | Err(e @ StorageError::NonUtf8Path(_)) => {
				ProcessingResult::Failure(ProcessingFailure::fatal(e.to_string()))
			}
			Err(e) => ProcessingResult::Failure(ProcessingFailure::retryable(e.to_string())),
		}
	}
}
