use super::{Baseline, BaselineError, BaselineStore};
use crate::{location::LocationName, storage::FileIOError};

use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

/// One JSON document per location under a directory.
///
/// Commits write a sibling temporary file and rename it over the previous
/// document, so readers see either the old or the new baseline.
#[derive(Debug, Clone)]
pub struct JsonBaselineStore {
	dir: PathBuf,
}

impl JsonBaselineStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn file_for(&self, location: &LocationName) -> PathBuf {
		let file_name = location
			.as_str()
			.chars()
			.map(|c| {
				if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
					c
				} else {
					'_'
				}
			})
			.collect::<String>();

		self.dir.join(format!("{file_name}.json"))
	}
}

#[async_trait]
impl BaselineStore for JsonBaselineStore {
	async fn load(&self, location: &LocationName) -> Result<Baseline, BaselineError> {
		let path = self.file_for(location);

		let bytes = match fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Baseline::new()),
			Err(e) => return Err(FileIOError::from((path, e, "Failed to read baseline")).into()),
		};

		serde_json::from_slice(&bytes).map_err(|source| BaselineError::Serialization {
			location: location.clone(),
			source,
		})
	}

	async fn commit(&self, location: &LocationName, baseline: Baseline) -> Result<(), BaselineError> {
		fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| FileIOError::from((&self.dir, e, "Failed to create baseline directory")))?;

		let path = self.file_for(location);
		let tmp_path = path.with_extension("json.tmp");

		let bytes =
			serde_json::to_vec_pretty(&baseline).map_err(|source| BaselineError::Serialization {
				location: location.clone(),
				source,
			})?;

		fs::write(&tmp_path, bytes)
			.await
			.map_err(|e| FileIOError::from((&tmp_path, e, "Failed to write baseline")))?;
		fs::rename(&tmp_path, &path)
			.await
			.map_err(|e| FileIOError::from((&path, e, "Failed to replace baseline")))?;

		debug!(%location, entries = baseline.len(), "Committed baseline");

		Ok(())
	}
}
