//! Storage back-ends a location reads its files from
//!
//! The engine never touches a filesystem directly. A location is bound to a
//! [`StorageProvider`] that lists, stats, reads and writes files by their
//! location relative path (`/` separated, no `..`). [`LocalStorage`] serves a
//! directory on disk and [`MemoryStorage`] keeps everything in memory.

mod error;
mod local;
mod memory;

pub use error::{FileIOError, StorageError};
pub use local::LocalStorage;
pub use memory::MemoryStorage;

use std::path::{Component, Path};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// A regular file as seen by a storage back-end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
	pub path: String,
	pub size: u64,
	pub modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
	/// Every regular file under the root, recursively
	async fn list(&self) -> Result<Vec<StorageEntry>, StorageError>;

	/// `None` when the path does not exist or is not a regular file
	async fn stat(&self, path: &str) -> Result<Option<StorageEntry>, StorageError>;

	async fn open(&self, path: &str) -> Result<FileReader, StorageError>;

	/// Create or replace the file, creating parent directories as needed
	async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

	/// Removing a missing file is not an error
	async fn remove(&self, path: &str) -> Result<(), StorageError>;

	/// Map an absolute path reported by a watcher back into a relative path
	fn resolve(&self, absolute: &Path) -> Option<String>;
}

/// Reject relative paths that could escape the location root
pub(crate) fn validate_relative(path: &str) -> Result<&Path, StorageError> {
	let as_path = Path::new(path);
	if path.is_empty()
		|| as_path
			.components()
			.any(|component| !matches!(component, Component::Normal(_)))
	{
		return Err(StorageError::InvalidPath(path.to_string()));
	}

	Ok(as_path)
}

/// Relative path of `path` under `root`, `/` separated
pub(crate) fn relative_string(root: &Path, path: &Path) -> Result<Option<String>, StorageError> {
	let Ok(relative) = path.strip_prefix(root) else {
		return Ok(None);
	};

	let mut parts = Vec::new();
	for component in relative.components() {
		match component {
			Component::Normal(part) => parts.push(
				part.to_str()
					.ok_or_else(|| StorageError::NonUtf8Path(path.into()))?,
			),
			_ => return Ok(None),
		}
	}

	if parts.is_empty() {
		return Ok(None);
	}

	Ok(Some(parts.join("/")))
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::path::PathBuf;

	#[test]
	fn test_validate_relative() {
		assert!(validate_relative("a/b.txt").is_ok());
		assert!(validate_relative("").is_err());
		assert!(validate_relative("../etc/passwd").is_err());
		assert!(validate_relative("/etc/passwd").is_err());
		assert!(validate_relative("a/./b").is_ok());
		assert!(validate_relative("a/../../b").is_err());
	}

	#[test]
	fn test_relative_string() {
		let root = PathBuf::from("/srv/inbox");
		assert_eq!(
			relative_string(&root, &root.join("a").join("b.txt")).unwrap(),
			Some("a/b.txt".to_string())
		);
		assert_eq!(relative_string(&root, &root).unwrap(), None);
		assert_eq!(
			relative_string(&root, Path::new("/srv/other/b.txt")).unwrap(),
			None
		);
	}
}
