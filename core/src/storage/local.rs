use super::{
	relative_string, validate_relative, FileIOError, FileReader, StorageEntry, StorageError,
	StorageProvider,
};

use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{trace, warn};

/// A directory on a local or mounted filesystem
#[derive(Debug, Clone)]
pub struct LocalStorage {
	root: PathBuf,
	// Watchers report canonical paths, which differ from `root` behind symlinks
	canonical_root: Option<PathBuf>,
}

impl LocalStorage {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		let canonical_root = std::fs::canonicalize(&root)
			.ok()
			.filter(|canonical| canonical != &root);

		Self {
			root,
			canonical_root,
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
		Ok(self.root.join(validate_relative(path)?))
	}

	fn entry_from(path: String, metadata: &std::fs::Metadata) -> StorageEntry {
		StorageEntry {
			path,
			size: metadata.len(),
			modified: metadata.modified().ok().map(DateTime::<Utc>::from),
		}
	}
}

#[async_trait]
impl StorageProvider for LocalStorage {
	async fn list(&self) -> Result<Vec<StorageEntry>, StorageError> {
		let mut entries = Vec::new();
		let mut to_walk = vec![self.root.clone()];

		while let Some(dir) = to_walk.pop() {
			let mut read_dir = fs::read_dir(&dir)
				.await
				.map_err(|e| FileIOError::from((&dir, e, "Failed to read directory")))?;

			while let Some(entry) = read_dir
				.next_entry()
				.await
				.map_err(|e| FileIOError::from((&dir, e, "Failed to read directory entry")))?
			{
				let path = entry.path();
				let file_type = entry
					.file_type()
					.await
					.map_err(|e| FileIOError::from((&path, e, "Failed to read file type")))?;

				if file_type.is_dir() {
					to_walk.push(path);
					continue;
				}

				if !file_type.is_file() {
					trace!(path = %path.display(), "Skipping non regular file");
					continue;
				}

				let metadata = match entry.metadata().await {
					Ok(metadata) => metadata,
					// Removed between listing and stat, the next pass will see it gone
					Err(e) if e.kind() == ErrorKind::NotFound => continue,
					Err(e) => {
						return Err(FileIOError::from((&path, e, "Failed to read metadata")).into())
					}
				};

				match relative_string(&self.root, &path) {
					Ok(Some(relative)) => entries.push(Self::entry_from(relative, &metadata)),
					Ok(None) => {}
					Err(e) => warn!(?e, "Skipping file that can't be addressed by a relative path"),
				}
			}
		}

		entries.sort_by(|a, b| a.path.cmp(&b.path));

		Ok(entries)
	}

	async fn stat(&self, path: &str) -> Result<Option<StorageEntry>, StorageError> {
		let full_path = self.full_path(path)?;

		match fs::symlink_metadata(&full_path).await {
			Ok(metadata) if metadata.is_file() => {
				Ok(Some(Self::entry_from(path.to_string(), &metadata)))
			}
			Ok(_) => Ok(None),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(FileIOError::from((full_path, e, "Failed to read metadata")).into()),
		}
	}

	async fn open(&self, path: &str) -> Result<FileReader, StorageError> {
		let full_path = self.full_path(path)?;

		match fs::File::open(&full_path).await {
			Ok(file) => Ok(Box::new(file)),
			Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(path.to_string())),
			Err(e) => Err(FileIOError::from((full_path, e, "Failed to open file")).into()),
		}
	}

	async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
		let full_path = self.full_path(path)?;

		if let Some(parent) = full_path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from((parent, e, "Failed to create parent directory")))?;
		}

		fs::write(&full_path, data)
			.await
			.map_err(|e| FileIOError::from((full_path, e, "Failed to write file")).into())
	}

	async fn remove(&self, path: &str) -> Result<(), StorageError> {
		let full_path = self.full_path(path)?;

		match fs::remove_file(&full_path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(FileIOError::from((full_path, e, "Failed to remove file")).into()),
		}
	}

	fn resolve(&self, absolute: &Path) -> Option<String> {
		let roots = std::iter::once(&self.root).chain(self.canonical_root.as_ref());

		for root in roots {
			match relative_string(root, absolute) {
				Ok(Some(relative)) => return Some(relative),
				Ok(None) => {}
				Err(e) => {
					warn!(?e, "Ignoring watcher path");
					return None;
				}
			}
		}

		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::scanner::checksum;

	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	#[tokio::test]
	async fn test_list_is_recursive_and_sorted() {
		let dir = tempdir().unwrap();
		std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
		std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
		std::fs::write(dir.path().join("nested/a.txt"), b"a").unwrap();
		std::fs::write(dir.path().join("nested/deeper/c.txt"), b"ccc").unwrap();

		let storage = LocalStorage::new(dir.path());
		let entries = storage.list().await.unwrap();

		let listed = entries
			.iter()
			.map(|entry| (entry.path.as_str(), entry.size))
			.collect::<Vec<_>>();
		assert_eq!(
			listed,
			vec![("b.txt", 2), ("nested/a.txt", 1), ("nested/deeper/c.txt", 3)]
		);
		assert!(entries.iter().all(|entry| entry.modified.is_some()));
	}

	#[tokio::test]
	async fn test_list_missing_root_fails() {
		let dir = tempdir().unwrap();
		let storage = LocalStorage::new(dir.path().join("gone"));

		assert!(matches!(
			storage.list().await,
			Err(StorageError::FileIO(_))
		));
	}

	#[tokio::test]
	async fn test_write_open_stat_remove() {
		let dir = tempdir().unwrap();
		let storage = LocalStorage::new(dir.path());

		storage.write("sub/file.bin", b"payload").await.unwrap();

		let entry = storage.stat("sub/file.bin").await.unwrap().unwrap();
		assert_eq!(entry.size, 7);
		assert_eq!(storage.stat("sub").await.unwrap(), None);

		let mut reader = storage.open("sub/file.bin").await.unwrap();
		let fingerprint = checksum::compute(&mut reader).await.unwrap();
		assert_eq!(fingerprint, checksum::compute_bytes(b"payload"));

		storage.remove("sub/file.bin").await.unwrap();
		storage.remove("sub/file.bin").await.unwrap();
		assert_eq!(storage.stat("sub/file.bin").await.unwrap(), None);
		assert!(matches!(
			storage.open("sub/file.bin").await,
			Err(StorageError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_escaping_paths_are_rejected() {
		let dir = tempdir().unwrap();
		let storage = LocalStorage::new(dir.path());

		assert!(matches!(
			storage.write("../outside.txt", b"x").await,
			Err(StorageError::InvalidPath(_))
		));
	}

	#[test]
	fn test_resolve_accepts_canonical_root() {
		let dir = tempdir().unwrap();
		let storage = LocalStorage::new(dir.path());
		let canonical = dir.path().canonicalize().unwrap();

		assert_eq!(
			storage.resolve(&canonical.join("x").join("y.txt")),
			Some("x/y.txt".to_string())
		);
		assert_eq!(storage.resolve(Path::new("/definitely/elsewhere")), None);
	}
}
