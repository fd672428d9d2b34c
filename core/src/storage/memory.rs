use super::{
	relative_string, validate_relative, FileReader, StorageEntry, StorageError, StorageProvider,
};

use std::{
	collections::BTreeMap,
	io::Cursor,
	path::{Path, PathBuf},
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Debug, Clone)]
struct MemoryFile {
	data: Vec<u8>,
	modified: DateTime<Utc>,
}

/// Storage held entirely in memory.
///
/// Watcher paths are resolved against a virtual `root`. Listing can be made
/// to fail on demand to exercise scan error handling.
#[derive(Debug)]
pub struct MemoryStorage {
	root: PathBuf,
	files: RwLock<BTreeMap<String, MemoryFile>>,
	fail_listing: AtomicBool,
}

impl MemoryStorage {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			files: RwLock::new(BTreeMap::new()),
			fail_listing: AtomicBool::new(false),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Absolute path of a relative file under the virtual root
	pub fn absolute(&self, path: &str) -> PathBuf {
		self.root.join(path)
	}

	pub fn put(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
		self.files.write().insert(
			path.into(),
			MemoryFile {
				data: data.into(),
				modified: Utc::now(),
			},
		);
	}

	/// Replace content while keeping the previous modification time
	pub fn put_preserving_mtime(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
		let path = path.into();
		let mut files = self.files.write();
		let modified = files
			.get(&path)
			.map(|file| file.modified)
			.unwrap_or_else(Utc::now);
		files.insert(
			path,
			MemoryFile {
				data: data.into(),
				modified,
			},
		);
	}

	pub fn delete(&self, path: &str) -> bool {
		self.files.write().remove(path).is_some()
	}

	pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
		self.files.read().get(path).map(|file| file.data.clone())
	}

	pub fn len(&self) -> usize {
		self.files.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.files.read().is_empty()
	}

	pub fn set_fail_listing(&self, fail: bool) {
		self.fail_listing.store(fail, Ordering::SeqCst);
	}

	fn entry(path: &str, file: &MemoryFile) -> StorageEntry {
		StorageEntry {
			path: path.to_string(),
			size: file.data.len() as u64,
			modified: Some(file.modified),
		}
	}
}

#[async_trait]
impl StorageProvider for MemoryStorage {
	async fn list(&self) -> Result<Vec<StorageEntry>, StorageError> {
		if self.fail_listing.load(Ordering::SeqCst) {
			return Err(StorageError::Unavailable(format!(
				"listing disabled for {}",
				self.root.display()
			)));
		}

		Ok(self
			.files
			.read()
			.iter()
			.map(|(path, file)| Self::entry(path, file))
			.collect())
	}

	async fn stat(&self, path: &str) -> Result<Option<StorageEntry>, StorageError> {
		validate_relative(path)?;
		Ok(self.files.read().get(path).map(|file| Self::entry(path, file)))
	}

	async fn open(&self, path: &str) -> Result<FileReader, StorageError> {
		validate_relative(path)?;
		self.files
			.read()
			.get(path)
			.map(|file| Box::new(Cursor::new(file.data.clone())) as FileReader)
			.ok_or_else(|| StorageError::NotFound(path.to_string()))
	}

	async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
		validate_relative(path)?;
		self.put(path, data);
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<(), StorageError> {
		validate_relative(path)?;
		self.delete(path);
		Ok(())
	}

	fn resolve(&self, absolute: &Path) -> Option<String> {
		relative_string(&self.root, absolute).ok().flatten()
	}
}
