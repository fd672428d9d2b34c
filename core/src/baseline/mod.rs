//! Last committed known-file state per location
//!
//! A [`Baseline`] is what the scanner diffs the live listing against. Stores
//! only ever replace a location's baseline as a whole, so a scan that fails
//! halfway leaves the previous baseline in place.

mod json;

pub use json::JsonBaselineStore;

use crate::{location::LocationName, scanner::checksum::Fingerprint, storage::FileIOError};

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
	pub path: String,
	pub checksum: String,
	pub size: u64,
	pub modified: Option<DateTime<Utc>>,
	pub last_seen: DateTime<Utc>,
}

impl BaselineEntry {
	pub fn fingerprint(&self) -> Fingerprint {
		Fingerprint {
			checksum: self.checksum.clone(),
			size: self.size,
		}
	}

	pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
		self.size == fingerprint.size && self.checksum == fingerprint.checksum
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
	entries: BTreeMap<String, BaselineEntry>,
}

impl Baseline {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, path: &str) -> Option<&BaselineEntry> {
		self.entries.get(path)
	}

	pub fn contains(&self, path: &str) -> bool {
		self.entries.contains_key(path)
	}

	pub fn insert(&mut self, entry: BaselineEntry) {
		self.entries.insert(entry.path.clone(), entry);
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Entries ordered by path
	pub fn entries(&self) -> impl Iterator<Item = &BaselineEntry> {
		self.entries.values()
	}

	pub fn paths(&self) -> impl Iterator<Item = &str> {
		self.entries.keys().map(String::as_str)
	}
}

impl FromIterator<BaselineEntry> for Baseline {
	fn from_iter<I: IntoIterator<Item = BaselineEntry>>(iter: I) -> Self {
		Self {
			entries: iter
				.into_iter()
				.map(|entry| (entry.path.clone(), entry))
				.collect(),
		}
	}
}

#[derive(Error, Debug)]
pub enum BaselineError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to (de)serialize baseline for location <name='{location}'>: {source}")]
	Serialization {
		location: LocationName,
		#[source]
		source: serde_json::Error,
	},
}

#[async_trait]
pub trait BaselineStore: Send + Sync {
	/// Empty baseline for a location never committed before
	async fn load(&self, location: &LocationName) -> Result<Baseline, BaselineError>;

	/// Replace the location's baseline wholesale
	async fn commit(&self, location: &LocationName, baseline: Baseline) -> Result<(), BaselineError>;
}

#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
	baselines: RwLock<HashMap<LocationName, Baseline>>,
}

impl MemoryBaselineStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
	async fn load(&self, location: &LocationName) -> Result<Baseline, BaselineError> {
		Ok(self
			.baselines
			.read()
			.await
			.get(location)
			.cloned()
			.unwrap_or_default())
	}

	async fn commit(&self, location: &LocationName, baseline: Baseline) -> Result<(), BaselineError> {
		self.baselines
			.write()
			.await
			.insert(location.clone(), baseline);
		Ok(())
	}
}
