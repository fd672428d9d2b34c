//! Detected file changes

use crate::{location::LocationName, scanner::checksum::Fingerprint};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
	strum::Display,
	strum::AsRefStr,
)]
pub enum EventType {
	Added,
	Modified,
	Deleted,
}

/// Which detector produced an event
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum EventSource {
	Scan,
	Watcher,
}

/// One detected change of one file under a location.
///
/// `path` is relative to the location root and uses `/` separators. Size and
/// checksum are absent for deletions. Timestamps are detection times and are
/// not ordered across the scan and watcher sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
	pub location: LocationName,
	pub path: String,
	pub event_type: EventType,
	pub size: Option<u64>,
	pub checksum: Option<String>,
	pub timestamp: DateTime<Utc>,
	pub source: EventSource,
}

impl FileEvent {
	pub fn added(
		location: LocationName,
		path: impl Into<String>,
		fingerprint: Fingerprint,
		source: EventSource,
	) -> Self {
		Self::present(location, path.into(), EventType::Added, fingerprint, source)
	}

	pub fn modified(
		location: LocationName,
		path: impl Into<String>,
		fingerprint: Fingerprint,
		source: EventSource,
	) -> Self {
		Self::present(location, path.into(), EventType::Modified, fingerprint, source)
	}

	pub fn deleted(location: LocationName, path: impl Into<String>, source: EventSource) -> Self {
		Self {
			location,
			path: path.into(),
			event_type: EventType::Deleted,
			size: None,
			checksum: None,
			timestamp: Utc::now(),
			source,
		}
	}

	fn present(
		location: LocationName,
		path: String,
		event_type: EventType,
		Fingerprint { checksum, size }: Fingerprint,
		source: EventSource,
	) -> Self {
		Self {
			location,
			path,
			event_type,
			size: Some(size),
			checksum: Some(checksum),
			timestamp: Utc::now(),
			source,
		}
	}

	/// What identifies this change independently of when or by whom it was seen
	pub fn identity(&self) -> EventIdentity {
		EventIdentity {
			event_type: self.event_type,
			checksum: self.checksum.clone(),
			size: self.size,
		}
	}
}

/// Used to recognize the same change reported twice, e.g. by the watcher and a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdentity {
	event_type: EventType,
	checksum: Option<String>,
	size: Option<u64>,
}
