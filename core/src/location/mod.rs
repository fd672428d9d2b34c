//! Monitored locations
//!
//! A [`Location`] is a named root bound to a storage back-end. Each one is
//! driven by its own [`LocationHandler`], which owns the lifecycle state
//! machine, the event queue, the watcher subscription and the processing
//! loop for that location.

mod handler;
mod queue;
mod state;

pub use handler::{LocationHandler, LocationHandlerParts};
pub use queue::EventQueue;
pub use state::{transition, Command, LocationState, Transition};

use crate::{error::MonitorError, pipeline::ProcessingStats};

use std::{borrow::Borrow, fmt, path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Unique name of a location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationName(String);

impl LocationName {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for LocationName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for LocationName {
	fn from(name: &str) -> Self {
		Self(name.to_string())
	}
}

impl From<String> for LocationName {
	fn from(name: String) -> Self {
		Self(name)
	}
}

impl Borrow<str> for LocationName {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl AsRef<str> for LocationName {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// Configuration of one monitored location, fixed for the handler's lifetime
#[derive(Debug, Clone)]
pub struct Location {
	pub name: LocationName,
	/// Root path or back-end identifier, used for logging and watching
	pub root: PathBuf,
	/// Subscribe a real-time watcher while started
	pub watch: bool,
	/// Run a scan on this period while started
	pub scan_interval: Option<Duration>,
	/// Ordered processor names; empty enables every registered processor
	pub processors: Vec<String>,
	/// Glob patterns, matched against relative paths, excluded from scans and watching
	pub ignore: Vec<String>,
}

impl Location {
	pub fn new(name: impl Into<LocationName>, root: impl Into<PathBuf>) -> Self {
		Self {
			name: name.into(),
			root: root.into(),
			watch: false,
			scan_interval: None,
			processors: Vec::new(),
			ignore: Vec::new(),
		}
	}

	pub fn watched(mut self, watch: bool) -> Self {
		self.watch = watch;
		self
	}

	pub fn with_scan_interval(mut self, interval: Duration) -> Self {
		self.scan_interval = Some(interval);
		self
	}

	pub fn with_processors<I, S>(mut self, processors: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.processors = processors.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_ignore<I, S>(mut self, patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.ignore = patterns.into_iter().map(Into::into).collect();
		self
	}
}

/// Compiled ignore patterns of a location
#[derive(Debug, Clone)]
pub struct IgnoreRules(GlobSet);

impl IgnoreRules {
	pub fn new(patterns: &[String]) -> Result<Self, MonitorError> {
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			builder.add(Glob::new(pattern).map_err(|source| MonitorError::IgnorePattern {
				pattern: pattern.clone(),
				source,
			})?);
		}

		builder
			.build()
			.map(Self)
			.map_err(|source| MonitorError::IgnorePattern {
				pattern: patterns.join(", "),
				source,
			})
	}

	pub fn empty() -> Self {
		Self(GlobSet::empty())
	}

	pub fn is_ignored(&self, path: &str) -> bool {
		self.0.is_match(path)
	}
}

/// Point in time snapshot of a location handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationStatus {
	pub name: LocationName,
	pub state: LocationState,
	pub is_active: bool,
	pub is_paused: bool,
	/// Queued plus in-flight events
	pub queue_size: usize,
	pub processors: Vec<String>,
	pub last_scan: Option<DateTime<Utc>>,
	pub stats: ProcessingStats,
}

impl LocationStatus {
	/// Neither active nor paused means the location is not being serviced
	pub fn is_healthy(&self) -> bool {
		self.is_active || self.is_paused
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ignore_rules() {
		let rules = IgnoreRules::new(&["*.tmp".to_string(), ".git/**".to_string()]).unwrap();

		assert!(rules.is_ignored("a.tmp"));
		assert!(rules.is_ignored("nested/dir/b.tmp"));
		assert!(rules.is_ignored(".git/HEAD"));
		assert!(!rules.is_ignored("a.txt"));
		assert!(!IgnoreRules::empty().is_ignored("a.tmp"));
	}

	#[test]
	fn test_invalid_ignore_pattern() {
		let result = IgnoreRules::new(&["a[".to_string()]);
		assert!(matches!(
			result,
			Err(MonitorError::IgnorePattern { pattern, .. }) if pattern == "a["
		));
	}

	#[test]
	fn test_location_name_lookup_by_str() {
		let mut map = std::collections::HashMap::new();
		map.insert(LocationName::from("docs"), 1);
		assert_eq!(map.get("docs"), Some(&1));
	}
}
