use crate::{
	baseline::BaselineError,
	location::{Command, LocationName, LocationState},
	storage::StorageError,
};

use std::time::Duration;

use thiserror::Error;

/// Error type for every location scoped operation of the monitoring engine
#[derive(Error, Debug)]
pub enum MonitorError {
	// Lookup errors
	#[error("location not found: <name='{0}'>")]
	LocationNotFound(LocationName),
	#[error("processor not found: <location='{location}', processor='{processor}'>")]
	ProcessorNotFound {
		location: LocationName,
		processor: String,
	},

	// Configuration errors
	#[error("location registered twice: <name='{0}'>")]
	DuplicateLocation(LocationName),
	#[error("invalid ignore pattern <pattern='{pattern}'>: {source}")]
	IgnorePattern {
		pattern: String,
		#[source]
		source: globset::Error,
	},

	// Lifecycle errors
	#[error("a scan is already running for location <name='{0}'>")]
	ScanInProgress(LocationName),
	#[error("location is stopping: <name='{0}'>")]
	LocationStopping(LocationName),
	#[error("cannot {command} location <name='{location}'> while it is {state}")]
	InvalidTransition {
		location: LocationName,
		command: Command,
		state: LocationState,
	},

	#[error("timed out after {0:?}")]
	Timeout(Duration),
	#[error("operation cancelled")]
	Cancelled,

	// Collaborator errors
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Baseline(#[from] BaselineError),
	#[error("watcher error: {0}")]
	Watcher(#[from] filemon_fs_watcher::Error),
}

impl MonitorError {
	/// Whether this error is the caller asking for work to stop rather than a failure
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}
