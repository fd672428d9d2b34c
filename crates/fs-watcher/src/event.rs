//! Raw and normalized filesystem events

use std::{path::PathBuf, time::SystemTime};

use notify::event::{EventKind, ModifyKind, RenameMode};

/// Kind of a notification as reported by the backend, before any buffering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventKind {
	Create,
	Modify,
	Remove,
	/// Rename carrying both the old and the new path
	Rename,
	/// Old half of a rename whose other half was not paired by the backend
	RenameFrom,
	/// New half of a rename whose other half was not paired by the backend
	RenameTo,
	Other(String),
}

/// Notification straight out of `notify`
#[derive(Debug, Clone)]
pub struct RawNotifyEvent {
	pub kind: RawEventKind,
	pub paths: Vec<PathBuf>,
	pub timestamp: SystemTime,
}

impl RawNotifyEvent {
	pub fn from_notify(event: notify::Event) -> Self {
		let kind = match event.kind {
			EventKind::Create(_) => RawEventKind::Create,
			EventKind::Remove(_) => RawEventKind::Remove,
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => RawEventKind::Rename,
			EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawEventKind::RenameFrom,
			EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawEventKind::RenameTo,
			EventKind::Modify(ModifyKind::Name(_)) if event.paths.len() >= 2 => RawEventKind::Rename,
			EventKind::Modify(_) => RawEventKind::Modify,
			other => RawEventKind::Other(format!("{other:?}")),
		};

		Self {
			kind,
			paths: event.paths,
			timestamp: SystemTime::now(),
		}
	}

	pub fn primary_path(&self) -> Option<&PathBuf> {
		self.paths.first()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
	Create,
	Modify,
	Remove,
	/// The event path is the destination
	Rename { from: PathBuf },
}

impl FsEventKind {
	pub fn is_create(&self) -> bool {
		matches!(self, Self::Create)
	}

	pub fn is_modify(&self) -> bool {
		matches!(self, Self::Modify)
	}

	pub fn is_remove(&self) -> bool {
		matches!(self, Self::Remove)
	}

	pub fn is_rename(&self) -> bool {
		matches!(self, Self::Rename { .. })
	}
}

/// Normalized event handed to consumers of a [`crate::WatchHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
	pub kind: FsEventKind,
	pub path: PathBuf,
	pub timestamp: SystemTime,
}

impl FsEvent {
	fn new(kind: FsEventKind, path: PathBuf) -> Self {
		Self {
			kind,
			path,
			timestamp: SystemTime::now(),
		}
	}

	pub fn create(path: PathBuf) -> Self {
		Self::new(FsEventKind::Create, path)
	}

	pub fn modify(path: PathBuf) -> Self {
		Self::new(FsEventKind::Modify, path)
	}

	pub fn remove(path: PathBuf) -> Self {
		Self::new(FsEventKind::Remove, path)
	}

	pub fn rename(from: PathBuf, to: PathBuf) -> Self {
		Self::new(FsEventKind::Rename { from }, to)
	}
}
