use std::{
	fmt::{self, Display},
	io,
	path::Path,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("file not found: <path='{0}'>")]
	NotFound(String),
	#[error("path is not a valid location relative path: <path='{0}'>")]
	InvalidPath(String),
	#[error("received a non UTF-8 path: <path='{}'>", .0.display())]
	NonUtf8Path(Box<Path>),
	#[error("storage backend unavailable: {0}")]
	Unavailable(String),
}

/// File I/O error that includes the path that caused the error
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<&'static str>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl<P: AsRef<Path>> From<(P, io::Error)> for FileIOError {
	fn from((path, source): (P, io::Error)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}
}

impl<P: AsRef<Path>> From<(P, io::Error, &'static str)> for FileIOError {
	fn from((path, source, context): (P, io::Error, &'static str)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(context),
		}
	}
}
