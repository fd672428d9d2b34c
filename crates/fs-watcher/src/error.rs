use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("notify backend error: {0}")]
	Notify(#[from] notify::Error),
	#[error("watch root not found: <path='{}'>", .0.display())]
	RootNotFound(PathBuf),
	#[error("failed to canonicalize watch root <path='{}'>: {source}", .path.display())]
	Canonicalize {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

pub type Result<T> = std::result::Result<T, Error>;
