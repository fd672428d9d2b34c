//! Tracing setup for the `filemon` binary and embedders

use std::{
	io,
	path::Path,
	sync::{Mutex, Once},
};

use tracing_appender::{
	non_blocking::WorkerGuard,
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "filemon.log";

/// Keeps the file writer flushing until the process exits
static FILE_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Log to stdout and to a daily rotated file under `logs_dir`.
///
/// `RUST_LOG` takes precedence over `default_filter`. Only the first call
/// installs anything; later calls return `Ok(())`.
pub fn init_logging(logs_dir: &Path, default_filter: &str) -> io::Result<()> {
	static INIT: Once = Once::new();
	let mut result = Ok(());

	INIT.call_once(|| {
		if let Err(e) = std::fs::create_dir_all(logs_dir) {
			result = Err(e);
			return;
		}

		let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, LOG_FILE);
		let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

		let env_filter =
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

		if let Err(e) = tracing_subscriber::registry()
			.with(env_filter)
			.with(fmt::layer().with_target(true).with_writer(io::stdout))
			.with(
				fmt::layer()
					.with_target(true)
					.with_thread_ids(true)
					.with_ansi(false)
					.with_writer(file_writer),
			)
			.try_init()
		{
			result = Err(io::Error::other(format!("Failed to initialize tracing: {e}")));
			return;
		}

		if let Ok(mut slot) = FILE_GUARD.lock() {
			*slot = Some(guard);
		}
	});

	result
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn test_second_init_is_a_no_op() {
		let dir = tempdir().unwrap();

		// Another test may already own the global subscriber, so only the
		// second call's outcome is deterministic
		let _ = init_logging(dir.path(), "debug");
		assert!(init_logging(&dir.path().join("elsewhere"), "debug").is_ok());
		assert!(!dir.path().join("elsewhere").exists());
	}
}
