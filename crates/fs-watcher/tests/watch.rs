use std::time::Duration;

use filemon_fs_watcher::{Error, FsEventKind, FsWatcher, WatcherConfig};
use tempfile::tempdir;
use tokio::time::timeout;
use tracing_test::traced_test;

fn fast_config() -> WatcherConfig {
	WatcherConfig {
		stabilization: Duration::from_millis(50),
		tick_interval: Duration::from_millis(10),
		buffer_size: 64,
	}
}

#[tokio::test]
#[traced_test]
async fn reports_created_file() {
	let dir = tempdir().unwrap();
	let mut handle = FsWatcher::new(fast_config()).watch(dir.path()).unwrap();
	let target = handle.root().join("hello.txt");

	tokio::fs::write(&target, b"hello").await.unwrap();

	let event = timeout(Duration::from_secs(5), async {
		loop {
			let event = handle.recv().await.expect("watcher stopped");
			if event.path == target {
				return event;
			}
		}
	})
	.await
	.expect("no event for created file");

	assert_eq!(event.kind, FsEventKind::Create);
}

#[tokio::test]
#[traced_test]
async fn reports_removed_file() {
	let dir = tempdir().unwrap();
	let existing = dir.path().join("old.txt");
	std::fs::write(&existing, b"bye").unwrap();

	let mut handle = FsWatcher::new(fast_config()).watch(dir.path()).unwrap();
	let target = handle.root().join("old.txt");

	tokio::fs::remove_file(&target).await.unwrap();

	let event = timeout(Duration::from_secs(5), async {
		loop {
			let event = handle.recv().await.expect("watcher stopped");
			if event.path == target && event.kind.is_remove() {
				return event;
			}
		}
	})
	.await
	.expect("no remove event");

	assert!(event.kind.is_remove());
}

#[tokio::test]
async fn missing_root_is_rejected() {
	let dir = tempdir().unwrap();
	let missing = dir.path().join("nope");

	let result = FsWatcher::default().watch(&missing);

	assert!(matches!(result, Err(Error::RootNotFound(path)) if path == missing));
}
