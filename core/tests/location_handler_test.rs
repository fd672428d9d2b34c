//! Location lifecycle, queueing and event sources

mod helpers;

use filemon_core::{
	event::{EventSource, EventType, FileEvent},
	scanner::checksum,
	storage::MemoryStorage,
	FileMonitoringService, Location, LocationState, MonitorError, ScanOptions,
};
use filemon_fs_watcher::FsEvent;
use helpers::{
	eventually, ChannelWatchProvider, GatedStorage, PanickingMonitor, RecordingMonitor,
	RecordingProcessor, UnreadableStorage,
};

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;

fn deleted(path: &str) -> FileEvent {
	FileEvent::deleted("docs".into(), path, EventSource::Scan)
}

fn build(
	location: Location,
	storage: Arc<MemoryStorage>,
	processor: Arc<RecordingProcessor>,
	watcher: Arc<ChannelWatchProvider>,
) -> FileMonitoringService {
	FileMonitoringService::builder()
		.location(location, storage)
		.processor(processor)
		.watch_provider(watcher)
		.build()
		.unwrap()
}

#[tokio::test]
async fn pause_holds_queue_and_resume_drains_it() {
	let processor = RecordingProcessor::succeeding("recorder");
	let service = build(
		Location::new("docs", "/docs"),
		Arc::new(MemoryStorage::new("/docs")),
		processor.clone(),
		ChannelWatchProvider::new(),
	);
	service.start().await.unwrap();
	service.pause_location("docs").await.unwrap();

	let handler = service.handler("docs").unwrap();
	for path in ["a.txt", "b.txt", "c.txt"] {
		assert!(handler.enqueue(deleted(path)));
	}

	tokio::time::sleep(Duration::from_millis(100)).await;
	let status = service.location_status("docs").await.unwrap();
	assert_eq!(status.queue_size, 3);
	assert!(status.is_paused);
	assert_eq!(processor.attempt_count(), 0);

	service.resume_location("docs").await.unwrap();
	service
		.wait_for_queue_empty(Duration::from_secs(5))
		.await
		.unwrap();

	assert_eq!(service.queue_size(), 0);
	assert_eq!(processor.attempt_count(), 3);
	service.stop().await.unwrap();
}

#[tokio::test]
async fn events_for_one_path_keep_detection_order() {
	let processor = RecordingProcessor::succeeding("recorder");
	let service = build(
		Location::new("docs", "/docs"),
		Arc::new(MemoryStorage::new("/docs")),
		processor.clone(),
		ChannelWatchProvider::new(),
	);
	let handler = service.handler("docs").unwrap();
	let v1 = checksum::compute_bytes(b"v1");
	let v2 = checksum::compute_bytes(b"v2");

	handler.enqueue(FileEvent::added("docs".into(), "a.txt", v1, EventSource::Watcher));
	handler.enqueue(deleted("b.txt"));
	handler.enqueue(FileEvent::modified("docs".into(), "a.txt", v2, EventSource::Watcher));
	handler.enqueue(deleted("a.txt"));

	service.start().await.unwrap();
	service
		.wait_for_queue_empty(Duration::from_secs(5))
		.await
		.unwrap();

	let for_a = processor
		.seen()
		.into_iter()
		.filter(|(path, _)| path == "a.txt")
		.map(|(_, event_type)| event_type)
		.collect::<Vec<_>>();
	assert_eq!(
		for_a,
		vec![EventType::Added, EventType::Modified, EventType::Deleted]
	);
	service.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_scan_is_rejected() {
	let storage = GatedStorage::new("/docs");
	storage.inner.put("a.txt", "a");
	let service = FileMonitoringService::builder()
		.location(Location::new("docs", "/docs"), storage.clone())
		.build()
		.unwrap();

	let (first, second) = tokio::join!(
		service.scan_location("docs", ScanOptions::default(), None),
		async {
			storage.entered.notified().await;
			let second = service
				.scan_location("docs", ScanOptions::default(), None)
				.await;
			storage.release();
			second
		}
	);

	assert!(matches!(
		second,
		Err(MonitorError::ScanInProgress(name)) if name.as_str() == "docs"
	));
	assert_eq!(first.unwrap().events.len(), 1);
}

#[tokio::test]
async fn scan_failing_partway_neither_commits_nor_queues() {
	let storage = UnreadableStorage::new("/docs");
	let processor = RecordingProcessor::succeeding("recorder");
	let service = FileMonitoringService::builder()
		.location(Location::new("docs", "/docs"), storage.clone())
		.processor(processor.clone())
		.build()
		.unwrap();
	storage.inner.put("a.txt", "a");
	storage.inner.put("c.txt", "c");
	service
		.scan_location("docs", ScanOptions::default(), None)
		.await
		.unwrap();
	service.start().await.unwrap();
	service
		.wait_for_queue_empty(Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(processor.attempt_count(), 2);

	// a.txt is diffed before b.txt fails to read
	storage.inner.put("a.txt", "a, edited");
	storage.inner.put("b.txt", "b");
	storage.inner.delete("c.txt");
	storage.set_unreadable(Some("b.txt"));

	let result = service
		.scan_location("docs", ScanOptions::default(), None)
		.await;
	assert!(matches!(result, Err(MonitorError::Storage(_))));
	assert_eq!(service.queue_size(), 0);
	assert_eq!(processor.attempt_count(), 2);

	// The previous baseline is still the reference
	storage.set_unreadable(None);
	let ctx = service
		.scan_location("docs", ScanOptions::dry_run(), None)
		.await
		.unwrap();
	let mut changes = ctx
		.events
		.iter()
		.map(|event| (event.event_type, event.path.as_str()))
		.collect::<Vec<_>>();
	changes.sort();
	assert_eq!(
		changes,
		vec![
			(EventType::Added, "b.txt"),
			(EventType::Modified, "a.txt"),
			(EventType::Deleted, "c.txt"),
		]
	);

	service.stop().await.unwrap();
}

#[tokio::test]
async fn watcher_and_scan_reporting_the_same_change_is_processed_once() {
	let storage = Arc::new(MemoryStorage::new("/docs"));
	let watcher = ChannelWatchProvider::new();
	let processor = RecordingProcessor::succeeding("recorder");
	let service = build(
		Location::new("docs", "/docs").watched(true),
		storage.clone(),
		processor.clone(),
		watcher.clone(),
	);
	service.start().await.unwrap();
	assert!(watcher.is_subscribed("docs"));

	storage.put("a.txt", "hello");
	assert!(watcher.emit("docs", FsEvent::create(storage.absolute("a.txt"))));
	assert!(eventually(|| processor.attempt_count() == 1).await);

	// The scan still reports the file, but it isn't queued a second time
	let ctx = service
		.scan_location("docs", ScanOptions::default(), None)
		.await
		.unwrap();
	assert_eq!(ctx.events.len(), 1);
	assert_eq!(ctx.events[0].event_type, EventType::Added);
	service
		.wait_for_queue_empty(Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(processor.attempt_count(), 1);

	// A real follow-up change goes through
	storage.put("a.txt", "hello again");
	assert!(watcher.emit("docs", FsEvent::modify(storage.absolute("a.txt"))));
	assert!(eventually(|| processor.attempt_count() == 2).await);
	assert_eq!(
		processor.seen(),
		vec![
			("a.txt".to_string(), EventType::Added),
			("a.txt".to_string(), EventType::Modified)
		]
	);

	service.stop().await.unwrap();
	assert!(!watcher.is_subscribed("docs"));
}

#[tokio::test]
async fn watcher_rename_becomes_delete_and_add() {
	let storage = Arc::new(MemoryStorage::new("/docs"));
	let watcher = ChannelWatchProvider::new();
	let processor = RecordingProcessor::succeeding("recorder");
	let service = build(
		Location::new("docs", "/docs").watched(true).with_ignore(["*.swp"]),
		storage.clone(),
		processor.clone(),
		watcher.clone(),
	);
	service.start().await.unwrap();

	storage.put("new.txt", "content");
	watcher.emit(
		"docs",
		FsEvent::rename(storage.absolute("old.txt"), storage.absolute("new.txt")),
	);
	watcher.emit("docs", FsEvent::create(storage.absolute(".new.txt.swp")));

	assert!(eventually(|| processor.attempt_count() == 2).await);
	assert_eq!(
		processor.seen(),
		vec![
			("old.txt".to_string(), EventType::Deleted),
			("new.txt".to_string(), EventType::Added)
		]
	);

	service.stop().await.unwrap();
}

#[tokio::test]
async fn stop_keeps_queued_events_for_next_start() {
	let processor = RecordingProcessor::succeeding("recorder");
	let service = build(
		Location::new("docs", "/docs"),
		Arc::new(MemoryStorage::new("/docs")),
		processor.clone(),
		ChannelWatchProvider::new(),
	);
	service.start().await.unwrap();
	service.pause_location("docs").await.unwrap();

	let handler = service.handler("docs").unwrap();
	handler.enqueue(deleted("a.txt"));
	handler.enqueue(deleted("b.txt"));

	service.stop().await.unwrap();
	let status = service.location_status("docs").await.unwrap();
	assert_eq!(status.state, LocationState::Stopped);
	assert_eq!(status.queue_size, 2);

	service.start().await.unwrap();
	service
		.wait_for_queue_empty(Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(processor.attempt_count(), 2);
	service.stop().await.unwrap();
}

#[tokio::test]
async fn scan_while_stopped_queues_until_started() {
	let storage = Arc::new(MemoryStorage::new("/docs"));
	let processor = RecordingProcessor::succeeding("recorder");
	let service = build(
		Location::new("docs", "/docs"),
		storage.clone(),
		processor.clone(),
		ChannelWatchProvider::new(),
	);
	storage.put("a.txt", "a");

	service
		.scan_location("docs", ScanOptions::default(), None)
		.await
		.unwrap();
	assert_eq!(service.queue_size(), 1);
	assert_eq!(processor.attempt_count(), 0);

	service.start().await.unwrap();
	service
		.wait_for_queue_empty(Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(processor.attempt_count(), 1);
	assert!(service
		.location_status("docs")
		.await
		.unwrap()
		.last_scan
		.is_some());
	service.stop().await.unwrap();
}

#[tokio::test]
async fn dry_run_neither_queues_nor_commits() {
	let storage = Arc::new(MemoryStorage::new("/docs"));
	let service = build(
		Location::new("docs", "/docs"),
		storage.clone(),
		RecordingProcessor::succeeding("recorder"),
		ChannelWatchProvider::new(),
	);
	storage.put("a.txt", "a");

	let dry = service
		.scan_location("docs", ScanOptions::dry_run(), None)
		.await
		.unwrap();
	assert_eq!(dry.events.len(), 1);
	assert!(service.is_queue_empty().await);

	// Baseline untouched, so a real scan finds the same change
	let real = service
		.scan_location("docs", ScanOptions::default(), None)
		.await
		.unwrap();
	assert_eq!(real.events.len(), 1);
	assert_eq!(service.queue_size(), 1);
}

#[tokio::test]
async fn monitors_observe_scans_and_misbehaving_ones_are_isolated() {
	let storage = Arc::new(MemoryStorage::new("/docs"));
	let recording = RecordingMonitor::new();
	let panicking = Arc::new(PanickingMonitor::default());
	let service = FileMonitoringService::builder()
		.location(Location::new("docs", "/docs"), storage.clone())
		.monitoring_behavior(panicking.clone())
		.monitoring_behavior(recording.clone())
		.build()
		.unwrap();
	storage.put("a.txt", "a");
	storage.put("b.txt", "b");

	let ctx = service
		.scan_location("docs", ScanOptions::default(), None)
		.await
		.unwrap();

	assert_eq!(ctx.events.len(), 2);
	assert!(ctx.finished_at.is_some());
	assert_eq!(
		recording.calls(),
		vec![
			"started:docs",
			"detected:Added:a.txt",
			"detected:Added:b.txt",
			"completed:2"
		]
	);
	assert_eq!(panicking.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
	assert_eq!(service.queue_size(), 2);

	let metrics = service.scan_metrics();
	assert_eq!(metrics.scans_completed, 1);
	assert_eq!(metrics.files_added, 2);
}

#[tokio::test(start_paused = true)]
async fn scheduled_scans_pick_up_changes() {
	let storage = Arc::new(MemoryStorage::new("/docs"));
	let processor = RecordingProcessor::succeeding("recorder");
	let service = build(
		Location::new("docs", "/docs").with_scan_interval(Duration::from_secs(10)),
		storage.clone(),
		processor.clone(),
		ChannelWatchProvider::new(),
	);
	service.start().await.unwrap();

	storage.put("a.txt", "a");
	tokio::time::sleep(Duration::from_secs(11)).await;
	assert!(eventually(|| processor.attempt_count() == 1).await);

	storage.delete("a.txt");
	tokio::time::sleep(Duration::from_secs(10)).await;
	assert!(eventually(|| processor.attempt_count() == 2).await);
	assert_eq!(processor.seen()[1], ("a.txt".to_string(), EventType::Deleted));

	service.stop().await.unwrap();
}
