//! Filesystem watcher emitting normalized events
//!
//! Wraps `notify` and turns its raw, platform flavoured notifications into a
//! small set of [`FsEvent`]s. Writes usually arrive as a burst of create and
//! modify notifications, so those are held back by a [`StabilizingHandler`]
//! until the path has been quiet for the configured window.
//!
//! ```no_run
//! # async fn run() -> filemon_fs_watcher::Result<()> {
//! use filemon_fs_watcher::{FsWatcher, WatcherConfig};
//!
//! let watcher = FsWatcher::new(WatcherConfig::default());
//! let mut handle = watcher.watch("/srv/inbox")?;
//! while let Some(event) = handle.recv().await {
//! 	println!("{:?} {}", event.kind, event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod handler;
mod watcher;

pub use error::{Error, Result};
pub use event::{FsEvent, FsEventKind, RawEventKind, RawNotifyEvent};
pub use handler::{EventHandler, StabilizingHandler};
pub use watcher::{FsWatcher, WatchHandle, WatcherConfig};
