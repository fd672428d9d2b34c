//! Location monitoring engine
//!
//! Watches a set of named locations for file changes, diffs them against a
//! committed baseline, and pushes every detected change through a per
//! location processing pipeline with logging and retry behaviors.
//!
//! ```text
//! FileMonitoringService
//!   └─ LocationHandler (one per location)
//!        ├─ Scanner ──┐
//!        ├─ watcher ──┼─> EventQueue ─> processing loop ─> Pipeline
//!        └─ schedule ─┘
//! ```

pub mod baseline;
pub mod config;
pub mod error;
pub mod event;
pub mod location;
pub mod logging;
pub mod monitoring;
pub mod pipeline;
pub mod scanner;
pub mod service;
pub mod storage;
pub mod watch;

pub use error::MonitorError;
pub use event::{EventSource, EventType, FileEvent};
pub use location::{Location, LocationHandler, LocationName, LocationState, LocationStatus};
pub use scanner::{FileScanContext, ScanOptions, ScanProgress};
pub use service::{FileMonitoringService, ServiceBuilder};
