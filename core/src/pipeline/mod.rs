//! Per-event processing pipeline
//!
//! Each dequeued [`FileEvent`] runs through an ordered chain of
//! [`ProcessorBehavior`]s wrapped around the terminal [`FileProcessor`]s:
//!
//! ```text
//! before(b0) -> before(b1) -> processors -> after(b1) -> after(b0)
//! ```
//!
//! A behavior may fail in `before_process`, which skips the processors and
//! unwinds through the behaviors already entered. After hooks answer with a
//! [`Directive`]; a `Retry` makes the driver wait and run the chain again
//! with the same [`ProcessingContext`], so per-event state such as the retry
//! attempt carries over between attempts.
//!
//! A [`Pipeline`] is an immutable snapshot. Handlers swap whole snapshots
//! when processors are toggled, and every event uses the one it started with.

mod logging;
mod metrics;
mod mirror;
mod retry;

pub use logging::LoggingBehavior;
pub use metrics::{ProcessingMetrics, ProcessingStats};
pub use mirror::MirrorProcessor;
pub use retry::{RetryBehavior, RetryPolicy};

use crate::{error::MonitorError, event::FileEvent, location::LocationName};

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Key under which the retry behavior stores the zero based attempt number
pub const RETRY_ATTEMPT: &str = "retry_attempt";

/// Mutable state threaded through one event's trip down the pipeline
#[derive(Debug, Clone)]
pub struct ProcessingContext {
	event: FileEvent,
	pub items: HashMap<String, Value>,
}

impl ProcessingContext {
	pub fn new(event: FileEvent) -> Self {
		Self {
			event,
			items: HashMap::new(),
		}
	}

	pub fn event(&self) -> &FileEvent {
		&self.event
	}

	pub fn into_event(self) -> FileEvent {
		self.event
	}

	pub fn item(&self, key: &str) -> Option<&Value> {
		self.items.get(key)
	}

	pub fn set_item(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.items.insert(key.into(), value.into());
	}

	pub fn retry_attempt(&self) -> u32 {
		self.item(RETRY_ATTEMPT)
			.and_then(Value::as_u64)
			.and_then(|attempt| u32::try_from(attempt).ok())
			.unwrap_or(0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingFailure {
	pub message: String,
	pub retryable: bool,
}

impl ProcessingFailure {
	pub fn retryable(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			retryable: true,
		}
	}

	pub fn fatal(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			retryable: false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
	Success,
	Failure(ProcessingFailure),
}

impl ProcessingResult {
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success)
	}

	pub fn failure(&self) -> Option<&ProcessingFailure> {
		match self {
			Self::Success => None,
			Self::Failure(failure) => Some(failure),
		}
	}
}

/// What an after hook asks the driver to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
	Proceed,
	Retry { after: Duration },
}

/// A stage wrapped around the terminal processors
#[async_trait]
pub trait ProcessorBehavior: Send + Sync {
	fn name(&self) -> &str;

	/// Runs in chain order. An error skips the processors and inner behaviors.
	async fn before_process(&self, _ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure> {
		Ok(())
	}

	/// Runs in reverse chain order, only for behaviors whose before hook succeeded
	async fn after_process(
		&self,
		_ctx: &mut ProcessingContext,
		_result: &ProcessingResult,
	) -> Directive {
		Directive::Proceed
	}
}

/// The terminal action for an event
#[async_trait]
pub trait FileProcessor: Send + Sync {
	fn name(&self) -> &str;

	async fn process(&self, ctx: &mut ProcessingContext) -> ProcessingResult;
}

/// Every behavior and processor known to the process, in registration order
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
	behaviors: Vec<Arc<dyn ProcessorBehavior>>,
	processors: Vec<Arc<dyn FileProcessor>>,
}

impl ProcessorRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_behavior(&mut self, behavior: Arc<dyn ProcessorBehavior>) {
		self.behaviors.push(behavior);
	}

	pub fn register_processor(&mut self, processor: Arc<dyn FileProcessor>) {
		self.processors.push(processor);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.behaviors.iter().any(|b| b.name() == name)
			|| self.processors.iter().any(|p| p.name() == name)
	}

	pub fn names(&self) -> Vec<String> {
		self.behaviors
			.iter()
			.map(|b| b.name().to_string())
			.chain(self.processors.iter().map(|p| p.name().to_string()))
			.collect()
	}

	/// Snapshot with the named stages enabled, in the given order.
	///
	/// `None` enables everything in registration order.
	pub fn build(
		&self,
		location: &LocationName,
		enabled: Option<&[String]>,
	) -> Result<Pipeline, MonitorError> {
		let Some(enabled) = enabled else {
			return Ok(Pipeline {
				behaviors: self.behaviors.clone(),
				processors: self.processors.clone(),
			});
		};

		let mut pipeline = Pipeline::default();
		for name in enabled {
			if pipeline.contains(name) {
				continue;
			}

			if let Some(behavior) = self.behaviors.iter().find(|b| b.name() == name) {
				pipeline.behaviors.push(Arc::clone(behavior));
			} else if let Some(processor) = self.processors.iter().find(|p| p.name() == name) {
				pipeline.processors.push(Arc::clone(processor));
			} else {
				return Err(MonitorError::ProcessorNotFound {
					location: location.clone(),
					processor: name.clone(),
				});
			}
		}

		Ok(pipeline)
	}
}

/// Final result of running one event through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
	pub result: ProcessingResult,
	pub attempts: u32,
}

#[derive(Clone, Default)]
pub struct Pipeline {
	behaviors: Vec<Arc<dyn ProcessorBehavior>>,
	processors: Vec<Arc<dyn FileProcessor>>,
}

impl Pipeline {
	pub fn names(&self) -> Vec<String> {
		self.behaviors
			.iter()
			.map(|b| b.name().to_string())
			.chain(self.processors.iter().map(|p| p.name().to_string()))
			.collect()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.behaviors.iter().any(|b| b.name() == name)
			|| self.processors.iter().any(|p| p.name() == name)
	}

	/// Copy of this snapshot without the named stage
	pub fn without(&self, name: &str) -> Self {
		Self {
			behaviors: self
				.behaviors
				.iter()
				.filter(|b| b.name() != name)
				.cloned()
				.collect(),
			processors: self
				.processors
				.iter()
				.filter(|p| p.name() != name)
				.cloned()
				.collect(),
		}
	}

	/// Drive the event until no after hook asks for another attempt.
	///
	/// Fails only with [`MonitorError::Cancelled`], when `cancel` fires while
	/// waiting out a retry delay.
	pub async fn run(
		&self,
		ctx: &mut ProcessingContext,
		cancel: &CancellationToken,
	) -> Result<PipelineOutcome, MonitorError> {
		let mut attempts = 0;

		loop {
			attempts += 1;
			let (result, directive) = self.run_once(ctx).await;

			match directive {
				Directive::Proceed => return Ok(PipelineOutcome { result, attempts }),
				Directive::Retry { after } => {
					trace!(path = %ctx.event().path, ?after, "Waiting before retrying event");
					tokio::select! {
						_ = cancel.cancelled() => return Err(MonitorError::Cancelled),
						_ = tokio::time::sleep(after) => {}
					}
				}
			}
		}
	}

	async fn run_once(&self, ctx: &mut ProcessingContext) -> (ProcessingResult, Directive) {
		let mut entered = 0;
		let mut result = ProcessingResult::Success;

		for behavior in &self.behaviors {
			if let Err(failure) = behavior.before_process(ctx).await {
				result = ProcessingResult::Failure(failure);
				break;
			}
			entered += 1;
		}

		if entered == self.behaviors.len() {
			result = self.process(ctx).await;
		}

		let mut directive = Directive::Proceed;
		for behavior in self.behaviors[..entered].iter().rev() {
			let requested = behavior.after_process(ctx, &result).await;
			if directive == Directive::Proceed {
				directive = requested;
			}
		}

		(result, directive)
	}

	async fn process(&self, ctx: &mut ProcessingContext) -> ProcessingResult {
		for processor in &self.processors {
			let result = processor.process(ctx).await;
			if !result.is_success() {
				return result;
			}
		}

		ProcessingResult::Success
	}
}
