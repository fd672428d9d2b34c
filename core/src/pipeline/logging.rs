use super::{Directive, ProcessingContext, ProcessingFailure, ProcessingResult, ProcessorBehavior};

use async_trait::async_trait;
use tracing::{info, warn};

/// Logs every attempt of every event, never alters control flow
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingBehavior;

impl LoggingBehavior {
	pub const NAME: &'static str = "logging";
}

#[async_trait]
impl ProcessorBehavior for LoggingBehavior {
	fn name(&self) -> &str {
		Self::NAME
	}

	async fn before_process(&self, ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure> {
		let event = ctx.event();
		info!(
			location = %event.location,
			path = %event.path,
			event_type = %event.event_type,
			source = %event.source,
			attempt = ctx.retry_attempt() + 1,
			"Processing event",
		);
		Ok(())
	}

	async fn after_process(
		&self,
		ctx: &mut ProcessingContext,
		result: &ProcessingResult,
	) -> Directive {
		let event = ctx.event();
		match result {
			ProcessingResult::Success => info!(
				location = %event.location,
				path = %event.path,
				event_type = %event.event_type,
				"Processed event",
			),
			ProcessingResult::Failure(failure) => warn!(
				location = %event.location,
				path = %event.path,
				event_type = %event.event_type,
				retryable = failure.retryable,
				error = %failure.message,
				"Failed to process event",
			),
		}

		Directive::Proceed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::{EventSource, FileEvent};

	use tracing_test::traced_test;

	#[tokio::test]
	#[traced_test]
	async fn test_logs_failures_without_changing_flow() {
		let mut ctx =
			ProcessingContext::new(FileEvent::deleted("docs".into(), "gone.txt", EventSource::Watcher));

		LoggingBehavior.before_process(&mut ctx).await.unwrap();
		let directive = LoggingBehavior
			.after_process(
				&mut ctx,
				&ProcessingResult::Failure(ProcessingFailure::retryable("disk busy")),
			)
			.await;

		assert_eq!(directive, Directive::Proceed);
		assert!(ctx.items.is_empty());
		assert!(logs_contain("Processing event"));
		assert!(logs_contain("disk busy"));
	}
}
