use super::{
	Directive, ProcessingContext, ProcessingFailure, ProcessingResult, ProcessorBehavior,
	RETRY_ATTEMPT,
};

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	#[serde(rename = "initial_delay_ms", with = "millis")]
	pub initial_delay: Duration,
	/// Total attempts, including the first one
	pub max_attempts: u32,
	/// Add up to 50% random extra delay
	pub jitter: bool,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			initial_delay: Duration::from_secs(1),
			max_attempts: 3,
			jitter: false,
		}
	}
}

impl RetryPolicy {
	/// `initial_delay * 2^attempt`, where `attempt` is zero based
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
		let delay = self.initial_delay.saturating_mul(factor);

		if self.jitter && !delay.is_zero() {
			let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
			delay.saturating_add(Duration::from_millis(extra))
		} else {
			delay
		}
	}
}

/// Asks for another attempt after a retryable failure, with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct RetryBehavior {
	policy: RetryPolicy,
}

impl RetryBehavior {
	pub const NAME: &'static str = "retry";

	pub fn new(policy: RetryPolicy) -> Self {
		Self { policy }
	}

	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}
}

#[async_trait]
impl ProcessorBehavior for RetryBehavior {
	fn name(&self) -> &str {
		Self::NAME
	}

	async fn before_process(&self, ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure> {
		if ctx.item(RETRY_ATTEMPT).is_none() {
			ctx.set_item(RETRY_ATTEMPT, 0u32);
		}
		Ok(())
	}

	async fn after_process(
		&self,
		ctx: &mut ProcessingContext,
		result: &ProcessingResult,
	) -> Directive {
		let Some(failure) = result.failure() else {
			return Directive::Proceed;
		};

		let attempt = ctx.retry_attempt();
		if !failure.retryable {
			debug!(path = %ctx.event().path, "Failure is not retryable");
			return Directive::Proceed;
		}

		if attempt + 1 >= self.policy.max_attempts {
			warn!(
				location = %ctx.event().location,
				path = %ctx.event().path,
				attempts = attempt + 1,
				error = %failure.message,
				"Giving up on event after exhausting retries",
			);
			return Directive::Proceed;
		}

		let after = self.policy.delay_for(attempt);
		ctx.set_item(RETRY_ATTEMPT, attempt + 1);

		debug!(
			path = %ctx.event().path,
			attempt = attempt + 1,
			?after,
			error = %failure.message,
			"Scheduling retry",
		);

		Directive::Retry { after }
	}
}

mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
