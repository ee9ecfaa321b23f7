//! History polling until a prompt's output image exists.
//!
//! Each tick queries `GET /history/{prompt_id}`. An absent record keeps
//! the prompt pending and schedules another tick after a fixed interval.
//! A failed query ends the wait immediately. The wait is bounded by an
//! optional deadline and can be aborted through a [`CancellationToken`].

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{inspect_history, ArtifactLocator, HistoryState};

/// Timing parameters for [`await_completion`].
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Pause between pending ticks.
    pub interval: Duration,
    /// Overall wait ceiling. `None` waits until the backend answers.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// A history query failed; queries are not retried.
    #[error("History query failed: {0}")]
    Request(#[from] ComfyUIApiError),

    #[error("Generation failed on the backend: {0}")]
    BackendFailed(String),

    #[error("Generation did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("Waiting for generation was cancelled")]
    Cancelled,
}

/// Poll until `output_node` of `prompt_id` reports an image.
///
/// Suspends between ticks, so many waits can share one runtime. Returns
/// exactly once: the first completed record wins and later records are
/// never fetched.
pub async fn await_completion(
    api: &ComfyUIApi,
    prompt_id: &str,
    output_node: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<ArtifactLocator, PollError> {
    let deadline = policy.timeout.map(|t| Instant::now() + t);
    let timed_out = || PollError::TimedOut(policy.timeout.unwrap_or_default());
    let mut tick = 0u32;

    loop {
        tick += 1;

        let history = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = sleep_until(deadline) => return Err(timed_out()),
            result = api.get_history(prompt_id) => result?,
        };

        match inspect_history(&history, prompt_id, output_node) {
            HistoryState::Complete(locator) => {
                tracing::info!(
                    prompt_id = %prompt_id,
                    tick,
                    filename = %locator.filename,
                    "Generation complete",
                );
                return Ok(locator);
            }
            HistoryState::Failed(message) => {
                tracing::error!(prompt_id = %prompt_id, tick, error = %message, "Generation failed");
                return Err(PollError::BackendFailed(message));
            }
            HistoryState::Pending => {
                tracing::debug!(prompt_id = %prompt_id, tick, "Generation pending");
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = sleep_until(deadline) => return Err(timed_out()),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
