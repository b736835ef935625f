//! Bounded exponential retry around opening the inbound runtime stream.

use std::time::Duration;

use crate::runtime::{
    AgentOptions, AgentRuntime, MessageStream, PromptEnvelope, RuntimeError,
};

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(10);

/// Delay before retry number `attempt` (1-based):
/// `min(INITIAL_DELAY * 2^(attempt-1), MAX_DELAY)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
    (INITIAL_DELAY * factor).min(MAX_DELAY)
}

/// Open the inbound stream, retrying transient failures up to
/// [`MAX_RETRIES`] attempts. `on_retry(attempt, delay, error)` fires before
/// each sleep so the UI can reflect the recovery.
pub async fn open_with_retry<F>(
    runtime: &dyn AgentRuntime,
    prompt: &[PromptEnvelope],
    options: &AgentOptions,
    mut on_retry: F,
) -> Result<MessageStream, RuntimeError>
where
    F: FnMut(u32, Duration, &RuntimeError),
{
    let mut attempt = 1;
    loop {
        match runtime.open_stream(prompt.to_vec(), options.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    attempt,
                    max = MAX_RETRIES,
                    "stream open failed ({e}), retrying in {delay:?}"
                );
                on_retry(attempt, delay, &e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
