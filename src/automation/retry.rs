use crate::domain::model::Action;
use crate::domain::ports::InstanceController;
use crate::utils::error::{is_transient_message, MumuError};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Exponential backoff for failures that look temporary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryManager {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryManager {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt + 1`, or `None` when the error is not
    /// worth retrying or the retries are used up.
    pub fn should_retry(&self, error: &str, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries || !is_transient_message(error) {
            return None;
        }
        Some(self.backoff(attempt))
    }

    pub fn should_retry_error(&self, error: &MumuError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        if error.is_transient() || is_transient_message(&error.to_string()) {
            Some(self.backoff(attempt))
        } else {
            None
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceOutcome {
    pub index: u32,
    pub success: bool,
    pub message: String,
    pub attempts: u32,
}

/// Backoff that always sleeps the full delay.
pub async fn sleep_backoff(delay: Duration) -> bool {
    tokio::time::sleep(delay).await;
    true
}

/// Launches `index`, retrying temporary failures. `backoff` waits out each
/// retry delay and returns `false` to give up early.
pub async fn launch_with_retry<C, B, F>(
    controller: &C,
    index: u32,
    retry: &RetryManager,
    mut backoff: B,
) -> InstanceOutcome
where
    C: InstanceController + ?Sized,
    B: FnMut(Duration) -> F,
    F: Future<Output = bool>,
{
    let mut attempt = 0;
    loop {
        match controller.control(&[index], Action::Launch).await {
            Ok(output) => {
                let message = if output.trim().is_empty() {
                    format!("Instance {} started successfully", index)
                } else {
                    output
                };
                return InstanceOutcome {
                    index,
                    success: true,
                    message,
                    attempts: attempt + 1,
                };
            }
            Err(e) => match retry.should_retry_error(&e, attempt) {
                Some(delay) => {
                    tracing::warn!(
                        "🔁 Instance {} failed ({}), retry {}/{} in {:?}",
                        index,
                        e,
                        attempt + 1,
                        retry.max_retries(),
                        delay
                    );
                    if !backoff(delay).await {
                        return InstanceOutcome {
                            index,
                            success: false,
                            message: format!("{} (retry cancelled)", e),
                            attempts: attempt + 1,
                        };
                    }
                    attempt += 1;
                }
                None => {
                    return InstanceOutcome {
                        index,
                        success: false,
                        message: e.to_string(),
                        attempts: attempt + 1,
                    }
                }
            },
        }
    }
}
