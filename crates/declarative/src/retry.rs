//! Retry with exponential backoff, and per-call deadlines.
//!
//! Provider calls are retried only when the error is transient (see
//! [`ProviderError::is_retryable`]). A call that overruns its deadline is
//! reported as [`ProviderError::Timeout`], which is transient too. The
//! overrunning call keeps running on its own thread: providers cannot abort
//! an operation halfway. [`with_deadline`] drops its late result; callers
//! that must not repeat a call hold on to the [`InFlight`] handle instead.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Delay after a failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Notified before each retry.
pub trait RetryCallback: Sync {
    /// `attempt` is the 1-indexed attempt that just failed.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// Logs retries at warn level, tagged with what is being retried.
pub struct LogRetries<'a>(pub &'a str);

impl RetryCallback for LogRetries<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration) {
        log::warn!(
            "{}: attempt {}/{} failed: {}. Retrying in {:?}",
            self.0,
            attempt,
            max_attempts,
            error,
            delay
        );
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget runs out. The operation receives the 0-indexed attempt number.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> ProviderResult<T>
where
    F: FnMut(u32) -> ProviderResult<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt + 1 >= max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, max_attempts, &e, delay);
                }
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// A provider call running on its own thread
pub struct InFlight<T> {
    rx: mpsc::Receiver<ProviderResult<T>>,
}

impl<T: Send + 'static> InFlight<T> {
    /// Start `call` on a helper thread
    pub fn spawn<F>(call: F) -> ProviderResult<Self>
    where
        F: FnOnce() -> ProviderResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("provider-call".into())
            .spawn(move || {
                // receiver is gone once nobody waits any more
                let _ = tx.send(call());
            })
            .map_err(|e| ProviderError::transient(format!("failed to spawn provider call: {e}")))?;
        Ok(Self { rx })
    }

    /// Wait up to `timeout` for the result. `None` while the call is still
    /// running, so the handle can be waited on again.
    pub fn wait(&self, timeout: Duration) -> Option<ProviderResult<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(ProviderError::transient(
                "provider call ended without a result",
            ))),
        }
    }
}

/// Run `call` on a helper thread and give up waiting after `timeout`.
pub fn with_deadline<T, F>(timeout: Duration, call: F) -> ProviderResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ProviderResult<T> + Send + 'static,
{
    InFlight::spawn(call)?
        .wait(timeout)
        .unwrap_or(Err(ProviderError::Timeout(timeout)))
}
