//! Exponential backoff loop shared by reconnect logic.

use anyhow::Result;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Returned when the shutdown token fires while waiting to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("retry cancelled by shutdown")]
pub struct RetryCancelled;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries until cancelled.
    pub max_attempts: Option<usize>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            max_attempts: None,
            cancellation: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_some_and(CancellationToken::is_cancelled)
    }

    fn exhausted(&self, attempt: usize) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Runs `operation` until it succeeds, `classify_error` aborts, attempts run
/// out or the token is cancelled. `on_retry` sees every failure that was
/// classified as retryable, with `will_retry` false on the last one.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        if config.is_cancelled() {
            return Err(RetryCancelled.into());
        }
        attempt += 1;

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if let RetryDisposition::Abort = classify_error(attempt, &err) {
            return Err(err);
        }

        let will_retry = !config.exhausted(attempt);
        on_retry(attempt, delay, &err, will_retry);
        if !will_retry {
            return Err(err);
        }

        pause(delay, config.cancellation).await?;
        delay = next_delay(delay, config.max_delay);
    }
}

async fn pause(delay: Duration, cancellation: Option<&CancellationToken>) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    match cancellation {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(RetryCancelled.into()),
            _ = sleep(delay) => Ok(()),
        },
        None => {
            sleep(delay).await;
            Ok(())
        }
    }
}

fn next_delay(current: Duration, max_delay: Duration) -> Duration {
    if current.is_zero() {
        return max_delay.min(Duration::from_millis(1));
    }
    current.saturating_mul(2).min(max_delay)
}
