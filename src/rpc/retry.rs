//! Retry context and canned log messages for the Tendermint client, so every
//! method reports breaker state, retries and exhaustion the same way.

use crate::rpc::circuit_breaker::CircuitState;
use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(height) = $ctx.height {
            tracing::$level!(endpoint = %$ctx.endpoint, height, $($rest)*);
        } else {
            tracing::$level!(endpoint = %$ctx.endpoint, $($rest)*);
        }
    }};
}

/// Log labels for one RPC method.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) method: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) timeout: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) unavailable: Option<&'static str>,
}

#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    endpoint: &'a str,
    height: Option<u64>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(endpoint: &'a str, messages: &'a RetryMessages) -> Self {
        Self {
            endpoint,
            height: None,
            messages,
        }
    }

    pub(crate) fn at_height(endpoint: &'a str, messages: &'a RetryMessages, height: u64) -> Self {
        Self {
            endpoint,
            height: Some(height),
            messages,
        }
    }

    pub(crate) fn method(&self) -> &'static str {
        self.messages.method
    }

    pub(crate) fn log_permit(&self, state: CircuitState) {
        log_with_retry_ctx!(trace, self, breaker_state = ?state, method = self.messages.method, "circuit breaker permit acquired");
    }

    pub(crate) fn log_circuit_open(&self) {
        log_with_retry_ctx!(warn, self, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_unavailable(&self, attempt: usize) {
        if let Some(message) = self.messages.unavailable {
            log_with_retry_ctx!(debug, self, attempt, "{}", message);
        }
    }

    pub(crate) fn log_timeout(&self, attempt: usize, backoff: Duration) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            "{}",
            self.messages.timeout
        );
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }
}

fn duration_to_millis(backoff: Duration) -> u64 {
    backoff.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const STATUS_RETRY: RetryMessages = RetryMessages {
    method: "status",
    circuit_open: "RPC circuit breaker open; rejecting status request",
    timeout: "status timed out; retrying",
    retry: "status failed; retrying",
    exhausted: "status exhausted retries",
    unavailable: None,
};

pub(crate) const BLOCK_RETRY: RetryMessages = RetryMessages {
    method: "block",
    circuit_open: "RPC circuit breaker open; rejecting block request",
    timeout: "block request timed out; retrying",
    retry: "block request failed; retrying",
    exhausted: "block request exhausted retries",
    unavailable: Some("block not yet available on this node"),
};

pub(crate) const BLOCK_RESULTS_RETRY: RetryMessages = RetryMessages {
    method: "block_results",
    circuit_open: "RPC circuit breaker open; rejecting block_results request",
    timeout: "block_results timed out; retrying",
    retry: "block_results failed; retrying",
    exhausted: "block_results exhausted retries",
    unavailable: Some("block results not yet available on this node"),
};
