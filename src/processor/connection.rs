//! Failover connection handling. The poller owns one [`ConnectionManager`]
//! and asks it for the current client; a failed endpoint is moved to the back
//! of the list and the next one is tried.

use super::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::chain::{ChainClient, ChainClientFactory};
use anyhow::{anyhow, bail, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

struct ConnectionState {
    endpoints: VecDeque<String>,
    current: Option<Arc<dyn ChainClient>>,
}

pub struct ConnectionManager {
    factory: Arc<dyn ChainClientFactory>,
    state: Mutex<ConnectionState>,
    initial_delay: Duration,
    max_delay: Duration,
    max_passes: Option<usize>,
}

impl ConnectionManager {
    pub fn new(endpoints: Vec<String>, factory: Arc<dyn ChainClientFactory>) -> Result<Self> {
        if endpoints.is_empty() {
            bail!("at least one RPC endpoint is required");
        }
        Ok(Self {
            factory,
            state: Mutex::new(ConnectionState {
                endpoints: endpoints.into(),
                current: None,
            }),
            initial_delay: DEFAULT_RECONNECT_INITIAL_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_passes: None,
        })
    }

    pub fn with_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self
    }

    /// Gives up after `passes` full rounds over the endpoint list. Unbounded
    /// by default.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = Some(passes.max(1));
        self
    }

    /// Failover order, preferred endpoint first.
    pub fn endpoints(&self) -> Vec<String> {
        self.lock().endpoints.iter().cloned().collect()
    }

    pub fn current(&self) -> Option<Arc<dyn ChainClient>> {
        self.lock().current.clone()
    }

    /// Returns the current client, connecting first if there is none.
    pub async fn client(&self, shutdown: &CancellationToken) -> Result<Arc<dyn ChainClient>> {
        match self.current() {
            Some(client) => Ok(client),
            None => self.connect(shutdown).await,
        }
    }

    /// Tries every endpoint in failover order, repeating full passes with
    /// backoff until one answers or `shutdown` fires.
    pub async fn connect(&self, shutdown: &CancellationToken) -> Result<Arc<dyn ChainClient>> {
        let mut backoff =
            RetryBackoff::new(self.initial_delay, self.max_delay).with_cancellation(shutdown);
        if let Some(passes) = self.max_passes {
            backoff = backoff.with_max_attempts(passes);
        }

        retry_with_backoff(
            backoff,
            |_| self.connect_pass(),
            |pass, delay, err, will_retry| {
                warn!(
                    pass,
                    backoff_ms = delay.as_millis() as u64,
                    will_retry,
                    error = %format!("{err:#}"),
                    "no rpc endpoint reachable"
                );
            },
            |_, _| RetryDisposition::Retry,
        )
        .await
    }

    /// Drops the current client and moves its endpoint to the back of the
    /// list. Returns the endpoint that will be tried next.
    pub fn rotate(&self) -> Option<String> {
        let mut state = self.lock();
        if let Some(client) = state.current.take() {
            let endpoint = client.endpoint().to_string();
            demote(&mut state.endpoints, &endpoint);
            warn!(endpoint, next = ?state.endpoints.front(), "rotating rpc endpoint");
        }
        state.endpoints.front().cloned()
    }

    async fn connect_pass(&self) -> Result<Arc<dyn ChainClient>> {
        let mut last_error = None;
        for endpoint in self.endpoints() {
            match self.factory.connect(&endpoint).await {
                Ok(client) => {
                    self.lock().current = Some(client.clone());
                    info!(endpoint, "connected to rpc endpoint");
                    return Ok(client);
                }
                Err(err) => {
                    warn!(endpoint, error = %format!("{err:#}"), "rpc endpoint unavailable");
                    demote(&mut self.lock().endpoints, &endpoint);
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no rpc endpoints configured")))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().expect("connection state mutex poisoned")
    }
}

fn demote(endpoints: &mut VecDeque<String>, endpoint: &str) {
    if let Some(position) = endpoints.iter().position(|candidate| candidate == endpoint) {
        if let Some(removed) = endpoints.remove(position) {
            endpoints.push_back(removed);
        }
    }
}
