use crate::processor::block::DEFAULT_GAS_WINDOW;
use crate::queue::{FetchQueueSettings, QueuePolicy};
use crate::reconcile::{BalanceReconciler, DEFAULT_MAX_ADDRESSES};
use crate::rpc::options::{EventEncoding, RpcClientOptions};
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

pub const ENV_PREFIX: &str = "BADGE_INDEXER_";

/// Runtime configuration for the indexer.
///
/// All instances must be constructed via [`IndexerConfig::builder`],
/// [`IndexerConfig::new`] or [`IndexerConfig::from_env`] so invariants are
/// validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    rpc_urls: Vec<String>,
    rpc_timeout: Duration,
    event_encoding: EventEncoding,
    poll_interval: Duration,
    metrics_interval: Duration,
    queue_partition: u32,
    queue_partitions: u32,
    queue_batch_size: usize,
    queue_poll_interval: Duration,
    queue_base_delay: Duration,
    max_queue_retries: u32,
    fetch_timeout: Duration,
    refresh_min_interval: Duration,
    max_reconciled_addresses: usize,
    gas_window: usize,
}

pub struct IndexerConfigParams {
    pub rpc_urls: Vec<String>,
    pub rpc_timeout: Duration,
    pub event_encoding: EventEncoding,
    pub poll_interval: Duration,
    pub metrics_interval: Duration,
    pub queue_partition: u32,
    pub queue_partitions: u32,
    pub queue_batch_size: usize,
    pub queue_poll_interval: Duration,
    pub queue_base_delay: Duration,
    pub max_queue_retries: u32,
    pub fetch_timeout: Duration,
    pub refresh_min_interval: Duration,
    pub max_reconciled_addresses: usize,
    pub gas_window: usize,
}

impl IndexerConfig {
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    pub fn new(params: IndexerConfigParams) -> Result<Self> {
        let IndexerConfigParams {
            rpc_urls,
            rpc_timeout,
            event_encoding,
            poll_interval,
            metrics_interval,
            queue_partition,
            queue_partitions,
            queue_batch_size,
            queue_poll_interval,
            queue_base_delay,
            max_queue_retries,
            fetch_timeout,
            refresh_min_interval,
            max_reconciled_addresses,
            gas_window,
        } = params;

        let config = Self {
            rpc_urls: rpc_urls
                .into_iter()
                .map(trimmed_string)
                .filter(|url| !url.is_empty())
                .collect(),
            rpc_timeout,
            event_encoding,
            poll_interval,
            metrics_interval,
            queue_partition,
            queue_partitions,
            queue_batch_size,
            queue_poll_interval,
            queue_base_delay,
            max_queue_retries,
            fetch_timeout,
            refresh_min_interval,
            max_reconciled_addresses,
            gas_window,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads `BADGE_INDEXER_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`IndexerConfig::from_env`] with an explicit variable source.
    /// Unset variables fall back to the builder defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let urls = var("RPC_URLS").with_context(|| format!("{ENV_PREFIX}RPC_URLS is required"))?;
        let mut builder = Self::builder().rpc_urls(urls.split(',').map(str::to_string));

        if let Some(ms) = parse_var::<u64>(&var, "RPC_TIMEOUT_MS")? {
            builder = builder.rpc_timeout(Duration::from_millis(ms));
        }
        if let Some(encoding) = var("EVENT_ENCODING") {
            builder = builder.event_encoding(parse_event_encoding(&encoding)?);
        }
        if let Some(ms) = parse_var::<u64>(&var, "POLL_INTERVAL_MS")? {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_var::<u64>(&var, "METRICS_INTERVAL_SECS")? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }
        if let Some(partition) = parse_var::<u32>(&var, "QUEUE_PARTITION")? {
            builder = builder.queue_partition(partition);
        }
        if let Some(partitions) = parse_var::<u32>(&var, "QUEUE_PARTITIONS")? {
            builder = builder.queue_partitions(partitions);
        }
        if let Some(size) = parse_var::<usize>(&var, "QUEUE_BATCH_SIZE")? {
            builder = builder.queue_batch_size(size);
        }
        if let Some(ms) = parse_var::<u64>(&var, "QUEUE_POLL_INTERVAL_MS")? {
            builder = builder.queue_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&var, "QUEUE_BASE_DELAY_MS")? {
            builder = builder.queue_base_delay(Duration::from_millis(ms));
        }
        if let Some(retries) = parse_var::<u32>(&var, "QUEUE_MAX_RETRIES")? {
            builder = builder.max_queue_retries(retries);
        }
        if let Some(ms) = parse_var::<u64>(&var, "FETCH_TIMEOUT_MS")? {
            builder = builder.fetch_timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_var::<u64>(&var, "REFRESH_MIN_INTERVAL_SECS")? {
            builder = builder.refresh_min_interval(Duration::from_secs(secs));
        }
        if let Some(max) = parse_var::<usize>(&var, "MAX_RECONCILED_ADDRESSES")? {
            builder = builder.max_reconciled_addresses(max);
        }
        if let Some(window) = parse_var::<usize>(&var, "GAS_WINDOW")? {
            builder = builder.gas_window(window);
        }

        builder.build()
    }

    /// Failover list, preferred endpoint first.
    pub fn rpc_urls(&self) -> &[String] {
        &self.rpc_urls
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn event_encoding(&self) -> EventEncoding {
        self.event_encoding
    }

    /// Interval between poller ticks.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Partition this replica claims from the fetch queue.
    pub fn queue_partition(&self) -> u32 {
        self.queue_partition
    }

    /// Number of replicas sharing the fetch queue.
    pub fn queue_partitions(&self) -> u32 {
        self.queue_partitions
    }

    pub fn queue_batch_size(&self) -> usize {
        self.queue_batch_size
    }

    pub fn queue_poll_interval(&self) -> Duration {
        self.queue_poll_interval
    }

    /// Delay before the first retry of a failed fetch; doubles per failure.
    pub fn queue_base_delay(&self) -> Duration {
        self.queue_base_delay
    }

    pub fn max_queue_retries(&self) -> u32 {
        self.max_queue_retries
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn refresh_min_interval(&self) -> Duration {
        self.refresh_min_interval
    }

    pub fn max_reconciled_addresses(&self) -> usize {
        self.max_reconciled_addresses
    }

    /// Number of recent gas prices averaged into the status document.
    pub fn gas_window(&self) -> usize {
        self.gas_window
    }

    pub fn rpc_options(&self) -> RpcClientOptions {
        RpcClientOptions {
            request_timeout: self.rpc_timeout,
            event_encoding: self.event_encoding,
            ..RpcClientOptions::default()
        }
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            partitions: self.queue_partitions,
            refresh_min_interval: self.refresh_min_interval,
        }
    }

    pub fn queue_settings(&self) -> FetchQueueSettings {
        FetchQueueSettings {
            partition: self.queue_partition,
            batch_size: self.queue_batch_size,
            base_delay: self.queue_base_delay,
            fetch_timeout: self.fetch_timeout,
            max_retries: self.max_queue_retries,
            poll_interval: self.queue_poll_interval,
        }
    }

    pub fn reconciler(&self) -> BalanceReconciler {
        BalanceReconciler::new(self.max_reconciled_addresses)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_urls.is_empty() {
            bail!("rpc_urls must contain at least one endpoint");
        }
        for url in &self.rpc_urls {
            validate_url(url)?;
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.queue_partitions == 0 {
            bail!("queue_partitions must be greater than 0");
        }

        if self.queue_partition >= self.queue_partitions {
            bail!(
                "queue_partition ({}) must be below queue_partitions ({})",
                self.queue_partition,
                self.queue_partitions
            );
        }

        if self.queue_batch_size == 0 {
            bail!("queue_batch_size must be greater than 0");
        }

        if self.queue_poll_interval.is_zero() {
            bail!("queue_poll_interval must be greater than 0");
        }

        if self.queue_base_delay.is_zero() {
            bail!("queue_base_delay must be greater than 0");
        }

        if self.fetch_timeout.is_zero() {
            bail!("fetch_timeout must be greater than 0");
        }

        if self.max_reconciled_addresses == 0 {
            bail!("max_reconciled_addresses must be greater than 0");
        }

        if self.gas_window == 0 {
            bail!("gas_window must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IndexerConfigBuilder {
    rpc_urls: Option<Vec<String>>,
    rpc_timeout: Option<Duration>,
    event_encoding: Option<EventEncoding>,
    poll_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    queue_partition: Option<u32>,
    queue_partitions: Option<u32>,
    queue_batch_size: Option<usize>,
    queue_poll_interval: Option<Duration>,
    queue_base_delay: Option<Duration>,
    max_queue_retries: Option<u32>,
    fetch_timeout: Option<Duration>,
    refresh_min_interval: Option<Duration>,
    max_reconciled_addresses: Option<usize>,
    gas_window: Option<usize>,
}

impl IndexerConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_urls.get_or_insert_with(Vec::new).push(url.into());
        self
    }

    pub fn rpc_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rpc_urls
            .get_or_insert_with(Vec::new)
            .extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn event_encoding(mut self, encoding: EventEncoding) -> Self {
        self.event_encoding = Some(encoding);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn queue_partition(mut self, partition: u32) -> Self {
        self.queue_partition = Some(partition);
        self
    }

    pub fn queue_partitions(mut self, partitions: u32) -> Self {
        self.queue_partitions = Some(partitions);
        self
    }

    pub fn queue_batch_size(mut self, size: usize) -> Self {
        self.queue_batch_size = Some(size);
        self
    }

    pub fn queue_poll_interval(mut self, interval: Duration) -> Self {
        self.queue_poll_interval = Some(interval);
        self
    }

    pub fn queue_base_delay(mut self, delay: Duration) -> Self {
        self.queue_base_delay = Some(delay);
        self
    }

    pub fn max_queue_retries(mut self, retries: u32) -> Self {
        self.max_queue_retries = Some(retries);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn refresh_min_interval(mut self, interval: Duration) -> Self {
        self.refresh_min_interval = Some(interval);
        self
    }

    pub fn max_reconciled_addresses(mut self, max: usize) -> Self {
        self.max_reconciled_addresses = Some(max);
        self
    }

    pub fn gas_window(mut self, window: usize) -> Self {
        self.gas_window = Some(window);
        self
    }

    pub fn build(self) -> Result<IndexerConfig> {
        let queue = FetchQueueSettings::default();
        let policy = QueuePolicy::default();

        let params = IndexerConfigParams {
            rpc_urls: self.rpc_urls.context("rpc_urls is required")?,
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            event_encoding: self.event_encoding.unwrap_or_default(),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            queue_partition: self.queue_partition.unwrap_or(queue.partition),
            queue_partitions: self.queue_partitions.unwrap_or(policy.partitions),
            queue_batch_size: self.queue_batch_size.unwrap_or(queue.batch_size),
            queue_poll_interval: self.queue_poll_interval.unwrap_or(queue.poll_interval),
            queue_base_delay: self.queue_base_delay.unwrap_or(queue.base_delay),
            max_queue_retries: self.max_queue_retries.unwrap_or(queue.max_retries),
            fetch_timeout: self.fetch_timeout.unwrap_or(queue.fetch_timeout),
            refresh_min_interval: self
                .refresh_min_interval
                .unwrap_or(policy.refresh_min_interval),
            max_reconciled_addresses: self
                .max_reconciled_addresses
                .unwrap_or(DEFAULT_MAX_ADDRESSES),
            gas_window: self.gas_window.unwrap_or(DEFAULT_GAS_WINDOW),
        };

        IndexerConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc url {url:?} must start with http:// or https://");
    }
    Ok(())
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{ENV_PREFIX}{name} has invalid value {raw:?}"))
        })
        .transpose()
}

fn parse_event_encoding(raw: &str) -> Result<EventEncoding> {
    match raw.to_ascii_lowercase().as_str() {
        "plain" => Ok(EventEncoding::Plain),
        "base64" => Ok(EventEncoding::Base64),
        _ => bail!("{ENV_PREFIX}EVENT_ENCODING must be plain or base64, got {raw:?}"),
    }
}
