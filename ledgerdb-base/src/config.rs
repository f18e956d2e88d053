use std::time::Duration;

use rand::Rng;

use crate::error::{config_err, Error};

/// Logging volume the driver emits via `tracing`, independent of whatever
/// filter the embedding application's subscriber applies. Mirrors the
/// `logger`/`verbosity` pair in spec §3's Configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Off,
    #[default]
    Info,
    Debug,
}

/// `(attempt) -> duration` backoff function. `attempt` is zero-based.
pub type BackoffFn = dyn Fn(u32) -> Duration + Send + Sync;

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retry_limit: u32,
    pub backoff: std::sync::Arc<BackoffFn>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retry_limit", &self.max_retry_limit)
            .field("backoff", &"<fn>")
            .finish()
    }
}

/// Exponential backoff with full jitter: `jitter(0.5..1.0) * min(cap, base * 2^attempt)`.
pub fn default_backoff(base: Duration, cap: Duration) -> std::sync::Arc<BackoffFn> {
    std::sync::Arc::new(move |attempt: u32| {
        let exp = 2u64.saturating_pow(attempt.min(32));
        let unjittered = base.saturating_mul(exp.min(u32::MAX as u64) as u32).min(cap);
        let factor = rand::thread_rng().gen_range(0.5..1.0);
        unjittered.mul_f64(factor)
    })
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retry_limit: 4,
            backoff: default_backoff(Duration::from_millis(10), Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ledger_name: String,
    pub max_concurrent_transactions: u32,
    pub retry_policy: RetryPolicy,
    pub verbosity: Verbosity,
    pub pool_timeout: Duration,
}

impl Config {
    pub fn builder(ledger_name: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            ledger_name: ledger_name.into(),
            max_concurrent_transactions: 50,
            retry_policy: RetryPolicy::default(),
            verbosity: Verbosity::default(),
            pool_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ConfigBuilder {
    ledger_name: String,
    max_concurrent_transactions: u32,
    retry_policy: RetryPolicy,
    verbosity: Verbosity,
    pool_timeout: Duration,
}

impl ConfigBuilder {
    pub fn max_concurrent_transactions(mut self, n: u32) -> Self {
        self.max_concurrent_transactions = n;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn verbosity(mut self, v: Verbosity) -> Self {
        self.verbosity = v;
        self
    }

    pub fn pool_timeout(mut self, d: Duration) -> Self {
        self.pool_timeout = d;
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        if self.max_concurrent_transactions < 1 {
            return Err(config_err("max_concurrent_transactions must be >= 1"));
        }
        Ok(Config {
            ledger_name: self.ledger_name,
            max_concurrent_transactions: self.max_concurrent_transactions,
            retry_policy: self.retry_policy,
            verbosity: self.verbosity,
            pool_timeout: self.pool_timeout,
        })
    }
}
