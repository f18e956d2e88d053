mod config;
mod context;
mod error;

pub use config::{default_backoff, BackoffFn, Config, ConfigBuilder, RetryPolicy, Verbosity};
pub use context::{CancellationToken, Context};
pub use error::{config_err, transport_err, Error, ErrorKind, Result};
