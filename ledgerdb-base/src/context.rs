// Cooperative cancellation, threaded through every wire call and every
// inter-retry sleep (spec §5). Modeled as a small value handed down by the
// caller rather than stashed in thread-local state, so a `Context` can be
// shared across the threads a single `Driver::execute` call touches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The ambient context threaded through a `Driver::execute` call: carries a
/// cancellation token and an optional deadline. Every wire call and every
/// backoff sleep checks it.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn background() -> Self {
        Context { token: CancellationToken::new(), deadline: None }
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Context { token, deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Context { token: CancellationToken::new(), deadline: Some(Instant::now() + timeout) }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(Error::new(ErrorKind::Cancelled))
        } else {
            Ok(())
        }
    }

    /// Sleeps for `dur`, waking early (and returning `Cancelled`) if the
    /// context is cancelled first. Used for the retry loop's inter-attempt
    /// backoff, which must itself be cancellable (spec §5).
    pub fn sleep(&self, dur: Duration) -> crate::error::Result<()> {
        const SLICE: Duration = Duration::from_millis(20);
        let deadline = Instant::now() + dur;
        loop {
            self.check()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            std::thread::sleep(remaining.min(SLICE));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancel_is_observed() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
        ctx.token().cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.check().is_err());
    }

    #[test]
    fn timeout_expires() {
        let ctx = Context::with_timeout(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let ctx = Context::background();
        let token = ctx.token().clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            token.cancel();
        });
        let result = ctx.sleep(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(result.is_err());
    }
}
