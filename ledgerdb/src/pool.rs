//! The permit semaphore bounding concurrent transactions (spec §5's
//! `MaxConcurrentTransactions`). Session pooling itself (the idle-session
//! free list) lives in `Driver`; this module only ever counts, it never
//! holds a session.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use ledgerdb_base::{Context, Error, ErrorKind, Result};

const POLL_SLICE: Duration = Duration::from_millis(20);

struct PermitState {
    in_use: u32,
    closed: bool,
}

pub struct Permits {
    max: u32,
    state: Mutex<PermitState>,
    condvar: Condvar,
}

impl Permits {
    pub fn new(max: u32) -> Self {
        Permits { max, state: Mutex::new(PermitState { in_use: 0, closed: false }), condvar: Condvar::new() }
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.condvar.notify_all();
    }

    /// Blocks until a permit frees up, `timeout` elapses (`PoolExhausted`),
    /// `ctx` is cancelled (`Cancelled`), or the pool has been closed
    /// (`Closed`). Polls in short slices so a concurrent cancellation or
    /// `close()` is noticed promptly rather than only at `timeout`.
    pub fn acquire(&self, ctx: &Context, timeout: Duration) -> Result<PermitGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(Error::new(ErrorKind::Closed));
            }
            ctx.check()?;
            if state.in_use < self.max {
                state.in_use += 1;
                return Ok(PermitGuard { permits: self });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::new(ErrorKind::PoolExhausted));
            }
            let (guard, _) = self.condvar.wait_timeout(state, remaining.min(POLL_SLICE)).unwrap();
            state = guard;
        }
    }

    #[cfg(test)]
    fn in_use(&self) -> u32 {
        self.state.lock().unwrap().in_use
    }
}

/// RAII handle on one permit, released on drop whether the holder returned
/// normally, propagated an error, or unwound through a panic -- a caller
/// can never leak a permit by forgetting to release it explicitly.
pub struct PermitGuard<'a> {
    permits: &'a Permits,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.permits.state.lock().unwrap();
        state.in_use -= 1;
        drop(state);
        self.permits.condvar.notify_one();
    }
}
