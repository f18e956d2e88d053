//! Top-level driver facade (spec §4.5): a pool of sessions bounded by a
//! permit semaphore, and a retry loop that drives one `Session::run`
//! attempt after another until a user transaction commits, a non-retryable
//! error surfaces, or the retry budget runs out.
//!
//! Illustrative of how an application links the lower crates together, not
//! assumed to be their only consumer -- exactly the role `submerge`'s own
//! top-level crate plays over `submerge-txn`/`submerge-net`/`submerge-base`.

mod pool;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use ledgerdb_base::{Context, Error, ErrorKind, Result};
pub use ledgerdb_base::{Config, ConfigBuilder, RetryPolicy, Verbosity};
use ledgerdb_session::{Outcome, Session};
pub use ledgerdb_txn::{BufferedResult, Transaction};
pub use ledgerdb_wire::{ValueHolder, WireAdapter, WireAdapterFactory};

use pool::Permits;

/// Client driver for a serverless, append-only ledger database (spec §1).
/// `Driver` is `Send + Sync`: every field that changes after construction
/// (the permit count, the idle session list, the closed flag) is behind its
/// own lock or atomic, so one `Driver` can be shared across threads and
/// driven concurrently up to `Config::max_concurrent_transactions`.
pub struct Driver<F: WireAdapterFactory> {
    factory: F,
    config: Config,
    permits: Permits,
    idle_sessions: Mutex<VecDeque<Session<F::Adapter>>>,
    closed: AtomicBool,
}

impl<F: WireAdapterFactory> Driver<F> {
    pub fn new(factory: F, config: Config) -> Self {
        let permits = Permits::new(config.max_concurrent_transactions);
        Driver { factory, config, permits, idle_sessions: Mutex::new(VecDeque::new()), closed: AtomicBool::new(false) }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pops an idle session and liveness-probes it before handing it back
    /// out; a session that fails the probe is ended and dropped rather than
    /// reused, and the search continues (spec §4.5: "take_or_create with
    /// liveness probe"). Falls back to starting a brand new session once
    /// the idle list is empty.
    fn take_or_create(&self, ctx: &Context) -> Result<Session<F::Adapter>> {
        loop {
            let popped = self.idle_sessions.lock().unwrap().pop_front();
            match popped {
                Some(mut session) => {
                    if session.probe_alive(ctx) {
                        return Ok(session);
                    }
                    if let Err(e) = session.end(ctx) {
                        warn!(error = %e, "failed to cleanly end a stale pooled session");
                    }
                }
                None => return Session::start(&self.factory, &self.config.ledger_name, ctx),
            }
        }
    }

    fn return_to_pool(&self, session: Session<F::Adapter>) {
        self.idle_sessions.lock().unwrap().push_back(session);
    }

    fn discard(&self, session: Session<F::Adapter>, ctx: &Context) {
        if let Err(e) = session.end(ctx) {
            warn!(error = %e, "failed to cleanly end a discarded session");
        }
    }

    /// Runs `f` inside a transaction, retrying per the classification table
    /// in spec §4.4 until it commits, a non-retryable error surfaces, or the
    /// retry budget (`Config::retry_policy`'s `max_retry_limit`) is spent.
    ///
    /// `f` may be invoked more than once across attempts, each time against
    /// a fresh transaction (and sometimes a fresh session); it must be safe
    /// to re-run. The `for<'t>` bound on its argument keeps anything
    /// borrowed from a given attempt's `Transaction` from escaping into
    /// `T`, the same way `std::thread::scope` bounds a scoped closure.
    pub fn execute<T>(&self, ctx: &Context, f: impl for<'t> Fn(&mut Transaction<'t, F::Adapter>) -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::Closed));
            }
            ctx.check()?;

            let permit = self.permits.acquire(ctx, self.config.pool_timeout)?;
            let mut session = match self.take_or_create(ctx) {
                Ok(session) => session,
                Err(e) => {
                    drop(permit);
                    return Err(e);
                }
            };

            match session.run(ctx, &f) {
                Outcome::Committed(value) => {
                    self.return_to_pool(session);
                    drop(permit);
                    return Ok(value);
                }
                Outcome::Failed { retry, discard_session, error } => {
                    if discard_session {
                        self.discard(session, ctx);
                    } else {
                        self.return_to_pool(session);
                    }
                    // Release the permit before sleeping: a backed-off
                    // caller must not keep occupying a slot another caller
                    // could use while it waits (spec §5).
                    drop(permit);

                    if retry && attempt < self.config.retry_policy.max_retry_limit {
                        let delay = (self.config.retry_policy.backoff)(attempt);
                        ctx.sleep(delay)?;
                        attempt += 1;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Lists the ledger's tables. The wire protocol has no dedicated verb
    /// for this (spec §4.2 names exactly seven); it's implemented, like any
    /// other read, as a statement run inside its own transaction and goes
    /// through the same retry loop as `execute`.
    pub fn list_tables(&self, ctx: &Context) -> Result<Vec<String>> {
        self.execute(ctx, |txn| {
            let cursor = txn.execute("list tables", &[], ctx)?;
            let buffered = Transaction::buffer(cursor, ctx)?;
            buffered.values.iter().map(|v| v.decode::<String>()).collect()
        })
    }

    /// Closes the driver: further `execute`/`list_tables` calls fail
    /// immediately with `ErrorKind::Closed`, any caller currently blocked in
    /// `Permits::acquire` is woken with the same error, and every idle
    /// pooled session is ended. Calls already past their closed check when
    /// `shutdown` runs are allowed to finish; this does not cancel them.
    pub fn shutdown(&self, ctx: &Context) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        let mut idle = self.idle_sessions.lock().unwrap();
        while let Some(session) = idle.pop_front() {
            if let Err(e) = session.end(ctx) {
                warn!(error = %e, "failed to cleanly end a session during shutdown");
            }
        }
        info!("driver shut down");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ledgerdb_hash::Digest;
    use ledgerdb_wire::mock::MockScript;
    use std::time::Duration;
    use test_log::test;

    fn config() -> Config {
        Config::builder("my-ledger").max_concurrent_transactions(2).pool_timeout(Duration::from_millis(200)).build().unwrap()
    }

    // Scenario S1 (spec §8): a transaction that commits cleanly on the
    // first attempt.
    #[test]
    fn commits_on_first_attempt() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T1".into()));
        script.push_commit_transaction(Ok(Digest::EMPTY));
        let driver = Driver::new(script.factory(), config());
        let result = driver.execute(&Context::background(), |_txn| Ok(7));
        assert_eq!(result.unwrap(), 7);
        assert_eq!(script.sessions_started(), 1);
    }

    // Scenario: an optimistic-concurrency conflict is retried transparently
    // on the same session and eventually commits.
    #[test]
    fn retries_an_optimistic_concurrency_conflict_then_commits() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T1".into())); // attempt 1
        script.push_commit_transaction(Err(Error::new(ErrorKind::OptimisticConflict)));
        script.push_start_transaction(Ok("T-probe".into())); // liveness probe on reuse
        script.push_start_transaction(Ok("T2".into())); // attempt 2
        script.push_commit_transaction(Ok(Digest::EMPTY));
        let driver = Driver::new(script.factory(), config());

        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = driver.execute(&Context::background(), |_txn| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(script.sessions_started(), 1, "a conflict retry reuses the same session");
    }

    // Scenario: an invalid-session (non-expired) error discards the session
    // and the retry proceeds on a freshly-started one.
    #[test]
    fn invalid_session_discards_and_starts_a_fresh_session() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Err(Error::new(ledgerdb_session::invalid_session_kind("session token is unknown"))));
        script.push_end_session(Ok(()));
        script.push_start_session(Ok("sess2".into()));
        script.push_start_transaction(Ok("T1".into()));
        script.push_commit_transaction(Ok(Digest::EMPTY));
        let driver = Driver::new(script.factory(), config());
        let result = driver.execute(&Context::background(), |_txn| Ok(()));
        assert!(result.is_ok());
        assert_eq!(script.sessions_started(), 2);
    }

    // Scenario: a transaction-expired invalid-session error is never
    // retried, and surfaces straight to the caller.
    #[test]
    fn transaction_expired_is_never_retried() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Err(Error::new(ledgerdb_session::invalid_session_kind(
            "Transaction T1 has expired",
        ))));
        script.push_end_session(Ok(()));
        let driver = Driver::new(script.factory(), config());
        let result = driver.execute(&Context::background(), |_txn| Ok(()));
        let err = result.unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::InvalidSession { transaction_expired: true });
        assert_eq!(script.sessions_started(), 1, "no retry means no second session");
    }

    // Scenario: the user function's own error is never retried, and the
    // transaction it was running is aborted on the way out.
    #[test]
    fn user_error_is_not_retried_and_aborts_the_transaction() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T1".into()));
        script.push_abort_transaction(Ok(()));
        let driver = Driver::new(script.factory(), config());
        let result = driver.execute(&Context::background(), |_txn| Err::<(), _>(Error::new(ErrorKind::User)));
        assert!(result.is_err());
        assert!(script.calls().contains(&"abort_transaction"));
        assert_eq!(script.sessions_started(), 1);
    }

    // Scenario: once the retry budget is spent, a retryable error still
    // surfaces to the caller instead of retrying forever.
    #[test]
    fn stops_retrying_once_the_budget_is_spent() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        for _ in 0..10 {
            script.push_start_transaction(Ok("T1".into()));
            script.push_commit_transaction(Err(Error::new(ErrorKind::OptimisticConflict)));
        }
        let policy = RetryPolicy { max_retry_limit: 2, backoff: ledgerdb_base::default_backoff(Duration::from_millis(1), Duration::from_millis(2)) };
        let cfg = Config::builder("my-ledger").retry_policy(policy).pool_timeout(Duration::from_millis(200)).build().unwrap();
        let driver = Driver::new(script.factory(), cfg);
        let result = driver.execute(&Context::background(), |_txn| Ok(()));
        assert_eq!(*result.unwrap_err().kind(), ErrorKind::OptimisticConflict);
    }

    #[test]
    fn shutdown_rejects_further_execute_calls() {
        let script = MockScript::new();
        let driver = Driver::new(script.factory(), config());
        driver.shutdown(&Context::background());
        let result = driver.execute(&Context::background(), |_txn| Ok(()));
        assert_eq!(*result.unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn pool_never_exceeds_configured_concurrency() {
        // Property 1 (spec §8): no more than `max_concurrent_transactions`
        // sessions are ever checked out at once. Two permits are granted
        // here, a third blocks until the pool_timeout elapses.
        let script = MockScript::new();
        let driver = Driver::new(script.factory(), config());
        let acquired = std::sync::Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    let ctx = Context::background();
                    let permit = driver.permits.acquire(&ctx, Duration::from_millis(50));
                    acquired.lock().unwrap().push(permit.is_ok());
                });
            }
        });
        let results = acquired.into_inner().unwrap();
        assert_eq!(results.iter().filter(|ok| **ok).count(), 2);
    }
}
