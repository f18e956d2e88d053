//! A session's single attempt at running a user transaction function (spec
//! §4.4): start a transaction, hand it to the caller's closure, commit on
//! success, and on any failure classify the error into the retry taxonomy
//! the driver's retry loop (spec §4.5) acts on.
//!
//! `classify` is deliberately the one place the whole retry table from spec
//! §4.4 lives, and it is a pure function of an `ErrorKind` -- it says
//! nothing about whether the session the failure happened on should be
//! reused. That part (`discard_session`) depends on whether a best-effort
//! abort was even attempted and, if so, whether it succeeded, which is only
//! known once `Session::run` actually makes the call; `classify` alone
//! can't answer it, matching how spec §4.4's table separates `can_retry`
//! from the session-handle disposition decided in the retry loop (§4.5).

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use ledgerdb_base::{Context, Error, ErrorKind, Result};
use ledgerdb_txn::Transaction;
use ledgerdb_wire::{WireAdapter, WireAdapterFactory};

/// The three independent facts spec §4.4's table records about an error:
/// whether it's worth retrying at all, whether the session it happened on
/// is already known dead, and whether a best-effort abort should even be
/// attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub retry: bool,
    /// The session's token is already known invalid; no abort call is
    /// worth attempting and the session can never be reused.
    pub is_invalid_session: bool,
    /// Whether `Session::run` should issue a best-effort
    /// `abort_transaction` call before deciding the session's fate.
    pub attempt_abort: bool,
}

fn transaction_expired_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("Transaction .* has expired").expect("static pattern is valid"))
}

/// Classifies `err` per the table in spec §4.4:
///
/// | condition                                      | retry | invalid session | attempt abort |
/// |-------------------------------------------------|-------|------------------|---------------|
/// | invalid session, "Transaction .* has expired"    | no    | yes              | no            |
/// | invalid session, otherwise                       | yes   | yes              | no            |
/// | optimistic concurrency conflict                  | yes   | no               | no            |
/// | 5xx / service unavailable / capacity exceeded     | yes   | no               | yes           |
/// | everything else (including user errors)          | no    | no               | yes           |
///
/// Errors a `Transaction` method raises and errors the user's own closure
/// returns are classified identically, by `ErrorKind` alone -- a closure
/// that wraps its own domain error as `ErrorKind::User` (rather than
/// letting a driver-raised kind like `ErrorKind::OptimisticConflict`
/// propagate untouched) is exactly how it opts out of being retried.
pub fn classify(err: &Error) -> Classification {
    match err.kind() {
        ErrorKind::InvalidSession { transaction_expired: true } => {
            Classification { retry: false, is_invalid_session: true, attempt_abort: false }
        }
        ErrorKind::InvalidSession { transaction_expired: false } => {
            Classification { retry: true, is_invalid_session: true, attempt_abort: false }
        }
        ErrorKind::OptimisticConflict => Classification { retry: true, is_invalid_session: false, attempt_abort: false },
        ErrorKind::InternalFailure | ErrorKind::Transport | ErrorKind::CapacityExceeded => {
            Classification { retry: true, is_invalid_session: false, attempt_abort: true }
        }
        _ => Classification { retry: false, is_invalid_session: false, attempt_abort: true },
    }
}

/// Given a message a server returned alongside an invalid-session condition,
/// decides whether it matches the non-retryable "transaction expired" case.
/// The server's message text is the only signal distinguishing the two
/// invalid-session rows in the table above (spec §4.4).
pub fn invalid_session_kind(message: &str) -> ErrorKind {
    ErrorKind::InvalidSession { transaction_expired: transaction_expired_pattern().is_match(message) }
}

/// What `Session::run` did, for the driver's retry loop to act on.
pub enum Outcome<T> {
    Committed(T),
    Failed {
        retry: bool,
        /// Whether the driver must discard this session instead of
        /// returning it to the pool (spec §4.5's retry loop: an
        /// invalid-session condition always discards; otherwise a session
        /// is reusable exactly when no abort was needed, or the abort
        /// that was attempted succeeded -- the "any non-error response is
        /// `abort_success`" rule from spec §9's open question).
        discard_session: bool,
        error: Error,
    },
}

/// One server session: an established `WireAdapter` plus the transaction
/// lifecycle built on top of it. A `Session` runs exactly one transaction
/// attempt per `run` call; running the same user function again after a
/// retryable failure is the driver's job, not this crate's.
pub struct Session<W: WireAdapter> {
    adapter: W,
}

impl<W: WireAdapter> Session<W> {
    /// Builds a fresh adapter from `factory` and establishes a session on
    /// it (spec §4.2's `start_session`).
    pub fn start<F>(factory: &F, ledger_name: &str, ctx: &Context) -> Result<Self>
    where
        F: WireAdapterFactory<Adapter = W>,
    {
        let mut adapter = factory.new_adapter()?;
        adapter.start_session(ledger_name, ctx)?;
        Ok(Session { adapter })
    }

    /// A cheap liveness check the driver uses before handing a pooled
    /// session back out (spec §4.5's "take_or_create with liveness probe").
    /// The wire protocol has no dedicated ping verb, so the probe is a
    /// transaction that is immediately aborted -- the cheapest round trip
    /// that would surface an invalid-session condition if the session had
    /// gone stale while idle in the pool.
    pub fn probe_alive(&mut self, ctx: &Context) -> bool {
        match self.adapter.start_transaction(ctx) {
            Ok(_) => {
                let _ = self.adapter.abort_transaction(ctx);
                true
            }
            Err(e) => {
                debug!(error = %e, "pooled session failed its liveness probe");
                false
            }
        }
    }

    /// Ends the session and reclaims the underlying adapter. Called both
    /// when the driver discards a session outright and when it shuts down
    /// the whole pool.
    pub fn end(mut self, ctx: &Context) -> Result<()> {
        self.adapter.end_session(ctx)
    }

    pub fn into_adapter(self) -> W {
        self.adapter
    }

    /// Runs one attempt: starts a transaction, invokes `f`, commits on
    /// success (spec §4.4's algorithm). `f` is `Fn` rather than `FnOnce`
    /// because the driver's retry loop may call `Session::run` (on a fresh
    /// or the same session) more than once for the same logical operation;
    /// the `for<'t>` bound prevents anything borrowed from the transaction
    /// from escaping into `T`, mirroring how `std::thread::scope` bounds a
    /// scoped closure.
    pub fn run<T>(&mut self, ctx: &Context, f: impl for<'t> Fn(&mut Transaction<'t, W>) -> Result<T>) -> Outcome<T> {
        let transaction_id = match self.adapter.start_transaction(ctx) {
            Ok(id) => id,
            Err(e) => {
                // No transaction was ever created; there is nothing to
                // abort (spec §4.4 step 1).
                let classification = classify(&e);
                return Outcome::Failed { retry: classification.retry, discard_session: classification.is_invalid_session, error: e };
            }
        };

        let mut txn = Transaction::new(transaction_id, &mut self.adapter);
        let error = match f(&mut txn) {
            Ok(value) => match txn.commit(ctx) {
                Ok(()) => return Outcome::Committed(value),
                Err(e) => e,
            },
            Err(e) => e,
        };

        let classification = classify(&error);
        let discard_session = if classification.is_invalid_session {
            true
        } else if classification.attempt_abort {
            match txn.best_effort_abort(ctx) {
                Ok(()) => false,
                Err(abort_err) => {
                    warn!(error = %abort_err, "best-effort abort failed; discarding session");
                    true
                }
            }
        } else {
            // Optimistic-concurrency conflicts are resolved server-side;
            // no abort call is needed and the session is still good.
            false
        };
        Outcome::Failed { retry: classification.retry, discard_session, error }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ledgerdb_wire::mock::MockScript;
    use test_log::test;

    #[test]
    fn classifies_per_spec_table() {
        assert_eq!(
            classify(&Error::new(invalid_session_kind("Transaction T1 has expired"))),
            Classification { retry: false, is_invalid_session: true, attempt_abort: false }
        );
        assert_eq!(
            classify(&Error::new(invalid_session_kind("session token is unknown"))),
            Classification { retry: true, is_invalid_session: true, attempt_abort: false }
        );
        assert_eq!(
            classify(&Error::new(ErrorKind::OptimisticConflict)),
            Classification { retry: true, is_invalid_session: false, attempt_abort: false }
        );
        assert_eq!(
            classify(&Error::new(ErrorKind::InternalFailure)),
            Classification { retry: true, is_invalid_session: false, attempt_abort: true }
        );
        assert_eq!(
            classify(&Error::new(ErrorKind::CapacityExceeded)),
            Classification { retry: true, is_invalid_session: false, attempt_abort: true }
        );
        assert_eq!(
            classify(&Error::new(ErrorKind::User)),
            Classification { retry: false, is_invalid_session: false, attempt_abort: true }
        );
        assert_eq!(
            classify(&Error::new(ErrorKind::AbortedByUser)),
            Classification { retry: false, is_invalid_session: false, attempt_abort: true }
        );
    }

    #[test]
    fn run_commits_on_success() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T1".into()));
        script.push_commit_transaction(Ok(ledgerdb_hash::Digest::EMPTY));
        // No statements executed, so the commit hash stays at its identity
        // value, matching the scripted commit digest above.
        let mut session = Session::start(&script.factory(), "my-ledger", &Context::background()).unwrap();
        let result = session.run(&Context::background(), |_txn| Ok(42));
        assert!(matches!(result, Outcome::Committed(42)));
    }

    #[test]
    fn digest_mismatch_is_terminal_and_discards_the_session() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T1".into()));
        script.push_commit_transaction(Ok(ledgerdb_hash::Digest::from([9u8; 32])));
        script.push_abort_transaction(Err(Error::new(ErrorKind::Transport)));
        let mut session = Session::start(&script.factory(), "my-ledger", &Context::background()).unwrap();
        let result = session.run(&Context::background(), |_txn| Ok(()));
        match result {
            Outcome::Failed { retry, discard_session, error } => {
                assert_eq!(*error.kind(), ErrorKind::DigestMismatch);
                assert!(!retry);
                assert!(discard_session, "a failed best-effort abort means the session can't be trusted");
            }
            Outcome::Committed(_) => panic!("expected digest mismatch to fail"),
        }
    }

    #[test]
    fn run_aborts_best_effort_on_user_error_and_reuses_the_session_if_it_succeeds() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T1".into()));
        script.push_abort_transaction(Ok(()));
        let mut session = Session::start(&script.factory(), "my-ledger", &Context::background()).unwrap();
        let result = session.run(&Context::background(), |_txn| Err::<(), _>(Error::new(ErrorKind::User)));
        match result {
            Outcome::Failed { retry, discard_session, .. } => {
                assert!(!retry);
                assert!(!discard_session);
            }
            Outcome::Committed(_) => panic!("expected the user error to fail the attempt"),
        }
        assert!(script.calls().contains(&"abort_transaction"));
    }

    #[test]
    fn optimistic_conflict_needs_no_abort_and_keeps_the_session() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T1".into()));
        script.push_commit_transaction(Err(Error::new(ErrorKind::OptimisticConflict)));
        let mut session = Session::start(&script.factory(), "my-ledger", &Context::background()).unwrap();
        let result = session.run(&Context::background(), |_txn| Ok(()));
        match result {
            Outcome::Failed { retry, discard_session, .. } => {
                assert!(retry);
                assert!(!discard_session);
            }
            Outcome::Committed(_) => panic!("expected the conflict to fail this attempt"),
        }
        assert!(!script.calls().contains(&"abort_transaction"));
    }

    #[test]
    fn probe_alive_detects_a_stale_session() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Err(Error::new(invalid_session_kind("session token is unknown"))));
        let mut session = Session::start(&script.factory(), "my-ledger", &Context::background()).unwrap();
        assert!(!session.probe_alive(&Context::background()));
    }

    #[test]
    fn probe_alive_accepts_a_healthy_session() {
        let script = MockScript::new();
        script.push_start_session(Ok("sess1".into()));
        script.push_start_transaction(Ok("T-probe".into()));
        script.push_abort_transaction(Ok(()));
        let mut session = Session::start(&script.factory(), "my-ledger", &Context::background()).unwrap();
        assert!(session.probe_alive(&Context::background()));
    }
}
