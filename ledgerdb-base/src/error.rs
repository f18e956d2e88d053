// Error taxonomy for the driver (see spec §7). We want the same things
// submerge-base's error module wants -- a place to attach a backtrace, and a
// place to centralize logging of anything that turns into an Error -- plus
// a `kind` that callers and the retry loop can pattern-match on, which a
// single opaque `DynBacktraceError` can't give us.

use std::borrow::Cow;
use std::fmt;

use backtrace_error::DynBacktraceError;
use tracing::error;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cause: Option<DynBacktraceError>,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Server conditions and driver conditions a caller of `Driver::execute` may
/// want to pattern-match on. Named by behavior, matching spec §6's verb
/// error kinds plus the driver's own retry-loop-specific kinds (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at `Driver::new`; never surfaced from `execute`.
    Config(String),
    /// `Driver::shutdown` was called; the driver refuses further work.
    Closed,
    /// No permit became free within the pool timeout.
    PoolExhausted,
    /// The digest the server returned at commit didn't match the one the
    /// driver computed. Non-retryable: the transaction's integrity
    /// guarantee is already gone.
    DigestMismatch,
    /// Canonical serialization of a statement or parameter failed.
    Serialization,
    /// The session token the driver holds is no longer valid.
    /// `transaction_expired` distinguishes the "don't retry" case (§4.4).
    InvalidSession { transaction_expired: bool },
    /// Commit was rejected because another transaction touched the same
    /// read set first. Always safely retryable.
    OptimisticConflict,
    /// The server rejected the request outright; retrying would not help.
    BadRequest,
    /// The ledger has no spare capacity for another session right now.
    CapacityExceeded,
    /// 5xx / service-unavailable.
    InternalFailure,
    /// Transport-level I/O failure talking to the server.
    Transport,
    /// The caller-supplied context was cancelled mid-call.
    Cancelled,
    /// `Transaction::abort` was called by the user function.
    AbortedByUser,
    /// Wraps whatever the user's transaction function returned.
    User,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config(msg) => write!(f, "invalid configuration: {msg}"),
            ErrorKind::Closed => write!(f, "driver is closed"),
            ErrorKind::PoolExhausted => write!(f, "timed out waiting for a session permit"),
            ErrorKind::DigestMismatch => write!(f, "commit digest mismatch"),
            ErrorKind::Serialization => write!(f, "failed to serialize a statement or parameter"),
            ErrorKind::InvalidSession { transaction_expired: true } => {
                write!(f, "invalid session: transaction has expired")
            }
            ErrorKind::InvalidSession { transaction_expired: false } => {
                write!(f, "invalid session")
            }
            ErrorKind::OptimisticConflict => write!(f, "optimistic concurrency conflict"),
            ErrorKind::BadRequest => write!(f, "bad request"),
            ErrorKind::CapacityExceeded => write!(f, "ledger capacity exceeded"),
            ErrorKind::InternalFailure => write!(f, "internal server error"),
            ErrorKind::Transport => write!(f, "transport error"),
            ErrorKind::Cancelled => write!(f, "operation cancelled"),
            ErrorKind::AbortedByUser => write!(f, "transaction aborted by user function"),
            ErrorKind::User => write!(f, "user transaction function returned an error"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.kind, cause),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        error!(target: "ledgerdb", kind = %kind, "driver error");
        Error { kind, cause: None }
    }

    pub fn with_cause<E>(kind: ErrorKind, cause: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        error!(target: "ledgerdb", kind = %kind, cause = %cause, "driver error");
        Error { kind, cause: Some(DynBacktraceError::from(cause)) }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }
}

struct SimpleErr(Cow<'static, str>);

impl fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {}

/// Wraps a message as the cause of a `Transport` error, for adapters that
/// only have a string to report.
pub fn transport_err(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_cause(ErrorKind::Transport, SimpleErr(msg.into()))
}

pub fn config_err(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Config(msg.into().into_owned()))
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn display_includes_cause() {
        let e = transport_err("connection reset");
        let s = format!("{e}");
        assert!(s.contains("transport error"));
        assert!(s.contains("connection reset"));
    }

    #[test]
    fn kind_roundtrip() {
        let e = Error::new(ErrorKind::PoolExhausted);
        assert_eq!(*e.kind(), ErrorKind::PoolExhausted);
    }
}
