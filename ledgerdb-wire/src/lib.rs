//! Wire adapter (spec §4.2): the one-call-per-operation facade the rest of
//! the driver uses to reach the server. The transport/SDK that actually
//! performs a request/response round trip is out of scope for this crate
//! (spec §1, §6) -- it's whatever implements `WireAdapter`. What lives here
//! is the shape of the seven verbs, the envelope a real implementation would
//! multiplex them through, and a `mock` test double standing in for a live
//! ledger during unit tests.
//!
//! The envelope mirrors the single multiplexed "send command" RPC described
//! in spec §4.2: exactly one of seven mutually exclusive sub-requests per
//! call, the same shape submerge-net's `Msg { specific: SpecificMsg }`
//! dispatches node-to-node messages through.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use ledgerdb_base::{Context, Error, ErrorKind, Result};
use ledgerdb_hash::Digest;

#[cfg(feature = "mock")]
pub mod mock;

/// An opaque binary-encoded document (spec §6's `value_holder`). Callers
/// encode statement parameters into one of these before handing them to
/// `WireAdapter::execute_statement`, and decode cursor values back out of
/// one on the way out.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueHolder(pub Vec<u8>);

impl ValueHolder {
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        let bytes = rmp_serde::to_vec(value).map_err(|e| Error::with_cause(ErrorKind::Serialization, e))?;
        Ok(ValueHolder(bytes))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        rmp_serde::from_slice(&self.0).map_err(|e| Error::with_cause(ErrorKind::Serialization, e))
    }

    pub fn digest(&self) -> Digest {
        ledgerdb_hash::hash_bytes(&self.0)
    }
}

impl std::fmt::Debug for ValueHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueHolder({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoUsage {
    pub read_ios: u64,
    pub write_ios: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub processing_time_ms: u64,
}

/// One contiguous batch of result values, plus an optional continuation
/// token (spec's "Page").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    pub values: Vec<ValueHolder>,
    pub next_page_token: Option<String>,
    pub io_usage: Option<IoUsage>,
    pub timing_info: Option<TimingInfo>,
}

/// The envelope a real transport multiplexes onto the wire: exactly one of
/// these per RPC (spec §4.2/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    StartSession { ledger_name: String },
    EndSession,
    StartTransaction,
    AbortTransaction,
    CommitTransaction { transaction_id: String, commit_digest: [u8; 32] },
    ExecuteStatement { transaction_id: String, statement: String, parameters: Vec<ValueHolder> },
    FetchPage { transaction_id: String, page_token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandResult {
    SessionStarted { session_token: String },
    SessionEnded,
    TransactionStarted { transaction_id: String },
    TransactionAborted,
    TransactionCommitted { transaction_id: String, commit_digest: [u8; 32] },
    Executed(Page),
    PageFetched(Page),
}

/// The fragment the driver appends to the user-agent of every request it
/// sends, so ledger-side logs can attribute traffic to this driver and its
/// version (spec §6).
pub fn user_agent_fragment() -> String {
    format!("ledgerdb-driver-rust/{}", env!("CARGO_PKG_VERSION"))
}

/// One-call-per-operation facade over the seven session/transaction verbs
/// (spec §4.2). A single `WireAdapter` instance corresponds to one server
/// session: `start_session` establishes the session token, and every later
/// call implicitly carries it (the session handle in spec §3's data model
/// is `(session_token, wire_adapter_ref)` -- the token lives inside the
/// adapter that opened it).
///
/// Implementations return the transport's error verbatim, classified into
/// an `ledgerdb_base::ErrorKind` but otherwise unmodified -- classification
/// into retry/abort/discard semantics is `ledgerdb-session`'s job, not this
/// crate's (spec §4.2: "no classification here").
pub trait WireAdapter: Send {
    fn start_session(&mut self, ledger_name: &str, ctx: &Context) -> Result<String>;
    fn end_session(&mut self, ctx: &Context) -> Result<()>;
    fn start_transaction(&mut self, ctx: &Context) -> Result<String>;
    fn abort_transaction(&mut self, ctx: &Context) -> Result<()>;
    fn commit_transaction(&mut self, transaction_id: &str, commit_digest: Digest, ctx: &Context) -> Result<Digest>;
    fn execute_statement(
        &mut self,
        transaction_id: &str,
        statement: &str,
        parameters: &[ValueHolder],
        ctx: &Context,
    ) -> Result<Page>;
    fn fetch_page(&mut self, transaction_id: &str, page_token: &str, ctx: &Context) -> Result<Page>;
}

/// Produces a fresh `WireAdapter` per session. The driver holds one factory
/// and defensively copies it at construction time (spec §4.5); each new
/// session gets its own adapter instance so that session tokens never leak
/// across sessions.
pub trait WireAdapterFactory: Clone + Send + Sync {
    type Adapter: WireAdapter;

    fn new_adapter(&self) -> Result<Self::Adapter>;
}
