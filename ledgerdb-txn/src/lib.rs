//! A single active server-side transaction (spec §4.3): tracks its id,
//! accumulates the rolling commit hash over every `(statement, params)`
//! tuple it issues, and verifies the server's digest at commit.
//!
//! The type parameter `W: WireAdapter` is this crate's stand-in for spec
//! design note's "user function as a first-class value over a capability
//! set" -- a `Transaction<'_, W>` *is* the capability object, and ordinary
//! Rust closures are already first-class callables, so there's no need for
//! the single-method-interface fallback the design notes describe for
//! languages without one.
//!
//! `ResultCursor` borrows its transaction's adapter for as long as it's
//! alive. That's not incidental: it's how the invariant in design note
//! "cursor-to-transaction binding" (an attempt to read past the first page
//! after the transaction ends must fail deterministically) is upheld --
//! here, at compile time, rather than with a runtime liveness flag. While a
//! cursor is live, the borrow checker makes it impossible to call
//! `commit`/`abort`/`id` on the transaction that produced it.

use std::collections::VecDeque;

use tracing::debug;

use ledgerdb_base::{Context, Error, ErrorKind, Result};
use ledgerdb_hash::{combine, hash, Digest};
use ledgerdb_wire::{IoUsage, Page, TimingInfo, ValueHolder, WireAdapter};

pub struct Transaction<'t, W: WireAdapter> {
    id: String,
    commit_hash: Digest,
    adapter: &'t mut W,
}

impl<'t, W: WireAdapter> Transaction<'t, W> {
    pub fn new(id: String, adapter: &'t mut W) -> Self {
        Transaction { id, commit_hash: Digest::EMPTY, adapter }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Issues a statement with its parameters, folding their digests into
    /// the transaction's commit hash *before* the network call goes out, so
    /// that even a rejected statement leaves the hash state deterministic
    /// (spec §4.3 algorithm step 2).
    pub fn execute(&mut self, statement: &str, params: &[ValueHolder], ctx: &Context) -> Result<ResultCursor<'_, W>> {
        let mut h = hash(&statement)?;
        for p in params {
            h = combine(&h, &p.digest());
        }
        self.commit_hash = combine(&self.commit_hash, &h);

        let page = self.adapter.execute_statement(&self.id, statement, params, ctx)?;
        debug!(transaction_id = %self.id, statement, "executed statement");
        Ok(ResultCursor::new(self.id.clone(), self.adapter, page))
    }

    /// Unconditional sentinel for "the user function wants to abort"
    /// (spec §4.3). Deliberately does not touch the network itself: the
    /// session is the one that knows, from the error-classification table
    /// (spec §4.4), whether a best-effort `abort_transaction` call is
    /// warranted at all, and it needs `self` to still be around afterward
    /// to make that call. A consuming `abort(self)` would hand the session
    /// a used-up transaction with nothing left to abort through.
    pub fn abort(&mut self) -> Error {
        debug!(transaction_id = %self.id, "user function requested abort");
        Error::new(ErrorKind::AbortedByUser)
    }

    /// Drains `cursor` to a `BufferedResult` independent of this
    /// transaction. Exists on `Transaction` for symmetry with the public
    /// contract in spec §4.3; the work is delegated to the cursor itself,
    /// since the cursor already holds everything it needs and taking `self`
    /// here would conflict with the very borrow the cursor holds.
    pub fn buffer(cursor: ResultCursor<'_, W>, ctx: &Context) -> Result<BufferedResult> {
        cursor.into_buffered(ctx)
    }

    /// Verifies the server's returned digest against the one the driver
    /// computed locally. Not part of the user-facing contract -- the
    /// session drives this after the user function returns successfully.
    /// Borrows rather than consumes `self` so the session can still issue a
    /// best-effort abort afterward if the commit itself failed.
    pub(crate) fn commit(&mut self, ctx: &Context) -> Result<()> {
        let returned = self.adapter.commit_transaction(&self.id, self.commit_hash, ctx)?;
        if returned != self.commit_hash {
            return Err(Error::new(ErrorKind::DigestMismatch));
        }
        Ok(())
    }

    pub(crate) fn best_effort_abort(&mut self, ctx: &Context) -> Result<()> {
        self.adapter.abort_transaction(ctx)
    }
}

/// One contiguous, lazily-paginated slice of result values, bound to the
/// transaction that produced it (spec §3's Result cursor).
pub struct ResultCursor<'t, W: WireAdapter> {
    transaction_id: String,
    adapter: &'t mut W,
    values: VecDeque<ValueHolder>,
    next_page_token: Option<String>,
    io_usage: IoUsage,
    timing_info: TimingInfo,
}

impl<'t, W: WireAdapter> ResultCursor<'t, W> {
    fn new(transaction_id: String, adapter: &'t mut W, page: Page) -> Self {
        ResultCursor {
            transaction_id,
            adapter,
            values: page.values.into(),
            next_page_token: page.next_page_token,
            io_usage: page.io_usage.unwrap_or_default(),
            timing_info: page.timing_info.unwrap_or_default(),
        }
    }

    /// `next_page_token == None && values.is_empty()` (spec §3's
    /// `index == len(values)`, rephrased over a deque we pop from instead of
    /// index into).
    pub fn is_exhausted(&self) -> bool {
        self.next_page_token.is_none() && self.values.is_empty()
    }

    pub fn io_usage(&self) -> IoUsage {
        self.io_usage
    }

    pub fn timing_info(&self) -> TimingInfo {
        self.timing_info
    }

    /// Returns the next value, fetching another page from the server if the
    /// current one is exhausted and a continuation token remains.
    pub fn next(&mut self, ctx: &Context) -> Result<Option<ValueHolder>> {
        loop {
            if let Some(v) = self.values.pop_front() {
                return Ok(Some(v));
            }
            let Some(token) = self.next_page_token.take() else {
                return Ok(None);
            };
            let page = self.adapter.fetch_page(&self.transaction_id, &token, ctx)?;
            self.values = page.values.into();
            self.next_page_token = page.next_page_token;
            if let Some(io) = page.io_usage {
                self.io_usage.read_ios += io.read_ios;
                self.io_usage.write_ios += io.write_ios;
            }
            if let Some(timing) = page.timing_info {
                self.timing_info.processing_time_ms += timing.processing_time_ms;
            }
        }
    }

    /// Drains the remainder of the cursor into an immutable snapshot whose
    /// lifetime is independent of this transaction (spec §3's Buffered
    /// result).
    pub fn into_buffered(mut self, ctx: &Context) -> Result<BufferedResult> {
        let mut values = Vec::new();
        while let Some(v) = self.next(ctx)? {
            values.push(v);
        }
        Ok(BufferedResult { values, io_usage: self.io_usage, timing_info: self.timing_info })
    }
}

#[derive(Debug, Clone)]
pub struct BufferedResult {
    pub values: Vec<ValueHolder>,
    pub io_usage: IoUsage,
    pub timing_info: TimingInfo,
}
