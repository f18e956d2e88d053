//! A scripted, in-memory stand-in for a live ledger service, used by the
//! unit tests in this crate and in `ledgerdb-session`/`ledgerdb`. Nothing
//! here talks to a network; it exists purely so those crates' tests can
//! drive the S1-S6 scenarios from spec §8 without a real server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ledgerdb_base::{Context, Error, ErrorKind, Result};
use ledgerdb_hash::Digest;

use crate::{Page, ValueHolder, WireAdapter, WireAdapterFactory};

#[derive(Default)]
struct Script {
    start_session: VecDeque<Result<String>>,
    end_session: VecDeque<Result<()>>,
    start_transaction: VecDeque<Result<String>>,
    abort_transaction: VecDeque<Result<()>>,
    commit_transaction: VecDeque<Result<Digest>>,
    execute_statement: VecDeque<Result<Page>>,
    fetch_page: VecDeque<Result<Page>>,
    calls: Vec<&'static str>,
    sessions_started: u32,
}

/// Shared handle to a scripted server: clone it into test setup, queue
/// responses, then hand `.factory()` to the code under test. Call counts
/// (`calls()`, `sessions_started()`) let tests assert properties like "the
/// server saw exactly two transaction attempts" (spec §8, property 6).
#[derive(Clone, Default)]
pub struct MockScript(Arc<Mutex<Script>>);

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_start_session(&self, result: Result<String>) -> &Self {
        self.0.lock().unwrap().start_session.push_back(result);
        self
    }

    pub fn push_end_session(&self, result: Result<()>) -> &Self {
        self.0.lock().unwrap().end_session.push_back(result);
        self
    }

    pub fn push_start_transaction(&self, result: Result<String>) -> &Self {
        self.0.lock().unwrap().start_transaction.push_back(result);
        self
    }

    pub fn push_abort_transaction(&self, result: Result<()>) -> &Self {
        self.0.lock().unwrap().abort_transaction.push_back(result);
        self
    }

    pub fn push_commit_transaction(&self, result: Result<Digest>) -> &Self {
        self.0.lock().unwrap().commit_transaction.push_back(result);
        self
    }

    pub fn push_execute_statement(&self, result: Result<Page>) -> &Self {
        self.0.lock().unwrap().execute_statement.push_back(result);
        self
    }

    pub fn push_fetch_page(&self, result: Result<Page>) -> &Self {
        self.0.lock().unwrap().fetch_page.push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn sessions_started(&self) -> u32 {
        self.0.lock().unwrap().sessions_started
    }

    fn record(&self, verb: &'static str) {
        self.0.lock().unwrap().calls.push(verb);
    }

    pub fn factory(&self) -> MockFactory {
        MockFactory(self.clone())
    }
}

fn empty_queue_error(verb: &str) -> Error {
    Error::with_cause(
        ErrorKind::Transport,
        std::io::Error::new(std::io::ErrorKind::Other, format!("mock script exhausted for {verb}")),
    )
}

pub struct MockAdapter {
    script: MockScript,
    session_token: Option<String>,
}

impl WireAdapter for MockAdapter {
    fn start_session(&mut self, _ledger_name: &str, ctx: &Context) -> Result<String> {
        ctx.check()?;
        self.script.record("start_session");
        let mut inner = self.script.0.lock().unwrap();
        inner.sessions_started += 1;
        let result = inner.start_session.pop_front().unwrap_or_else(|| Err(empty_queue_error("start_session")));
        drop(inner);
        if let Ok(token) = &result {
            self.session_token = Some(token.clone());
        }
        result
    }

    fn end_session(&mut self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        self.script.record("end_session");
        let mut inner = self.script.0.lock().unwrap();
        inner.end_session.pop_front().unwrap_or(Ok(()))
    }

    fn start_transaction(&mut self, ctx: &Context) -> Result<String> {
        ctx.check()?;
        self.script.record("start_transaction");
        let mut inner = self.script.0.lock().unwrap();
        inner.start_transaction.pop_front().unwrap_or_else(|| Err(empty_queue_error("start_transaction")))
    }

    fn abort_transaction(&mut self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        self.script.record("abort_transaction");
        let mut inner = self.script.0.lock().unwrap();
        inner.abort_transaction.pop_front().unwrap_or(Ok(()))
    }

    fn commit_transaction(&mut self, _transaction_id: &str, _commit_digest: Digest, ctx: &Context) -> Result<Digest> {
        ctx.check()?;
        self.script.record("commit_transaction");
        let mut inner = self.script.0.lock().unwrap();
        inner.commit_transaction.pop_front().unwrap_or_else(|| Err(empty_queue_error("commit_transaction")))
    }

    fn execute_statement(
        &mut self,
        _transaction_id: &str,
        _statement: &str,
        _parameters: &[ValueHolder],
        ctx: &Context,
    ) -> Result<Page> {
        ctx.check()?;
        self.script.record("execute_statement");
        let mut inner = self.script.0.lock().unwrap();
        inner.execute_statement.pop_front().unwrap_or_else(|| Err(empty_queue_error("execute_statement")))
    }

    fn fetch_page(&mut self, _transaction_id: &str, _page_token: &str, ctx: &Context) -> Result<Page> {
        ctx.check()?;
        self.script.record("fetch_page");
        let mut inner = self.script.0.lock().unwrap();
        inner.fetch_page.pop_front().unwrap_or_else(|| Err(empty_queue_error("fetch_page")))
    }
}

#[derive(Clone)]
pub struct MockFactory(MockScript);

impl WireAdapterFactory for MockFactory {
    type Adapter = MockAdapter;

    fn new_adapter(&self) -> Result<MockAdapter> {
        Ok(MockAdapter { script: self.0.clone(), session_token: None })
    }
}
