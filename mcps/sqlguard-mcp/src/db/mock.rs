//! Scripted in-memory backend for executor tests
//!
//! Each session records what it was asked to do; fetch and execute replay
//! queued outcomes in order, falling back to an empty result.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Access, CatalogQueries, DbError, Row, SchemaName, SqlBackend, SqlSession};

pub(crate) static MOCK_CATALOG: CatalogQueries = CatalogQueries {
    tables_current: "tables_current",
    tables_in_schema: "tables_in_schema",
    columns_current: "columns_current",
    columns_in_schema: "columns_in_schema",
    schemas: "schemas",
};

/// What one session saw
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SessionLog {
    /// Mode passed to acquire
    pub access: Option<Access>,
    pub schema: Option<String>,
    /// (sql, bound params) in call order
    pub statements: Vec<(String, Vec<String>)>,
    /// Row limit passed to each fetch
    pub limits: Vec<usize>,
    pub finished: bool,
    pub discarded: bool,
}

#[derive(Default)]
struct MockState {
    acquire_results: VecDeque<Result<(), DbError>>,
    fetch_results: VecDeque<Result<Vec<Row>, DbError>>,
    execute_results: VecDeque<Result<u64, DbError>>,
    sessions: Vec<SessionLog>,
}

#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next acquire; unscripted acquires succeed
    pub fn push_acquire(self, result: Result<(), DbError>) -> Self {
        self.state.lock().unwrap().acquire_results.push_back(result);
        self
    }

    pub fn fail_acquire(self, err: DbError) -> Self {
        self.push_acquire(Err(err))
    }

    pub fn push_fetch(self, result: Result<Vec<Row>, DbError>) -> Self {
        self.state.lock().unwrap().fetch_results.push_back(result);
        self
    }

    pub fn push_execute(self, result: Result<u64, DbError>) -> Self {
        self.state.lock().unwrap().execute_results.push_back(result);
        self
    }

    pub fn sessions(&self) -> Vec<SessionLog> {
        self.state.lock().unwrap().sessions.clone()
    }

    /// Number of acquire calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.sessions().len()
    }
}

/// Build rows with a single column
pub(crate) fn rows_of(column: &str, values: &[&str]) -> Vec<Row> {
    values
        .iter()
        .map(|v| {
            let mut row = Row::new();
            row.insert(column.to_string(), serde_json::json!(v));
            row
        })
        .collect()
}

#[async_trait]
impl SqlBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn catalog(&self) -> &'static CatalogQueries {
        &MOCK_CATALOG
    }

    async fn acquire(&self, access: Access) -> Result<Box<dyn SqlSession>, DbError> {
        let mut state = self.state.lock().unwrap();
        state.sessions.push(SessionLog {
            access: Some(access),
            ..SessionLog::default()
        });
        if let Some(Err(err)) = state.acquire_results.pop_front() {
            return Err(err);
        }
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            index: state.sessions.len() - 1,
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    index: usize,
}

impl MockSession {
    fn record(&self, sql: &str, params: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.sessions[self.index].statements.push((
            sql.to_string(),
            params.iter().map(|p| p.to_string()).collect(),
        ));
    }
}

#[async_trait]
impl SqlSession for MockSession {
    async fn set_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.sessions[self.index].schema = Some(schema.as_str().to_string());
        Ok(())
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[&str],
        limit: usize,
    ) -> Result<Vec<Row>, DbError> {
        self.record(sql, params);
        let mut state = self.state.lock().unwrap();
        state.sessions[self.index].limits.push(limit);
        let mut rows = state.fetch_results.pop_front().unwrap_or(Ok(Vec::new()))?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.record(sql, &[]);
        let mut state = self.state.lock().unwrap();
        state.execute_results.pop_front().unwrap_or(Ok(0))
    }

    async fn finish(self: Box<Self>) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.sessions[self.index].finished = true;
        Ok(())
    }

    async fn discard(self: Box<Self>) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.sessions[self.index].discarded = true;
        Ok(())
    }
}
