use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;

use super::statement::Statement;

/// Fetch flag requesting a full refresh of an already-populated container.
pub const FETCH_FLAG_REFRESH: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
        }
    }
}

/// Outcome of one result set produced by a statement. A single statement may
/// produce several of these (stored procedures, multi-cursor selects).
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub result_set_index: usize,
    pub result_set_name: Option<String>,
    pub row_count: usize,
    pub update_count: Option<u64>,
}

impl ExecuteResult {
    pub fn rows(result_set_index: usize, row_count: usize) -> Self {
        Self {
            result_set_index,
            result_set_name: None,
            row_count,
            update_count: None,
        }
    }

    pub fn updated(update_count: u64) -> Self {
        Self {
            result_set_index: 0,
            result_set_name: None,
            row_count: 0,
            update_count: Some(update_count),
        }
    }
}

/// Terminal record for one executed statement.
///
/// An error ends up in `error`; cancellation is not an error and is flagged
/// separately so callers can distinguish "failed" from "stopped".
#[derive(Debug, Clone)]
pub struct StatementResult {
    pub statement: Statement,
    pub error: Option<ExecError>,
    pub cancelled: bool,
    pub execute_results: Vec<ExecuteResult>,
    pub query_time: Duration,
}

impl StatementResult {
    pub fn success(
        statement: Statement,
        execute_results: Vec<ExecuteResult>,
        query_time: Duration,
    ) -> Self {
        Self {
            statement,
            error: None,
            cancelled: false,
            execute_results,
            query_time,
        }
    }

    pub fn failure(statement: Statement, error: ExecError, query_time: Duration) -> Self {
        Self {
            statement,
            error: Some(error),
            cancelled: false,
            execute_results: Vec::new(),
            query_time,
        }
    }

    pub fn stopped(statement: Statement, query_time: Duration) -> Self {
        Self {
            statement,
            error: None,
            cancelled: true,
            execute_results: Vec::new(),
            query_time,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Human-readable status line for the bound container.
    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Error: {}", error);
        }
        if self.cancelled {
            return "Execution cancelled".to_string();
        }
        let rows_fetched: usize = self.execute_results.iter().map(|r| r.row_count).sum();
        let rows_updated: u64 = self
            .execute_results
            .iter()
            .filter_map(|r| r.update_count)
            .sum();
        if rows_updated > 0 {
            format!("{} row(s) affected", rows_updated)
        } else {
            format!("{} row(s) fetched", rows_fetched)
        }
    }
}

/// Accumulated execution statistics for one statement or one whole script run.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub start_time: DateTime<Local>,
    pub statements_executed: usize,
    pub rows_fetched: usize,
    pub rows_updated: u64,
    pub execute_time: Duration,
    pub total_time: Duration,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            statements_executed: 0,
            rows_fetched: 0,
            rows_updated: 0,
            execute_time: Duration::ZERO,
            total_time: Duration::ZERO,
        }
    }

    /// Fold another statistics record into this one, keeping the earliest
    /// start time. Used to aggregate per-statement records over a script.
    pub fn merge(&mut self, other: &Statistics) {
        if other.start_time < self.start_time {
            self.start_time = other.start_time;
        }
        self.statements_executed += other.statements_executed;
        self.rows_fetched += other.rows_fetched;
        self.rows_updated += other.rows_updated;
        self.execute_time += other.execute_time;
        self.total_time += other.total_time;
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Row filter applied to a container's reads after the user pivots into a
/// filtered sub-view. Opaque to the core; the transport interprets it.
#[derive(Debug, Clone, Default)]
pub struct DataFilter {
    pub where_clause: String,
}

impl DataFilter {
    pub fn has_filters(&self) -> bool {
        !self.where_clause.trim().is_empty()
    }
}

/// Per-read configuration applied before each data pull.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub row_offset: usize,
    /// 0 means unlimited.
    pub max_rows: usize,
    pub fetch_size: usize,
    pub fetch_flags: u64,
    pub data_filter: Option<DataFilter>,
    /// When set, row pages are delivered only for this result-set index.
    pub fetch_result_set_number: Option<usize>,
}

impl FetchConfig {
    pub fn has_limits(&self) -> bool {
        self.max_rows > 0
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            row_offset: 0,
            max_rows: 1000,
            fetch_size: 100,
            fetch_flags: 0,
            data_filter: None,
            fetch_result_set_number: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("a query is already running in this tab")]
    Busy,

    #[error("not connected to database")]
    NotConnected,

    #[error("nothing to execute")]
    EmptyScript,

    #[error("{0}")]
    Execution(String),

    #[error("execution was cancelled")]
    Cancelled,

    #[error("result pane could not be created: {0}")]
    Presentation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ExecResult<T> = Result<T, ExecError>;
