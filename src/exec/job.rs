use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::events::ExecEvent;
use super::listener::ScriptExecutionListener;
use super::processor::ProcessorId;
use super::statement::Statement;
use super::types::{
    ColumnInfo, ExecError, ExecResult, FetchConfig, StatementResult, Statistics,
};

/// How a script run reacts to a failing statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorHandling {
    /// Record the error and run the remaining statements.
    Continue,
    /// Stop the script at the first failing statement.
    Stop,
}

/// Database transport used by jobs. One implementation per backend; tests
/// supply a scripted fake.
///
/// `execute` must stop early and return [`ExecError::Cancelled`] when a
/// receiver callback returns that error, and `cancel_active` must interrupt
/// an in-flight `execute` on another thread.
pub trait DbSession: Send + Sync {
    fn execute(
        &self,
        statement: &Statement,
        config: &FetchConfig,
        receiver: &mut dyn DataReceiver,
    ) -> ExecResult<Vec<super::types::ExecuteResult>>;

    fn cancel_active(&self) -> ExecResult<()>;
}

/// Streaming callbacks invoked by a [`DbSession`] while a statement runs.
/// Called on the job's thread; an `Err` return aborts the statement.
pub trait DataReceiver {
    fn result_set_start(&mut self, result_set_index: usize, columns: &[ColumnInfo])
        -> ExecResult<()>;
    fn rows(&mut self, result_set_index: usize, rows: Vec<Vec<String>>) -> ExecResult<()>;
    fn result_set_end(&mut self, result_set_index: usize, row_count: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Finished,
    Cancelled,
}

/// Shared control block between a job and the coordinator that owns it.
/// The cancel flag is sticky; a cancelled job never runs another statement.
pub struct JobCtl {
    cancelled: AtomicBool,
    state: Mutex<JobState>,
}

impl JobCtl {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            state: Mutex::new(JobState::Pending),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> JobState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("job state lock was poisoned; recovering");
                *poisoned.into_inner()
            }
        }
    }

    fn set_state(&self, state: JobState) {
        match self.state.lock() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => {
                warn!("job state lock was poisoned; recovering");
                *poisoned.into_inner() = state;
            }
        }
    }
}

/// One submitted unit of work: a list of statements bound to a session and a
/// listener. Script jobs consume themselves on a worker thread via
/// [`run_script`](SqlJob::run_script); single-statement jobs stay parked on
/// the coordinator and are pulled lazily with
/// [`extract_data`](SqlJob::extract_data).
pub struct SqlJob {
    statements: Vec<Statement>,
    session: Arc<dyn DbSession>,
    ctl: Arc<JobCtl>,
    config: FetchConfig,
    listener: ScriptExecutionListener,
    events: Sender<ExecEvent>,
    processor: ProcessorId,
    fetch_results: bool,
    error_handling: ErrorHandling,
}

impl SqlJob {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        statements: Vec<Statement>,
        session: Arc<dyn DbSession>,
        ctl: Arc<JobCtl>,
        config: FetchConfig,
        listener: ScriptExecutionListener,
        events: Sender<ExecEvent>,
        processor: ProcessorId,
        fetch_results: bool,
        error_handling: ErrorHandling,
    ) -> Self {
        Self {
            statements,
            session,
            ctl,
            config,
            listener,
            events,
            processor,
            fetch_results,
            error_handling,
        }
    }

    pub fn set_result_set_limit(&mut self, row_offset: usize, max_rows: usize) {
        self.config.row_offset = row_offset;
        self.config.max_rows = max_rows;
    }

    pub fn set_fetch_size(&mut self, fetch_size: usize) {
        self.config.fetch_size = fetch_size;
    }

    pub fn set_fetch_flags(&mut self, fetch_flags: u64) {
        self.config.fetch_flags = fetch_flags;
    }

    pub fn set_data_filter(&mut self, filter: Option<super::types::DataFilter>) {
        self.config.data_filter = filter;
    }

    pub fn set_fetch_result_set_number(&mut self, number: Option<usize>) {
        self.config.fetch_result_set_number = number;
    }

    pub fn is_running(&self) -> bool {
        self.ctl.state() == JobState::Running
    }

    pub fn cancel(&self) {
        self.ctl.cancel();
    }

    /// Retire the job. No further statement will run; an in-flight one winds
    /// down cooperatively.
    pub fn close(&mut self) {
        self.ctl.cancel();
        self.ctl.set_state(JobState::Cancelled);
    }

    /// Worker-thread entry point for script execution. Consumes the job;
    /// everything the presentation side needs arrives as events.
    pub(crate) fn run_script(mut self) {
        self.ctl.set_state(JobState::Running);
        self.listener.on_start_script();
        let mut totals = Statistics::new();
        let mut has_errors = false;

        let statements = std::mem::take(&mut self.statements);
        for statement in &statements {
            if self.ctl.is_cancelled() {
                debug!("script cancelled, skipping remaining statements");
                break;
            }
            let result = self.execute_one(statement, &mut totals);
            if result.cancelled {
                break;
            }
            if result.has_error() {
                has_errors = true;
                if self.error_handling == ErrorHandling::Stop {
                    break;
                }
            }
        }

        let final_state = if self.ctl.is_cancelled() {
            JobState::Cancelled
        } else {
            JobState::Finished
        };
        self.listener.on_end_script(&totals, has_errors);
        self.ctl.set_state(final_state);
        info!(
            statements = totals.statements_executed,
            rows = totals.rows_fetched,
            errors = has_errors,
            "script run finished"
        );
    }

    /// Synchronous pull of one result set of a parked single-statement job.
    /// Runs on the caller's thread and blocks until the page is delivered.
    pub(crate) fn extract_data(&mut self, result_set_index: usize) -> ExecResult<Statistics> {
        if self.ctl.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        let statement = self
            .statements
            .first()
            .cloned()
            .ok_or_else(|| ExecError::Internal("job has no statement".into()))?;
        self.config.fetch_result_set_number = Some(result_set_index);
        self.ctl.set_state(JobState::Running);
        self.listener.on_begin_pull();
        let mut totals = Statistics::new();
        let result = self.execute_one(&statement, &mut totals);
        // The refresh flag covers exactly one pull.
        self.config.fetch_flags = 0;
        self.ctl.set_state(if result.cancelled {
            JobState::Cancelled
        } else {
            JobState::Finished
        });
        match result.error {
            Some(error) => Err(error),
            None if result.cancelled => Err(ExecError::Cancelled),
            None => Ok(totals),
        }
    }

    fn execute_one(&mut self, statement: &Statement, totals: &mut Statistics) -> StatementResult {
        self.listener.on_start_query(statement);
        let started = Instant::now();

        let mut receiver = EventReceiver {
            events: &self.events,
            ctl: &self.ctl,
            processor: self.processor,
            statement,
            fetch_results: self.fetch_results,
            fetch_result_set_number: self.config.fetch_result_set_number,
            max_rows: self.config.max_rows,
            delivered: Vec::new(),
        };
        let outcome = self.session.execute(statement, &self.config, &mut receiver);
        let query_time = started.elapsed();

        let result = match outcome {
            _ if self.ctl.is_cancelled() => StatementResult::stopped(statement.clone(), query_time),
            Err(ExecError::Cancelled) => StatementResult::stopped(statement.clone(), query_time),
            Err(error) => StatementResult::failure(statement.clone(), error, query_time),
            Ok(execute_results) => {
                StatementResult::success(statement.clone(), execute_results, query_time)
            }
        };

        let mut stmt_stats = Statistics::new();
        stmt_stats.statements_executed = 1;
        stmt_stats.execute_time = query_time;
        stmt_stats.total_time = query_time;
        for exec in &result.execute_results {
            stmt_stats.rows_fetched += exec.row_count;
            stmt_stats.rows_updated += exec.update_count.unwrap_or(0);
        }
        self.listener.on_end_query(&result, &stmt_stats);
        totals.merge(&stmt_stats);
        result
    }
}

/// Per-statement [`DataReceiver`] that turns transport callbacks into
/// presentation events.
///
/// Every result-set start is forwarded so containers can be materialized,
/// but row pages are gated: a pinned result-set filter wins, then secondary
/// result sets are dropped when the job was submitted without fetching.
struct EventReceiver<'a> {
    events: &'a Sender<ExecEvent>,
    ctl: &'a JobCtl,
    processor: ProcessorId,
    statement: &'a Statement,
    fetch_results: bool,
    fetch_result_set_number: Option<usize>,
    max_rows: usize,
    /// Row counts delivered so far, indexed by result set.
    delivered: Vec<usize>,
}

impl EventReceiver<'_> {
    fn should_deliver(&self, result_set_index: usize) -> bool {
        if let Some(wanted) = self.fetch_result_set_number {
            return wanted == result_set_index;
        }
        self.fetch_results || result_set_index == 0
    }

    fn send(&self, event: ExecEvent) -> ExecResult<()> {
        self.events
            .send(event)
            .map_err(|_| ExecError::Internal("presentation channel closed".into()))
    }

    fn check_cancel(&self) -> ExecResult<()> {
        if self.ctl.is_cancelled() {
            Err(ExecError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl DataReceiver for EventReceiver<'_> {
    fn result_set_start(
        &mut self,
        result_set_index: usize,
        columns: &[ColumnInfo],
    ) -> ExecResult<()> {
        self.check_cancel()?;
        while self.delivered.len() <= result_set_index {
            self.delivered.push(0);
        }
        self.send(ExecEvent::ResultSetStart {
            processor: self.processor,
            result_set_index,
            statement: self.statement.clone(),
            columns: columns.to_vec(),
        })
    }

    fn rows(&mut self, result_set_index: usize, mut rows: Vec<Vec<String>>) -> ExecResult<()> {
        self.check_cancel()?;
        if !self.should_deliver(result_set_index) {
            return Ok(());
        }
        if self.max_rows > 0 {
            let seen = self
                .delivered
                .get(result_set_index)
                .copied()
                .unwrap_or(0);
            if seen >= self.max_rows {
                return Ok(());
            }
            rows.truncate(self.max_rows - seen);
        }
        if let Some(slot) = self.delivered.get_mut(result_set_index) {
            *slot += rows.len();
        }
        self.send(ExecEvent::Rows {
            processor: self.processor,
            result_set_index,
            rows,
        })
    }

    fn result_set_end(&mut self, result_set_index: usize, row_count: usize) {
        if !self.should_deliver(result_set_index) {
            return;
        }
        let _ = self.send(ExecEvent::ResultSetEnd {
            processor: self.processor,
            result_set_index,
            row_count,
        });
    }
}
