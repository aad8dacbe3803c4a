use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::container::ContainerList;
use super::events::ExecEvent;
use super::job::{DbSession, ErrorHandling, JobCtl, SqlJob};
use super::listener::{QueryListener, ScriptExecutionListener};
use super::sink::SinkFactory;
use super::statement::Statement;
use super::types::{ExecError, ExecResult, FetchConfig, Statistics};

/// Stable identity of a coordinator, independent of its position in the
/// owning workbench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorId(pub(crate) u64);

/// State shared between a coordinator and its running job's listener.
pub(crate) struct ProcessorShared {
    /// Statements of this coordinator currently executing. Forced to zero on
    /// cancel so a stuck transport cannot wedge the busy guard.
    pub(crate) running: AtomicUsize,
    job: Mutex<Option<ActiveJob>>,
}

struct ActiveJob {
    ctl: Arc<JobCtl>,
    session: Arc<dyn DbSession>,
    /// Present only for parked single-statement jobs awaiting a lazy pull.
    job: Option<SqlJob>,
}

impl ProcessorShared {
    fn new() -> Self {
        Self {
            running: AtomicUsize::new(0),
            job: Mutex::new(None),
        }
    }

    fn lock_job(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        match self.job.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("active-job lock was poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Everything a submission needs beyond its statements: execution mode,
/// fetch configuration and the listener-facing preferences.
pub(crate) struct JobSpec {
    pub script_mode: bool,
    pub fetch_results: bool,
    pub config: FetchConfig,
    pub original_selection: Option<(usize, usize)>,
    pub update_period: Duration,
    pub close_on_error: bool,
    pub reset_cursor_on_execute: bool,
    pub maximize_editor_on_script: bool,
    pub error_handling: ErrorHandling,
    pub ext_listener: Option<Box<dyn QueryListener>>,
}

/// One query coordinator: a group of result containers plus at most one
/// active job. The owning workbench serializes all calls; only the job's
/// worker thread runs concurrently, and it communicates through events and
/// the shared control block.
pub struct QueryProcessor {
    id: ProcessorId,
    containers: ContainerList,
    shared: Arc<ProcessorShared>,
}

impl QueryProcessor {
    pub(crate) fn new(
        id: ProcessorId,
        factory: &mut dyn SinkFactory,
        next_tab_index: &mut usize,
    ) -> ExecResult<Self> {
        Ok(Self {
            id,
            containers: ContainerList::with_default(id, factory, next_tab_index)?,
            shared: Arc::new(ProcessorShared::new()),
        })
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn containers(&self) -> &ContainerList {
        &self.containers
    }

    pub(crate) fn containers_mut(&mut self) -> &mut ContainerList {
        &mut self.containers
    }

    /// Number of this coordinator's statements currently executing.
    pub fn running_jobs(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Unsaved result edits or a job still in flight both count as dirty:
    /// closing the editor in either state loses work.
    pub fn is_dirty(&self) -> bool {
        self.containers.is_dirty() || self.running_jobs() > 0
    }

    pub fn has_pinned(&self) -> bool {
        self.containers.has_pinned()
    }

    /// Submit statements for execution. Script jobs go to a worker thread;
    /// a single statement is parked for a lazy synchronous pull.
    pub(crate) fn process_queries(
        &mut self,
        statements: Vec<Statement>,
        session: Arc<dyn DbSession>,
        mut spec: JobSpec,
        events: Sender<ExecEvent>,
    ) -> ExecResult<()> {
        if statements.is_empty() {
            return Err(ExecError::EmptyScript);
        }
        if self.running_jobs() > 0 {
            return Err(ExecError::Busy);
        }
        self.close_job();

        let ctl = Arc::new(JobCtl::new());
        let mut listener = ScriptExecutionListener::new(
            self.id,
            Arc::clone(&self.shared),
            events.clone(),
            spec.script_mode,
            spec.original_selection,
            spec.update_period,
            spec.close_on_error,
            spec.reset_cursor_on_execute,
            spec.maximize_editor_on_script,
        );
        if let Some(ext) = spec.ext_listener.take() {
            listener.set_ext_listener(ext);
        }

        let script_mode = spec.script_mode;
        let job = SqlJob::new(
            statements,
            Arc::clone(&session),
            Arc::clone(&ctl),
            spec.config,
            listener,
            events,
            self.id,
            spec.fetch_results,
            spec.error_handling,
        );

        let parked = if script_mode {
            thread::Builder::new()
                .name(format!("sql-script-{}", self.id.0))
                .spawn(move || job.run_script())
                .map_err(|e| ExecError::Internal(format!("failed to spawn script thread: {e}")))?;
            None
        } else {
            Some(job)
        };

        *self.shared.lock_job() = Some(ActiveJob {
            ctl,
            session,
            job: parked,
        });
        debug!(processor = self.id.0, script_mode, "job submitted");
        Ok(())
    }

    /// Pull one result set of the parked single-statement job. Blocks the
    /// calling thread until the page has been delivered as events.
    pub(crate) fn pull_data(&mut self, result_set_index: usize) -> ExecResult<Statistics> {
        // The job leaves the slot while it runs so a cancel issued through
        // the control block never has to wait on this lock.
        let mut job = {
            let mut guard = self.shared.lock_job();
            match guard.as_mut().and_then(|active| active.job.take()) {
                Some(job) => job,
                None => return Err(ExecError::Internal("no parked job to pull from".into())),
            }
        };
        let outcome = job.extract_data(result_set_index);
        if let Some(active) = self.shared.lock_job().as_mut() {
            active.job = Some(job);
        }
        outcome
    }

    /// Reconfigure the parked job before the next pull.
    pub(crate) fn with_parked_job<R>(
        &mut self,
        f: impl FnOnce(&mut SqlJob) -> R,
    ) -> Option<R> {
        let mut guard = self.shared.lock_job();
        guard
            .as_mut()
            .and_then(|active| active.job.as_mut())
            .map(f)
    }

    /// Cancel whatever this coordinator is running. Harmless when idle or
    /// repeated: the flag is sticky and the counter reset is absolute.
    pub fn cancel_job(&mut self) {
        let (ctl, session) = {
            let guard = self.shared.lock_job();
            match guard.as_ref() {
                Some(active) => (Arc::clone(&active.ctl), Arc::clone(&active.session)),
                None => return,
            }
        };
        ctl.cancel();
        if let Err(error) = session.cancel_active() {
            warn!(%error, "transport cancel failed; relying on cooperative stop");
        }
        for container in self.containers.iter_mut() {
            container.sink_mut().cancel_pending();
        }
        // Forced reset: the busy guard must clear even if the transport
        // never delivers the cancellation.
        self.shared.running.store(0, Ordering::SeqCst);
        info!(processor = self.id.0, "job cancelled");
    }

    /// Drop the previous job, if any. Running jobs keep their control block
    /// alive through their own Arc and wind down cooperatively.
    pub(crate) fn close_job(&mut self) {
        if let Some(mut active) = self.shared.lock_job().take() {
            if let Some(job) = active.job.as_mut() {
                job.close();
            }
            debug!(processor = self.id.0, "previous job discarded");
        }
    }

    /// Close every result surface. Called when the coordinator is removed
    /// from its workbench.
    pub(crate) fn dispose(&mut self) {
        self.cancel_job();
        self.close_job();
        for container in self.containers.iter_mut() {
            container.sink_mut().close();
        }
    }
}
