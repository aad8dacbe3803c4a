use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::utils::config::ExecPreferences;

use super::events::ExecEvent;
use super::job::DbSession;
use super::listener::QueryListener;
use super::processor::{JobSpec, ProcessorId, QueryProcessor};
use super::running;
use super::sink::{EditorSurface, SinkFactory};
use super::statement::Statement;
use super::types::{
    DataFilter, ExecError, ExecResult, FetchConfig, Statistics, FETCH_FLAG_REFRESH,
};

/// Upper bound on events handled per [`Workbench::pump`] call so a flood of
/// row pages cannot starve the presentation thread.
const MAX_EVENTS_PER_PUMP: usize = 200;

/// Caption for a results tab. `processor_position` is the coordinator's
/// position among its siblings; an `explicit` name from the transport wins
/// over the generated one. Secondary result sets number by result-set
/// index, otherwise by coordinator position, never both.
pub fn results_tab_name(
    result_set_index: usize,
    processor_position: usize,
    explicit: Option<&str>,
) -> String {
    let mut name = match explicit {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => "Results".to_string(),
    };
    if result_set_index > 0 {
        name = format!("{} - {}", name, result_set_index + 1);
    } else if processor_position > 0 {
        name = format!("{} - {}", name, processor_position + 1);
    }
    name
}

/// Per-submission options. Everything not set here comes from the
/// persisted [`ExecPreferences`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run as a script on a worker thread even for one statement.
    pub script_mode: bool,
    /// Force a fresh results tab instead of reusing the current one.
    pub new_tab: bool,
    /// The results go to an export consumer: never close existing tabs.
    pub export: bool,
    /// Deliver rows for secondary result sets too, not just the first.
    pub fetch_results: bool,
    /// Override the persisted close-tab-on-error preference.
    pub close_on_error: Option<bool>,
}

/// Presentation-side hub: owns the coordinators, the editor surface and the
/// event channel. All methods must be called from one thread; worker threads
/// only ever talk to it through the channel.
pub struct Workbench {
    processors: Vec<QueryProcessor>,
    cur_processor: Option<ProcessorId>,
    next_processor_id: u64,
    next_tab_index: usize,
    session: Option<Arc<dyn DbSession>>,
    factory: Box<dyn SinkFactory>,
    editor: Box<dyn EditorSurface>,
    prefs: ExecPreferences,
    events_tx: Sender<ExecEvent>,
    events_rx: Receiver<ExecEvent>,
    editor_maximized_for_run: bool,
}

impl Workbench {
    pub fn new(
        factory: Box<dyn SinkFactory>,
        editor: Box<dyn EditorSurface>,
        prefs: ExecPreferences,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            processors: Vec::new(),
            cur_processor: None,
            next_processor_id: 0,
            next_tab_index: 0,
            session: None,
            factory,
            editor,
            prefs,
            events_tx,
            events_rx,
            editor_maximized_for_run: false,
        }
    }

    pub fn set_session(&mut self, session: Option<Arc<dyn DbSession>>) {
        self.session = session;
    }

    pub fn preferences(&self) -> &ExecPreferences {
        &self.prefs
    }

    pub fn preferences_mut(&mut self) -> &mut ExecPreferences {
        &mut self.prefs
    }

    pub fn processors(&self) -> &[QueryProcessor] {
        &self.processors
    }

    pub fn current_processor(&self) -> Option<&QueryProcessor> {
        let id = self.cur_processor?;
        self.processors.iter().find(|p| p.id() == id)
    }

    /// True when any coordinator holds unsaved result edits or is still
    /// running a job.
    pub fn is_dirty(&self) -> bool {
        self.processors.iter().any(|p| p.is_dirty())
    }

    pub fn has_running_jobs(&self) -> bool {
        self.processors.iter().any(|p| p.running_jobs() > 0)
    }

    /// Snapshot of every statement currently executing, across all editors
    /// in the process.
    pub fn running_statements(&self) -> Vec<Statement> {
        running::snapshot()
    }

    /// Submit statements for execution on the coordinator the multiplexing
    /// policy picks. Single statements run synchronously on this thread;
    /// scripts return immediately and stream through [`pump`](Self::pump).
    pub fn process_queries(
        &mut self,
        statements: Vec<Statement>,
        options: RunOptions,
        mut ext_listener: Option<Box<dyn QueryListener>>,
    ) -> ExecResult<()> {
        if statements.is_empty() {
            return Err(ExecError::EmptyScript);
        }
        let session = self.session.clone().ok_or(ExecError::NotConnected)?;
        let single = statements.len() == 1 && !options.script_mode;
        let close_on_error = options
            .close_on_error
            .unwrap_or(self.prefs.close_tab_on_error);

        if !single && self.prefs.script_tab_per_statement {
            // Tab per statement: every statement gets its own coordinator
            // and they run concurrently.
            for statement in statements {
                let pos = self.create_processor()?;
                self.cur_processor = Some(self.processors[pos].id());
                let mut spec = self.job_spec(true, options.fetch_results, close_on_error);
                spec.ext_listener = ext_listener.take();
                self.processors[pos].process_queries(
                    vec![statement],
                    Arc::clone(&session),
                    spec,
                    self.events_tx.clone(),
                )?;
            }
            return Ok(());
        }

        let new_tab = options.new_tab || (single && !self.prefs.replace_single_tab);
        let pos = self.choose_processor(single, new_tab)?;
        self.cur_processor = Some(self.processors[pos].id());
        if !options.export {
            self.close_extra_result_tabs(pos);
        }

        let mut spec = self.job_spec(!single, options.fetch_results, close_on_error);
        spec.ext_listener = ext_listener.take();

        if single {
            let statement = match statements.into_iter().next() {
                Some(statement) => statement,
                None => return Err(ExecError::EmptyScript),
            };
            self.processors[pos]
                .containers_mut()
                .first_mut()
                .bind_query(statement.clone());
            self.processors[pos].process_queries(
                vec![statement],
                session,
                spec,
                self.events_tx.clone(),
            )?;
            let outcome = self.processors[pos].pull_data(0);
            self.pump();
            outcome.map(|_| ())
        } else {
            self.processors[pos].process_queries(statements, session, spec, self.events_tx.clone())
        }
    }

    /// Pull a secondary result set of the current coordinator's parked job.
    pub fn pull_data(&mut self, result_set_index: usize) -> ExecResult<Statistics> {
        let pos = self.current_position().ok_or(ExecError::Internal(
            "no current query coordinator".into(),
        ))?;
        let outcome = self.processors[pos].pull_data(result_set_index);
        self.pump();
        outcome
    }

    /// Adjust the fetch window of the current coordinator's parked job for
    /// subsequent pulls. Returns false when nothing is parked.
    pub fn set_fetch_window(
        &mut self,
        row_offset: usize,
        max_rows: usize,
        fetch_size: usize,
    ) -> bool {
        let Some(pos) = self.current_position() else {
            return false;
        };
        self.processors[pos]
            .with_parked_job(|job| {
                job.set_result_set_limit(row_offset, max_rows);
                job.set_fetch_size(fetch_size);
            })
            .is_some()
    }

    /// Re-run the current coordinator's parked statement with the refresh
    /// flag set, replacing the first result set.
    pub fn refresh_current(&mut self) -> ExecResult<Statistics> {
        let pos = self.current_position().ok_or(ExecError::Internal(
            "no current query coordinator".into(),
        ))?;
        self.processors[pos].with_parked_job(|job| {
            job.set_fetch_flags(FETCH_FLAG_REFRESH);
        });
        let outcome = self.processors[pos].pull_data(0);
        self.pump();
        outcome
    }

    /// Apply a row filter to the current coordinator's parked statement and
    /// re-pull its first result set.
    pub fn apply_data_filter(&mut self, filter: Option<DataFilter>) -> ExecResult<Statistics> {
        let pos = self.current_position().ok_or(ExecError::Internal(
            "no current query coordinator".into(),
        ))?;
        self.processors[pos].with_parked_job(|job| {
            job.set_data_filter(filter);
            job.set_fetch_flags(FETCH_FLAG_REFRESH);
        });
        let outcome = self.processors[pos].pull_data(0);
        self.pump();
        outcome
    }

    /// Cancel the current coordinator's running job, if any.
    pub fn cancel_current(&mut self) {
        if let Some(pos) = self.current_position() {
            self.processors[pos].cancel_job();
        }
        self.pump();
    }

    pub fn cancel_all(&mut self) {
        for processor in &mut self.processors {
            processor.cancel_job();
        }
        self.pump();
    }

    /// Teardown path for editor close: cancel everything and force every
    /// busy signal back to idle, even if a transport never acknowledges.
    pub fn force_idle(&mut self) {
        self.cancel_all();
        running::reset();
        self.editor.set_busy_cue(false);
        info!("all jobs cancelled, busy state forced idle");
    }

    /// New container on the current coordinator showing an alternate data
    /// source. Returns its tab index.
    pub fn create_container_for_data(&mut self, source_name: &str) -> ExecResult<usize> {
        let pos = match self.current_position() {
            Some(pos) => pos,
            None => {
                let pos = self.create_processor()?;
                self.cur_processor = Some(self.processors[pos].id());
                pos
            }
        };
        let Self {
            processors,
            factory,
            next_tab_index,
            ..
        } = self;
        let processor = &mut processors[pos];
        let id = processor.id();
        processor.containers_mut().create_for_data_container(
            id,
            source_name,
            factory.as_mut(),
            next_tab_index,
        )
    }

    pub fn set_container_pinned(&mut self, tab_index: usize, pinned: bool) -> bool {
        for processor in &mut self.processors {
            if let Some(container) = processor.containers_mut().by_tab_index_mut(tab_index) {
                container.set_pinned(pinned);
                return true;
            }
        }
        false
    }

    /// Close one results tab. A coordinator whose last container closes is
    /// disposed with it. Returns false when the tab index is unknown.
    pub fn close_container(&mut self, tab_index: usize) -> bool {
        let Some(pos) = self
            .processors
            .iter()
            .position(|p| p.containers().iter().any(|c| c.tab_index() == tab_index))
        else {
            return false;
        };
        if let Some(mut removed) = self.processors[pos].containers_mut().remove(tab_index) {
            removed.sink_mut().close();
        }
        if self.processors[pos].containers().is_empty() {
            let mut processor = self.processors.remove(pos);
            processor.dispose();
            if self.cur_processor == Some(processor.id()) {
                self.cur_processor = self.processors.last().map(|p| p.id());
            }
            debug!("query coordinator disposed with its last tab");
        }
        true
    }

    /// Drain pending job events and apply them to containers and the editor
    /// surface. Call from the presentation thread's idle loop. Returns the
    /// number of events handled; a full batch means more are waiting.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while handled < MAX_EVENTS_PER_PUMP {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    fn handle_event(&mut self, event: ExecEvent) {
        match event {
            ExecEvent::ScriptStarted {
                processor,
                maximize_editor,
            } => {
                debug!(processor = ?processor, "script started");
                if maximize_editor {
                    self.editor.set_editor_maximized(true);
                    self.editor_maximized_for_run = true;
                }
            }
            ExecEvent::BusyCue { executing } => self.editor.set_busy_cue(executing),
            ExecEvent::RevealStatement { offset, length } => {
                self.editor.reveal_span(offset, length)
            }
            ExecEvent::ClearErrorMarkers => self.editor.clear_error_markers(),
            ExecEvent::SetSelection { offset, length } => {
                self.editor.set_selection(offset, length)
            }
            ExecEvent::ErrorMarker {
                offset,
                length,
                message,
            } => self.editor.add_error_marker(offset, length, &message),
            ExecEvent::ResultSetStart {
                processor,
                result_set_index,
                statement,
                columns,
            } => {
                let Some(pos) = self.position_of(processor) else {
                    return;
                };
                let Self {
                    processors,
                    factory,
                    next_tab_index,
                    ..
                } = self;
                let proc = &mut processors[pos];
                if let Err(error) = proc.containers_mut().create_for_result_index(
                    processor,
                    result_set_index,
                    factory.as_mut(),
                    next_tab_index,
                ) {
                    warn!(%error, "results container creation failed");
                    return;
                }
                let name = results_tab_name(result_set_index, pos, None);
                if let Some(container) =
                    proc.containers_mut().statement_container_mut(result_set_index)
                {
                    container.bind_query(statement);
                    container.update_results_name(&name, false);
                    container.sink_mut().start_result_set(&columns);
                }
            }
            ExecEvent::Rows {
                processor,
                result_set_index,
                rows,
            } => {
                if let Some(container) = self.statement_container(processor, result_set_index) {
                    container.sink_mut().append_rows(rows);
                }
            }
            ExecEvent::ResultSetEnd {
                processor,
                result_set_index,
                row_count,
            } => {
                if let Some(container) = self.statement_container(processor, result_set_index) {
                    container.sink_mut().finish_result_set(row_count);
                }
            }
            ExecEvent::StatementFinished {
                processor,
                result,
                statistics,
                close_on_error,
            } => self.on_statement_finished(processor, result, statistics, close_on_error),
            ExecEvent::ScriptFinished {
                processor,
                statistics,
                has_errors,
            } => {
                if self.editor_maximized_for_run {
                    self.editor.set_editor_maximized(false);
                    self.editor_maximized_for_run = false;
                }
                if let Some(pos) = self.position_of(processor) {
                    let container = self.processors[pos].containers_mut().first_mut();
                    container.apply_statistics(&statistics);
                }
                debug!(processor = ?processor, has_errors, "script finished");
            }
        }
    }

    fn on_statement_finished(
        &mut self,
        processor: ProcessorId,
        result: super::types::StatementResult,
        statistics: Statistics,
        close_on_error: bool,
    ) {
        let Some(pos) = self.position_of(processor) else {
            return;
        };
        let summary = result.summary();
        let failed = result.has_error();
        let mut close_tabs = Vec::new();

        {
            let proc = &mut self.processors[pos];
            let mut bound = false;
            for container in proc.containers_mut().bound_to_mut(&result.statement) {
                bound = true;
                container.sink_mut().set_status(&summary, failed);
                container.apply_statistics(&statistics);
                if !failed && !result.cancelled {
                    container.mark_good();
                }
            }
            if failed {
                // A statement that dies before its first result set never
                // bound a container; the default one carries the error.
                if !bound {
                    let container = proc.containers_mut().first_mut();
                    container.sink_mut().set_status(&summary, true);
                    container.apply_statistics(&statistics);
                }
                if close_on_error {
                    let first = proc.containers_mut().first_mut();
                    if !first.is_pinned() {
                        close_tabs.push(first.tab_index());
                    }
                }
            }
            // Explicit result-set names from the transport override the
            // generated captions.
            for exec in &result.execute_results {
                if let Some(name) = exec.result_set_name.as_deref() {
                    if let Some(container) = proc
                        .containers_mut()
                        .statement_container_mut(exec.result_set_index)
                    {
                        container.update_results_name(
                            &results_tab_name(exec.result_set_index, pos, Some(name)),
                            false,
                        );
                    }
                }
            }
        }

        for tab_index in close_tabs {
            self.close_container(tab_index);
        }
    }

    fn statement_container(
        &mut self,
        processor: ProcessorId,
        result_set_index: usize,
    ) -> Option<&mut super::container::ResultsContainer> {
        let pos = self.position_of(processor)?;
        self.processors[pos]
            .containers_mut()
            .statement_container_mut(result_set_index)
    }

    fn position_of(&self, id: ProcessorId) -> Option<usize> {
        self.processors.iter().position(|p| p.id() == id)
    }

    fn current_position(&self) -> Option<usize> {
        self.cur_processor.and_then(|id| self.position_of(id))
    }

    fn create_processor(&mut self) -> ExecResult<usize> {
        let id = ProcessorId(self.next_processor_id);
        let Self {
            factory,
            next_tab_index,
            ..
        } = self;
        let processor = QueryProcessor::new(id, factory.as_mut(), next_tab_index)?;
        self.next_processor_id += 1;
        self.processors.push(processor);
        Ok(self.processors.len() - 1)
    }

    /// Pick the coordinator a submission runs on.
    ///
    /// A forced new tab always gets a fresh coordinator. Otherwise the
    /// current one is reused unless it is busy or holds pinned tabs; in that
    /// case a single statement first looks for any idle unpinned coordinator
    /// in creation order before a new one is made.
    fn choose_processor(&mut self, single: bool, new_tab: bool) -> ExecResult<usize> {
        if new_tab {
            return self.create_processor();
        }
        let Some(pos) = self.current_position() else {
            return self.create_processor();
        };
        let current = &self.processors[pos];
        if current.has_pinned() || current.running_jobs() > 0 {
            if single {
                if let Some(idle) = self
                    .processors
                    .iter()
                    .position(|p| p.running_jobs() == 0 && !p.has_pinned())
                {
                    return Ok(idle);
                }
            }
            return self.create_processor();
        }
        Ok(pos)
    }

    fn close_extra_result_tabs(&mut self, pos: usize) {
        let tabs = self.processors[pos].containers().extra_unpinned_tab_indices();
        for tab_index in tabs {
            if let Some(mut removed) = self.processors[pos].containers_mut().remove(tab_index) {
                removed.sink_mut().close();
            }
        }
    }

    fn job_spec(&self, script_mode: bool, fetch_results: bool, close_on_error: bool) -> JobSpec {
        JobSpec {
            script_mode,
            fetch_results,
            config: FetchConfig {
                max_rows: self.prefs.max_rows,
                ..FetchConfig::default()
            },
            original_selection: self.editor.selection(),
            update_period: Duration::from_millis(self.prefs.ui_update_period_ms),
            close_on_error,
            reset_cursor_on_execute: self.prefs.reset_cursor_on_execute,
            maximize_editor_on_script: self.prefs.maximize_editor_on_script,
            error_handling: self.prefs.error_handling,
            ext_listener: None,
        }
    }
}

impl Drop for Workbench {
    fn drop(&mut self) {
        for processor in &mut self.processors {
            processor.cancel_job();
        }
    }
}
