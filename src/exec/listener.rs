use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::events::ExecEvent;
use super::processor::{ProcessorId, ProcessorShared};
use super::running;
use super::statement::Statement;
use super::types::{StatementResult, Statistics};

/// External observer of script execution. All callbacks have empty defaults
/// so implementors pick what they care about.
pub trait QueryListener: Send {
    fn on_start_script(&mut self) {}
    fn on_start_query(&mut self, _statement: &Statement) {}
    fn on_end_query(&mut self, _result: &StatementResult, _statistics: &Statistics) {}
    fn on_end_script(&mut self, _statistics: &Statistics, _has_errors: bool) {}
}

/// Rate limiter for editor reveal during script runs. The first event after
/// a reset always passes.
pub(crate) struct UiThrottle {
    period: Duration,
    last: Option<Instant>,
}

impl UiThrottle {
    pub(crate) fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub(crate) fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(prev) if now.duration_since(prev) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
    }
}

/// Per-job execution listener. Lives on the worker thread; everything the
/// presentation layer must see goes out as events, never as direct calls.
pub(crate) struct ScriptExecutionListener {
    processor: ProcessorId,
    shared: Arc<ProcessorShared>,
    events: Sender<ExecEvent>,
    script_mode: bool,
    original_selection: Option<(usize, usize)>,
    throttle: UiThrottle,
    errors_seen: usize,
    close_on_error: bool,
    reset_cursor_on_execute: bool,
    maximize_editor_on_script: bool,
    ext: Option<Box<dyn QueryListener>>,
}

impl ScriptExecutionListener {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        processor: ProcessorId,
        shared: Arc<ProcessorShared>,
        events: Sender<ExecEvent>,
        script_mode: bool,
        original_selection: Option<(usize, usize)>,
        update_period: Duration,
        close_on_error: bool,
        reset_cursor_on_execute: bool,
        maximize_editor_on_script: bool,
    ) -> Self {
        Self {
            processor,
            shared,
            events,
            script_mode,
            original_selection,
            throttle: UiThrottle::new(update_period),
            errors_seen: 0,
            close_on_error,
            reset_cursor_on_execute,
            maximize_editor_on_script,
            ext: None,
        }
    }

    pub(crate) fn set_ext_listener(&mut self, ext: Box<dyn QueryListener>) {
        self.ext = Some(ext);
    }

    fn send(&self, event: ExecEvent) {
        // Receiver gone means the workbench was dropped mid-run; nothing
        // left to present to.
        if self.events.send(event).is_err() {
            debug!("event channel closed, dropping listener event");
        }
    }

    /// Runs the internal handler under a panic guard so the external
    /// listener is always forwarded to, then rethrows.
    fn guarded<F: FnOnce(&mut Self)>(&mut self, primary: F, forward: impl FnOnce(&mut Self)) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| primary(&mut *self)));
        forward(self);
        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }
    }

    /// Bookkeeping for a lazy single-statement pull. The run never enters
    /// the script states, so the external listener only sees the query
    /// callbacks; here we just rewind the throttle and the error markers.
    pub(crate) fn on_begin_pull(&mut self) {
        self.throttle.reset();
        self.errors_seen = 0;
        self.send(ExecEvent::ClearErrorMarkers);
    }

    pub(crate) fn on_start_script(&mut self) {
        self.guarded(
            |l| l.handle_start_script(),
            |l| {
                if let Some(ext) = l.ext.as_mut() {
                    ext.on_start_script();
                }
            },
        );
    }

    pub(crate) fn on_start_query(&mut self, statement: &Statement) {
        self.guarded(
            |l| l.handle_start_query(statement),
            |l| {
                if let Some(ext) = l.ext.as_mut() {
                    ext.on_start_query(statement);
                }
            },
        );
    }

    pub(crate) fn on_end_query(&mut self, result: &StatementResult, statistics: &Statistics) {
        self.guarded(
            |l| l.handle_end_query(result),
            |l| {
                if let Some(ext) = l.ext.as_mut() {
                    ext.on_end_query(result, statistics);
                }
            },
        );
        self.send(ExecEvent::StatementFinished {
            processor: self.processor,
            result: result.clone(),
            statistics: statistics.clone(),
            close_on_error: self.close_on_error,
        });
    }

    pub(crate) fn on_end_script(&mut self, statistics: &Statistics, has_errors: bool) {
        self.guarded(
            |l| l.handle_end_script(has_errors),
            |l| {
                if let Some(ext) = l.ext.as_mut() {
                    ext.on_end_script(statistics, has_errors);
                }
            },
        );
        self.send(ExecEvent::ScriptFinished {
            processor: self.processor,
            statistics: statistics.clone(),
            has_errors,
        });
    }

    fn handle_start_script(&mut self) {
        self.throttle.reset();
        self.errors_seen = 0;
        self.send(ExecEvent::ScriptStarted {
            processor: self.processor,
            maximize_editor: self.script_mode && self.maximize_editor_on_script,
        });
        self.send(ExecEvent::ClearErrorMarkers);
    }

    fn handle_start_query(&mut self, statement: &Statement) {
        let was_idle = running::total() == 0;
        self.shared.running.fetch_add(1, Ordering::SeqCst);
        running::add(statement);
        if was_idle {
            self.send(ExecEvent::BusyCue { executing: true });
        }
        // Following the cursor through a long script is throttled so a
        // burst of short statements does not thrash the editor.
        if self.script_mode && self.throttle.ready() {
            self.send(ExecEvent::RevealStatement {
                offset: statement.offset(),
                length: statement.length(),
            });
        }
    }

    fn handle_end_query(&mut self, result: &StatementResult) {
        running::remove(&result.statement);
        // The counter may already be zero after a forced reset; never wrap.
        let _ = self
            .shared
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if running::total() == 0 {
            self.send(ExecEvent::BusyCue { executing: false });
        }

        if let Some(error) = &result.error {
            self.errors_seen += 1;
            let statement = &result.statement;
            self.send(ExecEvent::ErrorMarker {
                offset: statement.offset(),
                length: statement.length(),
                message: error.to_string(),
            });
            if self.script_mode {
                if self.errors_seen == 1 {
                    // First failure wins the cursor; later ones only mark.
                    self.send(ExecEvent::SetSelection {
                        offset: statement.offset(),
                        length: statement.length(),
                    });
                }
            } else if let Some((offset, length)) = self.original_selection {
                self.send(ExecEvent::SetSelection { offset, length });
            }
        } else if !self.script_mode && self.reset_cursor_on_execute {
            if let Some((offset, length)) = self.original_selection {
                self.send(ExecEvent::SetSelection { offset, length });
            }
        }
    }

    fn handle_end_script(&mut self, has_errors: bool) {
        if !has_errors && self.script_mode {
            if let Some((offset, length)) = self.original_selection {
                self.send(ExecEvent::SetSelection { offset, length });
            }
        }
    }
}

#[cfg(test)]
mod throttle_tests {
    use super::UiThrottle;
    use std::time::Duration;

    #[test]
    fn test_first_event_always_passes() {
        let mut throttle = UiThrottle::new(Duration::from_millis(100));
        assert!(throttle.ready());
    }

    #[test]
    fn test_events_within_period_are_suppressed() {
        let mut throttle = UiThrottle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn test_reset_reopens_the_gate() {
        let mut throttle = UiThrottle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        throttle.reset();
        assert!(throttle.ready());
    }

    #[test]
    fn test_zero_period_never_suppresses() {
        let mut throttle = UiThrottle::new(Duration::ZERO);
        assert!(throttle.ready());
        assert!(throttle.ready());
    }
}
