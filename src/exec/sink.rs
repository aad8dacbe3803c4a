use super::types::{ColumnInfo, ExecResult, Statistics};

/// Presentation surface for one result set: the grid widget, an export
/// writer, a recording fake in tests. The core never renders anything
/// itself; every visible effect of a run goes through one of these.
pub trait ResultSink {
    fn start_result_set(&mut self, columns: &[ColumnInfo]);
    fn append_rows(&mut self, rows: Vec<Vec<String>>);
    fn finish_result_set(&mut self, row_count: usize);

    /// Update the tab caption; `tooltip` usually carries the (truncated)
    /// statement text.
    fn update_name(&mut self, name: &str, tooltip: Option<&str>);
    fn set_status(&mut self, message: &str, is_error: bool);
    fn set_statistics(&mut self, statistics: &Statistics);

    /// True when the surface holds unsaved user edits.
    fn is_dirty(&self) -> bool;
    fn has_data(&self) -> bool;

    /// Stop any background fetch the surface started on its own.
    fn cancel_pending(&mut self);

    /// The surface is going away. Called exactly once, before the owning
    /// container is dropped.
    fn close(&mut self);
}

/// Creates presentation surfaces on demand, on the presentation thread only.
/// Creation is all-or-nothing: on error no container is registered.
pub trait SinkFactory {
    fn create_sink(&mut self, tab_index: usize) -> ExecResult<Box<dyn ResultSink>>;
}

/// The script editor surface the run was started from. Selection and marker
/// handling live there; the core only issues requests.
pub trait EditorSurface {
    /// Current text selection as (offset, length), if any.
    fn selection(&self) -> Option<(usize, usize)>;

    /// Scroll the given span into view without moving the caret.
    fn reveal_span(&mut self, offset: usize, length: usize);
    fn set_selection(&mut self, offset: usize, length: usize);

    fn clear_error_markers(&mut self);
    fn add_error_marker(&mut self, offset: usize, length: usize, message: &str);

    /// "Something is executing" indicator shared by all coordinators.
    fn set_busy_cue(&mut self, executing: bool);
    fn set_editor_maximized(&mut self, maximized: bool);
}
