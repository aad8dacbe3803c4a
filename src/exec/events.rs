use super::processor::ProcessorId;
use super::statement::Statement;
use super::types::{ColumnInfo, StatementResult, Statistics};

/// Progress message emitted by a job (or its listener) toward the
/// presentation thread. All registry and container mutation happens while
/// these are drained by `Workbench::pump`; the worker side never touches a
/// container directly.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    ScriptStarted {
        processor: ProcessorId,
        maximize_editor: bool,
    },
    BusyCue {
        executing: bool,
    },
    RevealStatement {
        offset: usize,
        length: usize,
    },
    ClearErrorMarkers,
    /// A result set is about to stream. May name an index beyond the
    /// registry's current size; the pump materializes missing containers.
    ResultSetStart {
        processor: ProcessorId,
        result_set_index: usize,
        statement: Statement,
        columns: Vec<ColumnInfo>,
    },
    Rows {
        processor: ProcessorId,
        result_set_index: usize,
        rows: Vec<Vec<String>>,
    },
    ResultSetEnd {
        processor: ProcessorId,
        result_set_index: usize,
        row_count: usize,
    },
    SetSelection {
        offset: usize,
        length: usize,
    },
    ErrorMarker {
        offset: usize,
        length: usize,
        message: String,
    },
    StatementFinished {
        processor: ProcessorId,
        result: StatementResult,
        statistics: Statistics,
        close_on_error: bool,
    },
    ScriptFinished {
        processor: ProcessorId,
        statistics: Statistics,
        has_errors: bool,
    },
}
