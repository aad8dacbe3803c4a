pub mod container;
pub mod events;
pub mod job;
pub mod listener;
pub mod processor;
pub mod running;
pub mod sink;
pub mod statement;
pub mod types;
pub mod workbench;

pub use container::{ContainerList, ResultsContainer};
pub use events::ExecEvent;
pub use job::{DataReceiver, DbSession, ErrorHandling, JobState};
pub use listener::QueryListener;
pub use processor::{ProcessorId, QueryProcessor};
pub use sink::{EditorSurface, ResultSink, SinkFactory};
pub use statement::{classify, Statement, StatementKind};
pub use types::*;
pub use workbench::{results_tab_name, RunOptions, Workbench};
