//! Script execution coordination for a SQL workbench.
//!
//! The [`exec::Workbench`] is the entry point: give it a sink factory for
//! result surfaces, an editor surface and preferences, connect a
//! [`exec::DbSession`], then submit [`exec::Statement`]s and drain events
//! with [`exec::Workbench::pump`] from the presentation thread.

pub mod exec;
pub mod utils;

pub use exec::Workbench;
pub use utils::config::ExecPreferences;
