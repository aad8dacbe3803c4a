//! Process-wide registry of statements currently executing.
//!
//! Intentionally global: multiple independent coordinators must contribute to
//! a single "anything running" signal (title-bar busy cue, close-confirmation
//! prompts). Constructed lazily on first use; torn down explicitly with
//! [`reset`] when the hosting editor closes.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::warn;

use super::statement::Statement;

static RUNNING: Lazy<Mutex<Vec<Statement>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn lock() -> std::sync::MutexGuard<'static, Vec<Statement>> {
    match RUNNING.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("running-statement registry lock was poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

pub fn add(statement: &Statement) {
    lock().push(statement.clone());
}

/// Remove one entry matching the statement. Tolerates missing entries so a
/// forced teardown racing a completion callback cannot panic.
pub fn remove(statement: &Statement) {
    let mut guard = lock();
    if let Some(pos) = guard.iter().position(|s| s == statement) {
        guard.remove(pos);
    }
}

pub fn total() -> usize {
    lock().len()
}

/// Racy snapshot for status displays; entries may finish while it is read.
pub fn snapshot() -> Vec<Statement> {
    lock().clone()
}

/// Explicit teardown at editor close.
pub fn reset() {
    lock().clear();
}
