use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::exec::ErrorHandling;

/// Execution preferences, persisted as JSON in the user's config directory.
/// Unknown or missing fields fall back to defaults so old files keep loading.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecPreferences {
    /// In script mode, give every statement its own results tab.
    pub script_tab_per_statement: bool,
    /// Restore the editor selection after a single-statement run.
    pub reset_cursor_on_execute: bool,
    /// Close the results tab of a statement that failed without ever
    /// producing data.
    pub close_tab_on_error: bool,
    pub maximize_editor_on_script: bool,
    /// Reuse an idle results tab for a new single statement instead of
    /// stacking a new one.
    pub replace_single_tab: bool,
    pub error_handling: ErrorHandling,
    /// Minimum interval between editor reveal updates during a script run.
    pub ui_update_period_ms: u64,
    /// Row cap per result set; 0 disables the cap.
    pub max_rows: usize,
}

impl ExecPreferences {
    pub fn new() -> Self {
        Self {
            script_tab_per_statement: false,
            reset_cursor_on_execute: true,
            close_tab_on_error: false,
            maximize_editor_on_script: false,
            replace_single_tab: true,
            error_handling: ErrorHandling::Continue,
            ui_update_period_ms: 100,
            max_rows: 1000,
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("querydeck");
            path.push("config.json");
            path
        })
    }

    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    match serde_json::from_str(&content) {
                        Ok(prefs) => return prefs,
                        Err(err) => warn!(%err, "preferences file unreadable, using defaults"),
                    }
                }
            }
        }
        Self::new()
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    warn!(%err, "preference persistence failed");
                    return Err(Box::new(err));
                }
            }
            let content = match serde_json::to_string_pretty(self) {
                Ok(content) => content,
                Err(err) => {
                    warn!(%err, "preference persistence failed");
                    return Err(Box::new(err));
                }
            };
            if let Err(err) = fs::write(path, content) {
                warn!(%err, "preference persistence failed");
                return Err(Box::new(err));
            }
        }
        Ok(())
    }
}

impl Default for ExecPreferences {
    fn default() -> Self {
        Self::new()
    }
}
