//! Task notes for a markdown vault: completion, recurrence and the
//! `done_at` bookkeeping that keeps frontmatter consistent.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{BootstrapResult, bootstrap_workspace};
pub use application::change_listener::{TaskChangeEvent, change_channel, spawn_change_listener};
pub use application::commands::{
    AppState, complete_current_task_impl, create_task_note_impl, current_recurrence_rule_impl,
    is_command_available, set_recurring_days_of_month_impl, set_recurring_days_of_week_impl,
    set_recurring_scheduled_times_impl, toggle_current_task_impl, uncomplete_current_task_impl,
    update_settings_impl,
};
pub use application::task_state::{TaskStateController, TaskTransition};
pub use domain::models::{NextRecurrence, RecurrenceRule, TaskFrontmatter};
pub use domain::recurrence::{calculate_next_recurrence, find_next_recurring_date};
pub use infrastructure::config::Settings;
pub use infrastructure::error::InfraError;
pub use infrastructure::notification::{NotificationSink, TracingNotificationSink};
pub use infrastructure::record_store::{NoteVault, RecordStore, SqliteNoteStore};

use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub config_dir: String,
    pub database_path: String,
}

/// Prepares a workspace, defaulting to the current directory.
pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        config_dir: result.config_dir.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}
