use crate::application::bootstrap::bootstrap_workspace;
use crate::application::change_listener::{TaskChangeEvent, change_channel, spawn_change_listener};
use crate::application::recurrence_rules::RecurrenceRuleEditor;
use crate::application::task_note::TaskNoteCreator;
use crate::application::task_state::{
    NowProvider, SharedSettings, TaskStateController, TaskTransition, local_now,
};
use crate::domain::models::RecurrenceRule;
use crate::infrastructure::config::{Settings, load_settings, save_settings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification::NotificationSink;
use crate::infrastructure::record_store::SqliteNoteStore;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    settings: SharedSettings,
    store: Arc<SqliteNoteStore>,
    notifier: Arc<dyn NotificationSink>,
    controller: Arc<TaskStateController<SqliteNoteStore>>,
    rule_editor: RecurrenceRuleEditor<SqliteNoteStore>,
    note_creator: TaskNoteCreator<SqliteNoteStore>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf, notifier: Arc<dyn NotificationSink>) -> Result<Self, InfraError> {
        Self::with_clock(workspace_root, notifier, Arc::new(local_now))
    }

    pub fn with_clock(
        workspace_root: PathBuf,
        notifier: Arc<dyn NotificationSink>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings: SharedSettings = Arc::new(RwLock::new(load_settings(&bootstrap.config_dir)?));
        let store = Arc::new(SqliteNoteStore::new(&bootstrap.database_path));

        let controller = Arc::new(
            TaskStateController::new(Arc::clone(&store), Arc::clone(&notifier), Arc::clone(&settings))
                .with_now_provider(Arc::clone(&now_provider)),
        );
        let rule_editor = RecurrenceRuleEditor::new(Arc::clone(&store));
        let note_creator =
            TaskNoteCreator::new(Arc::clone(&store), Arc::clone(&notifier), Arc::clone(&settings))
                .with_now_provider(now_provider);

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            settings,
            store,
            notifier,
            controller,
            rule_editor,
            note_creator,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn store(&self) -> &Arc<SqliteNoteStore> {
        &self.store
    }

    pub fn controller(&self) -> Arc<TaskStateController<SqliteNoteStore>> {
        Arc::clone(&self.controller)
    }

    pub fn settings(&self) -> Result<Settings, InfraError> {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .map_err(|error| InfraError::Store(format!("settings lock poisoned: {error}")))
    }

    /// Starts the change listener; send an event whenever a note's
    /// frontmatter changes.
    pub fn start_change_listener(&self) -> (mpsc::Sender<TaskChangeEvent>, JoinHandle<usize>) {
        let (sender, receiver) = change_channel();
        let handle = spawn_change_listener(self.controller(), Arc::clone(&self.notifier), receiver);
        (sender, handle)
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskCommand {
    Complete,
    Uncomplete,
    Toggle,
}

impl TaskCommand {
    fn name(self) -> &'static str {
        match self {
            Self::Complete => "complete_current_task",
            Self::Uncomplete => "uncomplete_current_task",
            Self::Toggle => "toggle_task_completion",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Uncomplete => "uncomplete",
            Self::Toggle => "toggle",
        }
    }
}

/// Task commands only apply to an open markdown note.
pub fn is_command_available(active_note: Option<&str>) -> bool {
    active_note.is_some_and(|path| path.ends_with(".md"))
}

pub async fn create_task_note_impl(state: &AppState) -> Result<String, InfraError> {
    match state.note_creator.create_task_note().await {
        Ok(path) => {
            state.log_info("create_task_note", &path);
            Ok(path)
        }
        Err(error) => {
            state.command_error("create_task_note", &error);
            Err(error)
        }
    }
}

pub async fn complete_current_task_impl(state: &AppState, active_note: Option<&str>) -> bool {
    run_task_command(state, active_note, TaskCommand::Complete).await
}

pub async fn uncomplete_current_task_impl(state: &AppState, active_note: Option<&str>) -> bool {
    run_task_command(state, active_note, TaskCommand::Uncomplete).await
}

pub async fn toggle_current_task_impl(state: &AppState, active_note: Option<&str>) -> bool {
    run_task_command(state, active_note, TaskCommand::Toggle).await
}

/// Returns whether the command applied; failures become notices.
async fn run_task_command(state: &AppState, active_note: Option<&str>, command: TaskCommand) -> bool {
    let Some(task_id) = active_note.filter(|_| is_command_available(active_note)) else {
        return false;
    };

    let result = match command {
        TaskCommand::Complete => state.controller.complete_task(task_id).await,
        TaskCommand::Uncomplete => state.controller.uncomplete_task(task_id).await,
        TaskCommand::Toggle => state.controller.toggle_task(task_id).await,
    };

    match result {
        Ok(TaskTransition::Ignored) => {
            state.log_info(command.name(), &format!("{task_id} is not a task"));
        }
        Ok(transition) => {
            state.log_info(command.name(), &format!("{task_id}: {transition:?}"));
        }
        Err(error) => {
            let message = state.command_error(command.name(), &error);
            state
                .notifier
                .notify(&format!("Failed to {} task: {message}", command.verb()));
        }
    }
    true
}

pub async fn set_recurring_days_of_month_impl(
    state: &AppState,
    active_note: &str,
    days: Vec<u32>,
) -> Result<RecurrenceRule, InfraError> {
    let result = state.rule_editor.set_days_of_month(active_note, &days).await;
    report_rule_result(state, "set_recurring_days_of_month", result)
}

pub async fn set_recurring_days_of_week_impl(
    state: &AppState,
    active_note: &str,
    days: Vec<String>,
) -> Result<RecurrenceRule, InfraError> {
    let result = state.rule_editor.set_days_of_week(active_note, &days).await;
    report_rule_result(state, "set_recurring_days_of_week", result)
}

pub async fn set_recurring_scheduled_times_impl(
    state: &AppState,
    active_note: &str,
    times: Vec<String>,
) -> Result<RecurrenceRule, InfraError> {
    let result = state
        .rule_editor
        .set_scheduled_times(active_note, &times)
        .await;
    report_rule_result(state, "set_recurring_scheduled_times", result)
}

pub async fn current_recurrence_rule_impl(
    state: &AppState,
    active_note: &str,
) -> Result<RecurrenceRule, InfraError> {
    state.rule_editor.current_rule(active_note).await
}

fn report_rule_result(
    state: &AppState,
    command: &str,
    result: Result<RecurrenceRule, InfraError>,
) -> Result<RecurrenceRule, InfraError> {
    match &result {
        Ok(rule) => state.log_info(command, &format!("{rule:?}")),
        Err(error) => {
            let message = state.command_error(command, error);
            let notice = match error {
                InfraError::NotATask(_) => "This note is not a task".to_string(),
                InfraError::NotRecurring(_) => {
                    "This task is not recurring; add the \"recurring\" attribute first".to_string()
                }
                _ => format!("Failed to update recurrence: {message}"),
            };
            state.notifier.notify(&notice);
        }
    }
    result
}

pub fn update_settings_impl(state: &AppState, settings: Settings) -> Result<(), InfraError> {
    if let Err(error) = save_settings(&state.config_dir, &settings) {
        state.command_error("update_settings", &error);
        return Err(error);
    }
    let mut guard = state
        .settings
        .write()
        .map_err(|error| InfraError::Store(format!("settings lock poisoned: {error}")))?;
    *guard = settings;
    state.log_info("update_settings", "settings saved");
    Ok(())
}
