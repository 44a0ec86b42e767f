use crate::domain::models::{
    AttributeMap, NextRecurrence, TaskFrontmatter, TaskPatch, is_task_record,
};
use crate::domain::recurrence::calculate_next_recurrence;
use crate::domain::template::format_with_pattern;
use crate::infrastructure::config::{DEFAULT_DONE_AT_FORMAT, Settings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification::NotificationSink;
use crate::infrastructure::record_store::RecordStore;
use chrono::{DateTime, FixedOffset, Local};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;
pub type SharedSettings = Arc<RwLock<Settings>>;

pub fn local_now() -> DateTime<FixedOffset> {
    DateTime::<FixedOffset>::from(Local::now())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    /// The note is not a task; nothing was written.
    Ignored,
    /// The record was already consistent; nothing was written.
    Unchanged,
    Completed,
    Reopened,
    TimestampStamped,
    TimestampCleared,
    Rescheduled(NextRecurrence),
    /// Recurring task whose next occurrence could not be resolved; it was
    /// marked done instead.
    CompletedWithoutRecurrence,
}

/// Applies completion state changes to task notes.
pub struct TaskStateController<S>
where
    S: RecordStore,
{
    store: Arc<S>,
    notifier: Arc<dyn NotificationSink>,
    settings: SharedSettings,
    now_provider: NowProvider,
}

impl<S> TaskStateController<S>
where
    S: RecordStore,
{
    pub fn new(store: Arc<S>, notifier: Arc<dyn NotificationSink>, settings: SharedSettings) -> Self {
        Self {
            store,
            notifier,
            settings,
            now_provider: Arc::new(local_now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn complete_task(&self, task_id: &str) -> Result<TaskTransition, InfraError> {
        let Some(task) = self.load_task(task_id).await? else {
            return Ok(TaskTransition::Ignored);
        };
        self.complete_loaded(task_id, &task).await
    }

    pub async fn uncomplete_task(&self, task_id: &str) -> Result<TaskTransition, InfraError> {
        if self.load_task(task_id).await?.is_none() {
            return Ok(TaskTransition::Ignored);
        }
        self.write(task_id, TaskPatch::reopen()).await?;
        info!(task_id, "task reopened");
        Ok(TaskTransition::Reopened)
    }

    pub async fn toggle_task(&self, task_id: &str) -> Result<TaskTransition, InfraError> {
        let Some(task) = self.load_task(task_id).await? else {
            return Ok(TaskTransition::Ignored);
        };
        if task.is_done() {
            self.write(task_id, TaskPatch::reopen()).await?;
            info!(task_id, "task reopened");
            Ok(TaskTransition::Reopened)
        } else {
            self.complete_loaded(task_id, &task).await
        }
    }

    /// Repairs the `done` / `done_at` pair after the record was edited
    /// outside the controller.
    pub async fn on_external_change(&self, task_id: &str) -> Result<TaskTransition, InfraError> {
        let Some(task) = self.load_task(task_id).await? else {
            return Ok(TaskTransition::Ignored);
        };

        if task.is_done() && !task.has_done_at() {
            if task.is_recurring() {
                return self.complete_recurring(task_id, &task).await;
            }
            self.write(task_id, TaskPatch::stamp_done_at(self.timestamp()))
                .await?;
            debug!(task_id, "stamped done_at after external change");
            return Ok(TaskTransition::TimestampStamped);
        }

        if !task.is_done() && task.done_at.is_some() {
            self.write(task_id, TaskPatch::clear_done_at()).await?;
            debug!(task_id, "cleared done_at after external change");
            return Ok(TaskTransition::TimestampCleared);
        }

        Ok(TaskTransition::Unchanged)
    }

    async fn complete_loaded(
        &self,
        task_id: &str,
        task: &TaskFrontmatter,
    ) -> Result<TaskTransition, InfraError> {
        if task.is_recurring() {
            return self.complete_recurring(task_id, task).await;
        }
        self.write(task_id, TaskPatch::complete(self.timestamp()))
            .await?;
        info!(task_id, "task completed");
        Ok(TaskTransition::Completed)
    }

    async fn complete_recurring(
        &self,
        task_id: &str,
        task: &TaskFrontmatter,
    ) -> Result<TaskTransition, InfraError> {
        let now = (self.now_provider)();
        let next = calculate_next_recurrence(
            &task.recurrence_rule(),
            task.current_due_date(),
            task.scheduled_time.as_deref(),
            now.date_naive(),
        );

        if next.is_unresolved() {
            warn!(task_id, "no next occurrence found for recurring task");
            self.notifier.notify(&format!(
                "Could not determine the next occurrence of {task_id}; marked as done instead"
            ));
            self.write(task_id, TaskPatch::complete(self.format_timestamp(now)))
                .await?;
            return Ok(TaskTransition::CompletedWithoutRecurrence);
        }

        self.write(task_id, TaskPatch::reschedule(&next)).await?;
        let due_date = next.due_date_string().unwrap_or_default();
        let scheduled_time = next.scheduled_time_string().unwrap_or_default();
        info!(task_id, %due_date, %scheduled_time, "recurring task rescheduled");
        Ok(TaskTransition::Rescheduled(next))
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<TaskFrontmatter>, InfraError> {
        let Some(attributes) = self.store.get_attributes(task_id).await? else {
            debug!(task_id, "note has no frontmatter");
            return Ok(None);
        };
        if !is_task_record(&attributes) {
            debug!(task_id, "note is not a task");
            return Ok(None);
        }
        Ok(Some(TaskFrontmatter::from_attributes(&attributes)?))
    }

    async fn write(&self, task_id: &str, patch: TaskPatch) -> Result<(), InfraError> {
        self.store
            .mutate_attributes(
                task_id,
                Box::new(move |attributes: &mut AttributeMap| patch.apply(attributes)),
            )
            .await
    }

    fn timestamp(&self) -> String {
        self.format_timestamp((self.now_provider)())
    }

    fn format_timestamp(&self, now: DateTime<FixedOffset>) -> String {
        let format = self
            .settings
            .read()
            .map(|settings| settings.effective_done_at_format().to_string())
            .unwrap_or_else(|_| DEFAULT_DONE_AT_FORMAT.to_string());
        format_with_pattern(now, &format)
            .unwrap_or_else(|| now.format(DEFAULT_DONE_AT_FORMAT).to_string())
    }
}
