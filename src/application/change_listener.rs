use crate::application::task_state::TaskStateController;
use crate::infrastructure::notification::NotificationSink;
use crate::infrastructure::record_store::RecordStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskChangeEvent {
    pub task_id: String,
}

impl TaskChangeEvent {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

pub fn change_channel() -> (mpsc::Sender<TaskChangeEvent>, mpsc::Receiver<TaskChangeEvent>) {
    mpsc::channel(CHANGE_CHANNEL_CAPACITY)
}

/// Handles change events one at a time until every sender is dropped.
/// Returns the number of events that reached the controller.
pub async fn run_change_listener<S>(
    controller: Arc<TaskStateController<S>>,
    notifier: Arc<dyn NotificationSink>,
    mut events: mpsc::Receiver<TaskChangeEvent>,
) -> usize
where
    S: RecordStore + 'static,
{
    let mut handled = 0;
    while let Some(event) = events.recv().await {
        if !event.task_id.ends_with(".md") {
            continue;
        }
        handled += 1;
        if let Err(error) = controller.on_external_change(&event.task_id).await {
            tracing::error!(task_id = %event.task_id, %error, "failed to reconcile task after change");
            notifier.notify(&format!("Failed to update done_at: {error}"));
        }
    }
    handled
}

pub fn spawn_change_listener<S>(
    controller: Arc<TaskStateController<S>>,
    notifier: Arc<dyn NotificationSink>,
    events: mpsc::Receiver<TaskChangeEvent>,
) -> JoinHandle<usize>
where
    S: RecordStore + 'static,
{
    tokio::spawn(run_change_listener(controller, notifier, events))
}
