use std::sync::Mutex;

/// User-visible, fire-and-forget messages.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Sink used when the host does not provide one; messages go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, message: &str) {
        tracing::info!(target: "mono_task_note::notice", "{message}");
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    messages: Mutex<Vec<String>>,
}

impl InMemoryNotificationSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, message: &str) {
        if let Ok(mut guard) = self.messages.lock() {
            guard.push(message.to_string());
        }
    }
}
