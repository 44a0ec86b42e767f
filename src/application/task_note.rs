use crate::application::task_state::{NowProvider, SharedSettings, local_now};
use crate::domain::models::{
    AttributeMap, FieldUpdate, KEY_DONE, KEY_DUE_DATE, KEY_PRIORITY, KEY_SCHEDULED_TIME,
    KEY_TYPE, TASK_TYPE,
};
use crate::domain::template::{TemplateProcessor, parse_frontmatter, split_frontmatter};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification::NotificationSink;
use crate::infrastructure::record_store::{NoteVault, RecordStore};
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_PRIORITY: i64 = 4;

/// Creates new task notes named after the current unix time.
pub struct TaskNoteCreator<S>
where
    S: NoteVault + RecordStore,
{
    store: Arc<S>,
    notifier: Arc<dyn NotificationSink>,
    settings: SharedSettings,
    template_processor: TemplateProcessor,
    now_provider: NowProvider,
}

impl<S> TaskNoteCreator<S>
where
    S: NoteVault + RecordStore,
{
    pub fn new(store: Arc<S>, notifier: Arc<dyn NotificationSink>, settings: SharedSettings) -> Self {
        Self {
            store,
            notifier,
            settings,
            template_processor: TemplateProcessor,
            now_provider: Arc::new(local_now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Creates the note and returns its path. Failures are also reported
    /// through the notification sink.
    pub async fn create_task_note(&self) -> Result<String, InfraError> {
        match self.try_create().await {
            Ok(path) => {
                let basename = path.rsplit('/').next().unwrap_or(&path);
                let basename = basename.strip_suffix(".md").unwrap_or(basename);
                self.notifier
                    .notify(&format!("Task note created: {basename}"));
                tracing::info!(path = %path, "task note created");
                Ok(path)
            }
            Err(error) => {
                self.notifier
                    .notify(&format!("Failed to create task note: {error}"));
                Err(error)
            }
        }
    }

    async fn try_create(&self) -> Result<String, InfraError> {
        let now = (self.now_provider)();
        let file_name = format!("{}.md", now.timestamp());
        let (directory, template_path) = {
            let settings = self
                .settings
                .read()
                .map_err(|error| InfraError::Store(format!("settings lock poisoned: {error}")))?;
            (
                settings.task_note_directory().map(ToOwned::to_owned),
                settings.template_path().map(ToOwned::to_owned),
            )
        };

        let path = match directory.as_deref() {
            Some(directory) => {
                self.ensure_folder(directory).await?;
                format!("{directory}/{file_name}")
            }
            None => file_name.clone(),
        };

        let template = match template_path.as_deref() {
            Some(template_path) => self.store.read_note(template_path).await?,
            None => None,
        };
        if template_path.is_some() && template.is_none() {
            tracing::warn!(?template_path, "template note not found, creating empty task note");
        }
        let content = template
            .map(|content| self.template_processor.process(&content, &file_name, now))
            .unwrap_or_default();
        let (template_attributes, body) = split_template(&content);

        self.store.create_note(&path, &body).await?;
        self.store
            .mutate_attributes(
                &path,
                Box::new(move |attributes: &mut AttributeMap| {
                    for (key, value) in template_attributes {
                        attributes.entry(key).or_insert(value);
                    }
                    initialize_task_attributes(attributes);
                }),
            )
            .await?;
        Ok(path)
    }

    async fn ensure_folder(&self, directory: &str) -> Result<(), InfraError> {
        if self.store.folder_exists(directory).await? {
            return Ok(());
        }
        match self.store.create_folder(directory).await {
            Ok(()) | Err(InfraError::AlreadyExists(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

/// Template frontmatter becomes the note's attributes; the rest is the body.
/// Frontmatter that is not a YAML mapping stays in the body as text.
fn split_template(content: &str) -> (AttributeMap, String) {
    let Some((yaml, body)) = split_frontmatter(content) else {
        return (AttributeMap::new(), content.to_string());
    };
    match parse_frontmatter(yaml) {
        Ok(attributes) => (attributes, body.to_string()),
        Err(error) => {
            tracing::warn!(%error, "template frontmatter is not a YAML mapping");
            (AttributeMap::new(), content.to_string())
        }
    }
}

/// Fills the task keys a new note needs without overriding template values.
pub fn initialize_task_attributes(attributes: &mut AttributeMap) {
    FieldUpdate::SetIfAbsent(Value::Bool(false)).apply_to(attributes, KEY_DONE);
    if !attributes.contains_key(KEY_DUE_DATE) {
        attributes.insert(KEY_DUE_DATE.to_string(), Value::Null);
    }
    FieldUpdate::SetIfAbsent(Value::from(DEFAULT_PRIORITY)).apply_to(attributes, KEY_PRIORITY);
    if !attributes.contains_key(KEY_SCHEDULED_TIME) {
        attributes.insert(KEY_SCHEDULED_TIME.to_string(), Value::Null);
    }
    FieldUpdate::SetIfAbsent(Value::from(TASK_TYPE)).apply_to(attributes, KEY_TYPE);
}
