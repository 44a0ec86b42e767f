use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Not a task: {0}")]
    NotATask(String),
    #[error("Not a recurring task: {0}")]
    NotRecurring(String),
    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Note not found: {0}")]
    NotFound(String),
    #[error("Store error: {0}")]
    Store(String),
}
