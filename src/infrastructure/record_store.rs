use crate::domain::models::AttributeMap;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::apply_schema;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub type AttributeMutator = Box<dyn FnOnce(&mut AttributeMap) + Send + 'static>;

/// Frontmatter access for notes, keyed by note path.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns `None` when the note is missing or carries no attributes.
    async fn get_attributes(&self, note_path: &str) -> Result<Option<AttributeMap>, InfraError>;

    /// Applies `mutator` to the stored attributes and persists the result as
    /// one atomic step.
    async fn mutate_attributes(
        &self,
        note_path: &str,
        mutator: AttributeMutator,
    ) -> Result<(), InfraError>;
}

/// Note bodies and folders.
#[async_trait]
pub trait NoteVault: Send + Sync {
    async fn folder_exists(&self, path: &str) -> Result<bool, InfraError>;
    async fn create_folder(&self, path: &str) -> Result<(), InfraError>;
    async fn read_note(&self, path: &str) -> Result<Option<String>, InfraError>;
    async fn create_note(&self, path: &str, body: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteNoteStore {
    db_path: PathBuf,
}

impl SqliteNoteStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        let connection = Connection::open(&self.db_path)?;
        apply_schema(&connection)?;
        Ok(connection)
    }

    /// Runs `operation` on a fresh connection on tokio's blocking pool.
    async fn blocking<T, F>(&self, operation: F) -> Result<T, InfraError>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> Result<T, InfraError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || operation(store.connect()?))
            .await
            .map_err(|error| InfraError::Store(format!("database task failed: {error}")))?
    }

    /// Inserts or replaces a note, e.g. when the host imports existing files.
    pub fn upsert_note(
        &self,
        path: &str,
        body: &str,
        attributes: &AttributeMap,
    ) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO notes (path, body, attributes, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
               body = excluded.body,
               attributes = excluded.attributes,
               updated_at = excluded.updated_at",
            params![
                path,
                body,
                serde_json::to_string(attributes)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

fn parse_attributes(raw: &str) -> Result<AttributeMap, InfraError> {
    Ok(serde_json::from_str::<AttributeMap>(raw)?)
}

#[async_trait]
impl RecordStore for SqliteNoteStore {
    async fn get_attributes(&self, note_path: &str) -> Result<Option<AttributeMap>, InfraError> {
        let note_path = note_path.to_string();
        self.blocking(move |connection| {
            let raw: Option<String> = connection
                .query_row(
                    "SELECT attributes FROM notes WHERE path = ?1",
                    params![note_path],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(raw) = raw else {
                return Ok(None);
            };
            let attributes = parse_attributes(&raw)?;
            Ok((!attributes.is_empty()).then_some(attributes))
        })
        .await
    }

    async fn mutate_attributes(
        &self,
        note_path: &str,
        mutator: AttributeMutator,
    ) -> Result<(), InfraError> {
        let note_path = note_path.to_string();
        self.blocking(move |mut connection| {
            let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let raw: Option<String> = transaction
                .query_row(
                    "SELECT attributes FROM notes WHERE path = ?1",
                    params![note_path],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(raw) = raw else {
                return Err(InfraError::NotFound(note_path));
            };

            let mut attributes = parse_attributes(&raw)?;
            mutator(&mut attributes);

            transaction.execute(
                "UPDATE notes SET attributes = ?1, updated_at = ?2 WHERE path = ?3",
                params![
                    serde_json::to_string(&attributes)?,
                    Utc::now().to_rfc3339(),
                    note_path
                ],
            )?;
            transaction.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl NoteVault for SqliteNoteStore {
    async fn folder_exists(&self, path: &str) -> Result<bool, InfraError> {
        let path = path.to_string();
        self.blocking(move |connection| {
            let found: Option<i64> = connection
                .query_row(
                    "SELECT 1 FROM folders WHERE path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn create_folder(&self, path: &str) -> Result<(), InfraError> {
        let path = path.to_string();
        self.blocking(move |connection| {
            let inserted = connection.execute(
                "INSERT OR IGNORE INTO folders (path) VALUES (?1)",
                params![path],
            )?;
            if inserted == 0 {
                return Err(InfraError::AlreadyExists(format!("folder {path}")));
            }
            Ok(())
        })
        .await
    }

    async fn read_note(&self, path: &str) -> Result<Option<String>, InfraError> {
        let path = path.to_string();
        self.blocking(move |connection| {
            Ok(connection
                .query_row(
                    "SELECT body FROM notes WHERE path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn create_note(&self, path: &str, body: &str) -> Result<(), InfraError> {
        let path = path.to_string();
        let body = body.to_string();
        self.blocking(move |connection| {
            let inserted = connection.execute(
                "INSERT OR IGNORE INTO notes (path, body, attributes, updated_at)
                 VALUES (?1, ?2, '{}', ?3)",
                params![path, body, Utc::now().to_rfc3339()],
            )?;
            if inserted == 0 {
                return Err(InfraError::AlreadyExists(format!("note {path}")));
            }
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Clone, Default)]
struct StoredNote {
    body: String,
    attributes: AttributeMap,
}

#[derive(Debug, Default)]
struct InMemoryState {
    notes: HashMap<String, StoredNote>,
    folders: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryNoteStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryNoteStore {
    fn lock(&self) -> Result<MutexGuard<'_, InMemoryState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::Store(format!("note store lock poisoned: {error}")))
    }

    pub fn insert_note(&self, path: &str, attributes: AttributeMap) -> Result<(), InfraError> {
        self.lock()?.notes.insert(
            path.to_string(),
            StoredNote {
                body: String::new(),
                attributes,
            },
        );
        Ok(())
    }

    /// Raw attributes of a note, including an empty map.
    pub fn attributes(&self, path: &str) -> Result<Option<AttributeMap>, InfraError> {
        Ok(self
            .lock()?
            .notes
            .get(path)
            .map(|note| note.attributes.clone()))
    }
}

#[async_trait]
impl RecordStore for InMemoryNoteStore {
    async fn get_attributes(&self, note_path: &str) -> Result<Option<AttributeMap>, InfraError> {
        Ok(self
            .lock()?
            .notes
            .get(note_path)
            .filter(|note| !note.attributes.is_empty())
            .map(|note| note.attributes.clone()))
    }

    async fn mutate_attributes(
        &self,
        note_path: &str,
        mutator: AttributeMutator,
    ) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        let note = state
            .notes
            .get_mut(note_path)
            .ok_or_else(|| InfraError::NotFound(note_path.to_string()))?;
        mutator(&mut note.attributes);
        Ok(())
    }
}

#[async_trait]
impl NoteVault for InMemoryNoteStore {
    async fn folder_exists(&self, path: &str) -> Result<bool, InfraError> {
        Ok(self.lock()?.folders.contains(path))
    }

    async fn create_folder(&self, path: &str) -> Result<(), InfraError> {
        if !self.lock()?.folders.insert(path.to_string()) {
            return Err(InfraError::AlreadyExists(format!("folder {path}")));
        }
        Ok(())
    }

    async fn read_note(&self, path: &str) -> Result<Option<String>, InfraError> {
        Ok(self.lock()?.notes.get(path).map(|note| note.body.clone()))
    }

    async fn create_note(&self, path: &str, body: &str) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        if state.notes.contains_key(path) {
            return Err(InfraError::AlreadyExists(format!("note {path}")));
        }
        state.notes.insert(
            path.to_string(),
            StoredNote {
                body: body.to_string(),
                attributes: AttributeMap::new(),
            },
        );
        Ok(())
    }
}
