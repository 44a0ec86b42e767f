use crate::domain::template::is_valid_pattern;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const SETTINGS_JSON: &str = "settings.json";
const SCHEMA_VERSION: u64 = 1;
pub const DEFAULT_DONE_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub template_path: String,
    pub done_at_format: String,
    pub task_note_directory: String,
}

impl Settings {
    pub fn validate(&self) -> Result<(), InfraError> {
        let format = self.done_at_format.trim();
        if !format.is_empty() && !is_valid_pattern(format) {
            return Err(InfraError::InvalidConfig(format!(
                "doneAtFormat is not a valid strftime pattern: {format}"
            )));
        }
        Ok(())
    }

    /// Pattern used for `done_at`; empty or invalid values fall back to the default.
    pub fn effective_done_at_format(&self) -> &str {
        let format = self.done_at_format.trim();
        if format.is_empty() {
            return DEFAULT_DONE_AT_FORMAT;
        }
        if !is_valid_pattern(format) {
            tracing::warn!(format, "invalid doneAtFormat, using default");
            return DEFAULT_DONE_AT_FORMAT;
        }
        format
    }

    pub fn template_path(&self) -> Option<&str> {
        let path = self.template_path.trim();
        (!path.is_empty()).then_some(path)
    }

    /// Task note directory without trailing slashes, `None` for the store root.
    pub fn task_note_directory(&self) -> Option<&str> {
        let directory = self.task_note_directory.trim().trim_end_matches('/');
        (!directory.is_empty()).then_some(directory)
    }
}

fn default_settings_value() -> serde_json::Value {
    serde_json::json!({
        "schema": SCHEMA_VERSION,
        "templatePath": "",
        "doneAtFormat": "",
        "taskNoteDirectory": ""
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(SETTINGS_JSON);
    if !path.exists() {
        write_config(&path, &default_settings_value())?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, InfraError> {
    let value = read_config(&config_dir.join(SETTINGS_JSON))?;
    let settings: Settings = serde_json::from_value(value)?;
    if let Err(error) = settings.validate() {
        tracing::warn!(%error, "loaded settings contain an invalid value");
    }
    Ok(settings)
}

pub fn save_settings(config_dir: &Path, settings: &Settings) -> Result<(), InfraError> {
    settings.validate()?;
    let path = config_dir.join(SETTINGS_JSON);
    let mut value = serde_json::to_value(settings)?;
    let object = value.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert("schema".to_string(), serde_json::json!(SCHEMA_VERSION));
    write_config(&path, &value)
}
