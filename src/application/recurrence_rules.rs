use crate::domain::models::{
    AttributeMap, KEY_DAYS_OF_MONTH, KEY_DAYS_OF_WEEK, KEY_SCHEDULED_TIMES, RecurrenceRule,
    TIME_FORMAT, TaskFrontmatter, is_task_record, parse_weekday_token, validate_hhmm, weekday_token,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::RecordStore;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Edits the `recurring_*` keys of a recurring task.
///
/// Unlike completion, these operations fail loudly on notes that are not
/// recurring tasks.
pub struct RecurrenceRuleEditor<S>
where
    S: RecordStore,
{
    store: Arc<S>,
}

impl<S> RecurrenceRuleEditor<S>
where
    S: RecordStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn current_rule(&self, task_id: &str) -> Result<RecurrenceRule, InfraError> {
        Ok(self.load_recurring(task_id).await?.recurrence_rule())
    }

    pub async fn set_days_of_month(
        &self,
        task_id: &str,
        days: &[u32],
    ) -> Result<RecurrenceRule, InfraError> {
        let days = normalize_days_of_month(days)?;
        self.load_recurring(task_id).await?;
        let value = Value::from(days.into_iter().collect::<Vec<_>>());
        self.write(task_id, KEY_DAYS_OF_MONTH, value).await?;
        self.current_rule(task_id).await
    }

    pub async fn set_days_of_week(
        &self,
        task_id: &str,
        days: &[String],
    ) -> Result<RecurrenceRule, InfraError> {
        let tokens = normalize_days_of_week(days)?;
        self.load_recurring(task_id).await?;
        self.write(task_id, KEY_DAYS_OF_WEEK, Value::from(tokens))
            .await?;
        self.current_rule(task_id).await
    }

    pub async fn set_scheduled_times(
        &self,
        task_id: &str,
        times: &[String],
    ) -> Result<RecurrenceRule, InfraError> {
        let times = normalize_scheduled_times(times)?;
        self.load_recurring(task_id).await?;
        self.write(task_id, KEY_SCHEDULED_TIMES, Value::from(times))
            .await?;
        self.current_rule(task_id).await
    }

    async fn load_recurring(&self, task_id: &str) -> Result<TaskFrontmatter, InfraError> {
        let attributes = self.store.get_attributes(task_id).await?.unwrap_or_default();
        if !is_task_record(&attributes) {
            return Err(InfraError::NotATask(task_id.to_string()));
        }
        let task = TaskFrontmatter::from_attributes(&attributes)?;
        if !task.is_recurring() {
            return Err(InfraError::NotRecurring(task_id.to_string()));
        }
        Ok(task)
    }

    async fn write(&self, task_id: &str, key: &'static str, value: Value) -> Result<(), InfraError> {
        self.store
            .mutate_attributes(
                task_id,
                Box::new(move |attributes: &mut AttributeMap| {
                    attributes.insert(key.to_string(), value);
                }),
            )
            .await
    }
}

fn normalize_days_of_month(days: &[u32]) -> Result<BTreeSet<u32>, InfraError> {
    if let Some(day) = days.iter().find(|day| !(1..=31).contains(*day)) {
        return Err(InfraError::InvalidRule(format!(
            "day of month must be between 1 and 31, got {day}"
        )));
    }
    Ok(days.iter().copied().collect())
}

/// Canonical short tokens in Mon..Sun order.
fn normalize_days_of_week(days: &[String]) -> Result<Vec<String>, InfraError> {
    let parsed = days
        .iter()
        .map(|token| {
            parse_weekday_token(token)
                .ok_or_else(|| InfraError::InvalidRule(format!("unknown weekday '{token}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecurrenceRule::new([], parsed, [])
        .days_of_week()
        .iter()
        .map(|day| weekday_token(*day).to_string())
        .collect())
}

/// Zero-padded `HH:mm` values, sorted and de-duplicated.
fn normalize_scheduled_times(times: &[String]) -> Result<Vec<String>, InfraError> {
    let parsed = times
        .iter()
        .map(|time| validate_hhmm(time, "scheduled time").map_err(InfraError::InvalidRule))
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(parsed
        .into_iter()
        .map(|time| time.format(TIME_FORMAT).to_string())
        .collect())
}
