use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub type AttributeMap = serde_json::Map<String, Value>;

pub const TASK_TYPE: &str = "task";
pub const RECURRING_ATTRIBUTE: &str = "recurring";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub const KEY_TYPE: &str = "type";
pub const KEY_DONE: &str = "done";
pub const KEY_DONE_AT: &str = "done_at";
pub const KEY_DUE_DATE: &str = "due_date";
pub const KEY_SCHEDULED_TIME: &str = "scheduled_time";
pub const KEY_PRIORITY: &str = "priority";
pub const KEY_ATTRIBUTES: &str = "attributes";
pub const KEY_DAYS_OF_MONTH: &str = "recurring_days_of_month";
pub const KEY_DAYS_OF_WEEK: &str = "recurring_days_of_week";
pub const KEY_SCHEDULED_TIMES: &str = "recurring_scheduled_times";

const WEEK_ORDER: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Typed read view of a task note's frontmatter.
///
/// Keys the core does not know about are kept in `extra`, so a value read
/// through this type can be written back without losing anything. A known
/// key holding an unexpected type reads as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskFrontmatter {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub done_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub scheduled_time: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_strings",
        skip_serializing_if = "Option::is_none"
    )]
    pub attributes: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "lenient_days",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurring_days_of_month: Option<Vec<i64>>,
    #[serde(
        default,
        deserialize_with = "lenient_strings",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurring_days_of_week: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "lenient_strings",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurring_scheduled_times: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: AttributeMap,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// String entries of a list; a lone string counts as a one-entry list.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text),
                    _ => None,
                })
                .collect(),
        ),
        Value::String(text) => Some(vec![text]),
        _ => None,
    })
}

/// Integers and numeric strings; anything else is dropped.
fn lenient_days<'de, D>(deserializer: D) -> Result<Option<Vec<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(items.iter().filter_map(day_number).collect()),
        Value::Null => None,
        other => day_number(&other).map(|day| vec![day]),
    })
}

fn day_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Task-ness depends on the `type` marker alone.
pub fn is_task_record(attributes: &AttributeMap) -> bool {
    attributes.get(KEY_TYPE).and_then(Value::as_str) == Some(TASK_TYPE)
}

impl TaskFrontmatter {
    pub fn from_attributes(attributes: &AttributeMap) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(attributes.clone()))
    }

    pub fn is_task(&self) -> bool {
        self.kind.as_deref() == Some(TASK_TYPE)
    }

    pub fn is_done(&self) -> bool {
        self.done == Some(true)
    }

    pub fn is_recurring(&self) -> bool {
        self.attributes
            .as_ref()
            .is_some_and(|attributes| attributes.iter().any(|tag| tag == RECURRING_ATTRIBUTE))
    }

    pub fn has_done_at(&self) -> bool {
        self.done_at
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }

    pub fn current_due_date(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(parse_due_date)
    }

    /// Builds the recurrence rule from the `recurring_*` keys.
    ///
    /// Unknown weekday tokens and unparsable times are dropped. Day-of-month
    /// values are kept as long as they fit in `u32`, even outside 1-31; such
    /// values simply never match a calendar date.
    pub fn recurrence_rule(&self) -> RecurrenceRule {
        let days_of_month = self
            .recurring_days_of_month
            .iter()
            .flatten()
            .filter_map(|day| u32::try_from(*day).ok());
        let days_of_week = self
            .recurring_days_of_week
            .iter()
            .flatten()
            .filter_map(|token| {
                let parsed = parse_weekday_token(token);
                if parsed.is_none() {
                    tracing::warn!(token = %token, "ignoring unknown recurring weekday token");
                }
                parsed
            });
        let scheduled_times = self
            .recurring_scheduled_times
            .iter()
            .flatten()
            .filter_map(|time| {
                let parsed = parse_hhmm(time);
                if parsed.is_none() {
                    tracing::warn!(time = %time, "ignoring malformed recurring scheduled time");
                }
                parsed
            });
        RecurrenceRule::new(days_of_month, days_of_week, scheduled_times)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceRule {
    days_of_month: BTreeSet<u32>,
    days_of_week: Vec<Weekday>,
    scheduled_times: BTreeSet<NaiveTime>,
}

impl RecurrenceRule {
    pub fn new(
        days_of_month: impl IntoIterator<Item = u32>,
        days_of_week: impl IntoIterator<Item = Weekday>,
        scheduled_times: impl IntoIterator<Item = NaiveTime>,
    ) -> Self {
        let selected = days_of_week.into_iter().collect::<Vec<_>>();
        Self {
            days_of_month: days_of_month.into_iter().collect(),
            days_of_week: WEEK_ORDER
                .into_iter()
                .filter(|day| selected.contains(day))
                .collect(),
            scheduled_times: scheduled_times.into_iter().collect(),
        }
    }

    pub fn days_of_month(&self) -> impl Iterator<Item = u32> + '_ {
        self.days_of_month.iter().copied()
    }

    pub fn days_of_week(&self) -> &[Weekday] {
        &self.days_of_week
    }

    pub fn scheduled_times(&self) -> impl Iterator<Item = NaiveTime> + '_ {
        self.scheduled_times.iter().copied()
    }

    pub fn has_date_constraints(&self) -> bool {
        !self.days_of_month.is_empty() || !self.days_of_week.is_empty()
    }

    pub fn has_time_constraints(&self) -> bool {
        !self.scheduled_times.is_empty()
    }

    pub fn is_configured(&self) -> bool {
        self.has_date_constraints() || self.has_time_constraints()
    }

    /// A date qualifies when either its day of month or its weekday is listed.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        self.days_of_month.contains(&date.day()) || self.days_of_week.contains(&date.weekday())
    }

    pub fn next_slot_after(&self, time: NaiveTime) -> Option<NaiveTime> {
        self.scheduled_times
            .iter()
            .copied()
            .find(|candidate| *candidate > time)
    }

    pub fn earliest_slot(&self) -> Option<NaiveTime> {
        self.scheduled_times.first().copied()
    }

    pub fn weekday_tokens(&self) -> Vec<String> {
        self.days_of_week
            .iter()
            .map(|day| weekday_token(*day).to_string())
            .collect()
    }

    pub fn scheduled_time_strings(&self) -> Vec<String> {
        self.scheduled_times
            .iter()
            .map(|time| time.format(TIME_FORMAT).to_string())
            .collect()
    }
}

/// Next occurrence of a recurring task. Both fields absent means no
/// occurrence could be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NextRecurrence {
    pub due_date: Option<NaiveDate>,
    pub scheduled_time: Option<NaiveTime>,
}

impl NextRecurrence {
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn is_unresolved(&self) -> bool {
        self.due_date.is_none() && self.scheduled_time.is_none()
    }

    pub fn due_date_string(&self) -> Option<String> {
        self.due_date
            .map(|date| date.format(DATE_FORMAT).to_string())
    }

    pub fn scheduled_time_string(&self) -> Option<String> {
        self.scheduled_time
            .map(|time| time.format(TIME_FORMAT).to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldUpdate {
    #[default]
    Keep,
    Set(Value),
    /// Only writes when the key is missing, null or an empty string.
    SetIfAbsent(Value),
    /// Writes unless the key already holds a non-empty string.
    SetUnlessText(Value),
    Remove,
}

impl FieldUpdate {
    pub fn apply_to(&self, attributes: &mut AttributeMap, key: &str) {
        match self {
            Self::Keep => {}
            Self::Set(value) => {
                attributes.insert(key.to_string(), value.clone());
            }
            Self::SetIfAbsent(value) => {
                if is_absent(attributes.get(key)) {
                    attributes.insert(key.to_string(), value.clone());
                }
            }
            Self::SetUnlessText(value) => {
                let has_text = attributes
                    .get(key)
                    .and_then(Value::as_str)
                    .is_some_and(|text| !text.trim().is_empty());
                if !has_text {
                    attributes.insert(key.to_string(), value.clone());
                }
            }
            Self::Remove => {
                attributes.remove(key);
            }
        }
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

/// Write-side change to a task record. Applied to the raw attribute map so
/// keys outside the patch are never touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub done: FieldUpdate,
    pub done_at: FieldUpdate,
    pub due_date: FieldUpdate,
    pub scheduled_time: FieldUpdate,
}

impl TaskPatch {
    pub fn complete(timestamp: String) -> Self {
        Self {
            done: FieldUpdate::Set(Value::Bool(true)),
            done_at: FieldUpdate::SetUnlessText(Value::String(timestamp)),
            ..Self::default()
        }
    }

    pub fn reopen() -> Self {
        Self {
            done: FieldUpdate::Set(Value::Bool(false)),
            done_at: FieldUpdate::Remove,
            ..Self::default()
        }
    }

    pub fn reschedule(next: &NextRecurrence) -> Self {
        Self {
            done: FieldUpdate::Set(Value::Bool(false)),
            done_at: FieldUpdate::Remove,
            due_date: FieldUpdate::Set(optional_string(next.due_date_string())),
            scheduled_time: FieldUpdate::Set(optional_string(next.scheduled_time_string())),
        }
    }

    pub fn stamp_done_at(timestamp: String) -> Self {
        Self {
            done_at: FieldUpdate::SetUnlessText(Value::String(timestamp)),
            ..Self::default()
        }
    }

    pub fn clear_done_at() -> Self {
        Self {
            done_at: FieldUpdate::Remove,
            ..Self::default()
        }
    }

    pub fn apply(&self, attributes: &mut AttributeMap) {
        self.done.apply_to(attributes, KEY_DONE);
        self.done_at.apply_to(attributes, KEY_DONE_AT);
        self.due_date.apply_to(attributes, KEY_DUE_DATE);
        self.scheduled_time.apply_to(attributes, KEY_SCHEDULED_TIME);
    }
}

fn optional_string(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

pub fn parse_weekday_token(value: &str) -> Option<Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Parses `H:MM` or `HH:MM` (24-hour).
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let (hour_str, minute_str) = value.trim().split_once(':')?;
    if hour_str.is_empty()
        || hour_str.len() > 2
        || minute_str.len() != 2
        || !hour_str.bytes().all(|byte| byte.is_ascii_digit())
        || !minute_str.bytes().all(|byte| byte.is_ascii_digit())
    {
        return None;
    }
    let hour = hour_str.parse::<u32>().ok()?;
    let minute = minute_str.parse::<u32>().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

pub fn validate_hhmm(value: &str, field_name: &str) -> Result<NaiveTime, String> {
    parse_hhmm(value).ok_or_else(|| format!("{field_name} must be HH:MM, got '{value}'"))
}

/// Accepts `YYYY-MM-DD`, or a date-time whose first ten characters are one.
pub fn parse_due_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| {
            value
                .get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, DATE_FORMAT).ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_attributes() -> AttributeMap {
        let value = json!({
            "type": "task",
            "done": false,
            "due_date": "2024-03-10",
            "scheduled_time": "09:00",
            "priority": 2,
            "attributes": ["recurring"],
            "recurring_days_of_month": [15, 1],
            "recurring_days_of_week": ["Sun", "mon", "Funday"],
            "recurring_scheduled_times": ["14:30", "9:00", "25:00"],
            "project": "home",
            "tags": ["chores"]
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn time(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, TIME_FORMAT).expect("valid time")
    }

    #[test]
    fn frontmatter_reads_known_fields_and_keeps_extras() {
        let frontmatter =
            TaskFrontmatter::from_attributes(&sample_attributes()).expect("parse frontmatter");

        assert!(frontmatter.is_task());
        assert!(!frontmatter.is_done());
        assert!(frontmatter.is_recurring());
        assert!(!frontmatter.has_done_at());
        assert_eq!(
            frontmatter.current_due_date(),
            NaiveDate::from_ymd_opt(2024, 3, 10)
        );
        assert_eq!(frontmatter.extra.get("project"), Some(&json!("home")));
        assert_eq!(frontmatter.extra.get("priority"), Some(&json!(2)));
        assert!(!frontmatter.extra.contains_key("done"));
    }

    #[test]
    fn mistyped_known_keys_read_as_absent() {
        let mut attributes = sample_attributes();
        attributes.insert("done".to_string(), json!("yes"));
        attributes.insert("done_at".to_string(), json!(1710000000));
        attributes.insert("scheduled_time".to_string(), json!(900));
        attributes.insert("recurring_days_of_week".to_string(), json!(["Mon", 3]));

        let frontmatter = TaskFrontmatter::from_attributes(&attributes).expect("parse frontmatter");

        assert!(frontmatter.is_task());
        assert_eq!(frontmatter.done, None);
        assert_eq!(frontmatter.done_at, None);
        assert_eq!(frontmatter.scheduled_time, None);
        assert_eq!(frontmatter.recurrence_rule().days_of_week(), &[Weekday::Mon]);
        assert!(!frontmatter.extra.contains_key("done_at"));
    }

    #[test]
    fn string_days_of_month_are_coerced() {
        let mut attributes = sample_attributes();
        attributes.insert("recurring_days_of_month".to_string(), json!(["15", 1, "x", null]));

        let rule = TaskFrontmatter::from_attributes(&attributes)
            .expect("parse frontmatter")
            .recurrence_rule();

        assert_eq!(rule.days_of_month().collect::<Vec<_>>(), vec![1, 15]);
    }

    #[test]
    fn task_marker_decides_task_records() {
        let mut attributes = sample_attributes();
        assert!(is_task_record(&attributes));
        attributes.insert("done_at".to_string(), json!(false));
        assert!(is_task_record(&attributes));
        attributes.insert("type".to_string(), json!(["task"]));
        assert!(!is_task_record(&attributes));
        assert!(!TaskFrontmatter::from_attributes(&attributes)
            .expect("parse frontmatter")
            .is_task());
    }

    #[test]
    fn complete_patch_replaces_mistyped_timestamp() {
        let mut attributes = sample_attributes();
        attributes.insert("done_at".to_string(), json!(1710000000));

        TaskPatch::complete("2024-03-10T10:00:00+00:00".to_string()).apply(&mut attributes);

        assert_eq!(
            attributes.get("done_at"),
            Some(&json!("2024-03-10T10:00:00+00:00"))
        );
    }

    #[test]
    fn recurrence_rule_drops_unknown_tokens_and_orders_weekdays() {
        let frontmatter =
            TaskFrontmatter::from_attributes(&sample_attributes()).expect("parse frontmatter");
        let rule = frontmatter.recurrence_rule();

        assert_eq!(rule.days_of_month().collect::<Vec<_>>(), vec![1, 15]);
        assert_eq!(rule.days_of_week(), &[Weekday::Mon, Weekday::Sun]);
        assert_eq!(rule.weekday_tokens(), vec!["Mon", "Sun"]);
        assert_eq!(rule.scheduled_time_strings(), vec!["09:00", "14:30"]);
        assert_eq!(rule.earliest_slot(), Some(time("09:00")));
        assert_eq!(rule.next_slot_after(time("09:00")), Some(time("14:30")));
        assert_eq!(rule.next_slot_after(time("14:30")), None);
    }

    #[test]
    fn non_task_and_missing_flags_are_reported() {
        let frontmatter = TaskFrontmatter {
            kind: Some("note".to_string()),
            done_at: Some("  ".to_string()),
            ..TaskFrontmatter::default()
        };
        assert!(!frontmatter.is_task());
        assert!(!frontmatter.is_recurring());
        assert!(!frontmatter.has_done_at());
        assert!(!frontmatter.recurrence_rule().is_configured());
    }

    #[test]
    fn complete_patch_keeps_existing_timestamp_and_unrelated_keys() {
        let mut attributes = sample_attributes();
        attributes.insert("done_at".to_string(), json!("2024-03-01T08:00:00+00:00"));

        TaskPatch::complete("2024-03-10T10:00:00+00:00".to_string()).apply(&mut attributes);

        assert_eq!(attributes.get("done"), Some(&json!(true)));
        assert_eq!(
            attributes.get("done_at"),
            Some(&json!("2024-03-01T08:00:00+00:00"))
        );
        assert_eq!(attributes.get("project"), Some(&json!("home")));
        assert_eq!(attributes.get("tags"), Some(&json!(["chores"])));
    }

    #[test]
    fn complete_patch_fills_empty_timestamp() {
        let mut attributes = sample_attributes();
        attributes.insert("done_at".to_string(), json!(""));

        TaskPatch::complete("2024-03-10T10:00:00+00:00".to_string()).apply(&mut attributes);

        assert_eq!(
            attributes.get("done_at"),
            Some(&json!("2024-03-10T10:00:00+00:00"))
        );
    }

    #[test]
    fn reschedule_patch_overwrites_occurrence_and_clears_timestamp() {
        let mut attributes = sample_attributes();
        attributes.insert("done".to_string(), json!(true));
        attributes.insert("done_at".to_string(), json!("2024-03-10T10:00:00+00:00"));

        let next = NextRecurrence {
            due_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            scheduled_time: None,
        };
        TaskPatch::reschedule(&next).apply(&mut attributes);

        assert_eq!(attributes.get("done"), Some(&json!(false)));
        assert!(!attributes.contains_key("done_at"));
        assert_eq!(attributes.get("due_date"), Some(&json!("2024-03-15")));
        assert_eq!(attributes.get("scheduled_time"), Some(&Value::Null));
        assert_eq!(attributes.len(), sample_attributes().len());
    }

    #[test]
    fn hhmm_parsing_matches_picker_rules() {
        assert_eq!(parse_hhmm("09:00"), Some(time("09:00")));
        assert_eq!(parse_hhmm("9:05"), Some(time("09:05")));
        assert_eq!(parse_hhmm("23:59"), Some(time("23:59")));
        assert!(parse_hhmm("24:00").is_none());
        assert!(parse_hhmm("12:60").is_none());
        assert!(parse_hhmm("12:5").is_none());
        assert!(parse_hhmm("123:00").is_none());
        assert!(parse_hhmm("noon").is_none());
        assert!(validate_hhmm("7pm", "recurring_scheduled_times[]").is_err());
    }

    #[test]
    fn due_date_parsing_accepts_date_time_prefix() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 10);
        assert_eq!(parse_due_date("2024-03-10"), expected);
        assert_eq!(parse_due_date("2024-03-10T09:30"), expected);
        assert_eq!(parse_due_date("not a date"), None);
        assert_eq!(parse_due_date(""), None);
    }

    #[test]
    fn weekday_tokens_round_trip() {
        for day in WEEK_ORDER {
            assert_eq!(parse_weekday_token(weekday_token(day)), Some(day));
        }
        assert_eq!(parse_weekday_token("Thursday"), Some(Weekday::Thu));
        assert_eq!(parse_weekday_token("Thurs"), None);
    }
}
