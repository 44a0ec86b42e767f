use crate::domain::models::AttributeMap;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset};
use regex::{Captures, Regex};
use std::fmt::Write;
use std::sync::LazyLock;

static DATE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{date\}\}").expect("valid date placeholder pattern"));
static TIME_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{time\}\}").expect("valid time placeholder pattern"));
static TITLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{title\}\}").expect("valid title placeholder pattern"));
static CUSTOM_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(?:date|time):([^}]+)\}\}").expect("valid custom placeholder pattern")
});

/// Expands `{{date}}`, `{{time}}`, `{{title}}`, `{{date:FMT}}` and
/// `{{time:FMT}}` in a note template. `FMT` is a strftime pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateProcessor;

impl TemplateProcessor {
    pub fn process(&self, content: &str, file_name: &str, now: DateTime<FixedOffset>) -> String {
        let title = file_name.strip_suffix(".md").unwrap_or(file_name);
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M").to_string();

        let processed = DATE_PLACEHOLDER.replace_all(content, date.as_str());
        let processed = TIME_PLACEHOLDER.replace_all(&processed, time.as_str());
        let processed = TITLE_PLACEHOLDER.replace_all(&processed, regex::NoExpand(title));
        CUSTOM_PLACEHOLDER
            .replace_all(&processed, |captures: &Captures<'_>| {
                format_with_pattern(now, &captures[1]).unwrap_or_else(|| captures[0].to_string())
            })
            .into_owned()
    }
}

/// Formats `now` with a strftime pattern, or `None` when the pattern is invalid.
pub fn format_with_pattern(now: DateTime<FixedOffset>, pattern: &str) -> Option<String> {
    if !is_valid_pattern(pattern) {
        return None;
    }
    let mut output = String::new();
    write!(output, "{}", now.format(pattern)).ok()?;
    Some(output)
}

pub fn is_valid_pattern(pattern: &str) -> bool {
    StrftimeItems::new(pattern).all(|item| !matches!(item, Item::Error))
}

/// Splits a leading `---` fenced block off `content`, returning the YAML
/// text and the remaining body. `None` when there is no closed block.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

pub fn parse_frontmatter(yaml: &str) -> Result<AttributeMap, serde_yaml::Error> {
    if yaml.trim().is_empty() {
        return Ok(AttributeMap::new());
    }
    serde_yaml::from_str(yaml)
}
