use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::codec;
use crate::domain::activity::Activity;
use crate::domain::dates::{duration_in_range, normalize_date, MAX_DURATION_DAYS};
use crate::domain::node_id::{ActivityKey, ScheduleId};

use super::errors::ImportError;

/// Key used for records that arrive without a record id; the store assigns one.
const UNNAMED_KEY: &str = "import";

/// One line of a document-store export. Field names follow the exporting
/// application; baseline schedules use the `baseline_*` date columns.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRecord {
    #[serde(default, alias = "record_id", alias = "recordId")]
    pub name: Option<String>,
    #[serde(default, alias = "task_name", alias = "display_name")]
    pub activity_name: Option<String>,
    #[serde(default, alias = "linked_document_id")]
    pub task: Option<String>,
    #[serde(default, alias = "baseline_start_date")]
    pub start_date: Option<String>,
    #[serde(default, alias = "baseline_end_date")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub duration: Option<SourceNumber>,
    #[serde(default, alias = "predecessors")]
    pub dependencies_json: Option<SourceDependencies>,
    #[serde(default, alias = "parent_key")]
    pub parent_task: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl SourceNumber {
    fn as_days(&self) -> Result<i64, ImportError> {
        let days = match self {
            SourceNumber::Int(value) => *value,
            SourceNumber::Float(value) if value.fract() == 0.0 => *value as i64,
            SourceNumber::Text(raw) if raw.trim().is_empty() => return Ok(0),
            SourceNumber::Text(raw) => raw.trim().parse::<i64>().map_err(|_| {
                ImportError::InvalidRecord(format!("invalid duration '{}'", raw.trim()))
            })?,
            SourceNumber::Float(value) => {
                return Err(ImportError::InvalidRecord(format!(
                    "invalid duration {}: expected whole days",
                    value
                )))
            }
        };
        if !duration_in_range(days) {
            return Err(ImportError::InvalidRecord(format!(
                "invalid duration {}: expected 0 to {} days",
                days, MAX_DURATION_DAYS
            )));
        }
        Ok(days)
    }
}

/// The dependency payload arrives either as the encoded JSON text or already
/// parsed.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceDependencies {
    Text(String),
    Parsed(Value),
}

impl SourceDependencies {
    fn normalized(&self) -> Option<String> {
        let links = match self {
            SourceDependencies::Text(raw) => codec::decode(Some(raw)),
            SourceDependencies::Parsed(value) => codec::decode_value(value),
        };
        if links.is_empty() {
            None
        } else {
            Some(codec::encode(&links))
        }
    }
}

impl SourceRecord {
    pub fn into_activity(self, schedule: &ScheduleId) -> Result<Activity, ImportError> {
        let record_id = trimmed(self.name.as_deref());
        let display_name = trimmed(self.activity_name.as_deref())
            .or_else(|| trimmed(self.task.as_deref()))
            .or_else(|| record_id.clone())
            .ok_or_else(|| {
                ImportError::InvalidRecord("record requires a name or activity_name".to_string())
            })?;
        let key = match record_id {
            Some(record_id) => ActivityKey::Durable(record_id),
            None => ActivityKey::Provisional(UNNAMED_KEY.to_string()),
        };

        let mut activity = Activity::new(key, schedule.clone(), display_name);
        activity.linked_document_id = trimmed(self.task.as_deref());
        activity.parent_key = trimmed(self.parent_task.as_deref());
        activity.start_date = source_date(self.start_date.as_deref());
        activity.end_date = source_date(self.end_date.as_deref());
        activity.duration = self
            .duration
            .as_ref()
            .map(SourceNumber::as_days)
            .transpose()?
            .filter(|days| *days > 0);
        activity.predecessors_raw = self
            .dependencies_json
            .as_ref()
            .and_then(SourceDependencies::normalized);
        Ok(activity)
    }
}

pub fn normalize_path(raw: &str) -> Result<String, ImportError> {
    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let normalized = if absolute.exists() {
        absolute.canonicalize().unwrap_or(absolute)
    } else {
        absolute
    };
    Ok(normalized.to_string_lossy().to_string())
}

pub fn source_key(schedule: &ScheduleId, source_ref: &str) -> String {
    format!("jsonl:{}:{}", schedule, source_ref)
}

fn trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Unparseable dates are kept as written so `check` can report them.
fn source_date(raw: Option<&str>) -> Option<String> {
    let raw = trimmed(raw)?;
    normalize_date(Some(&raw)).or(Some(raw))
}
