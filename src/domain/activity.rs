use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::domain::link::PredecessorLink;
use crate::domain::node_id::{ActivityKey, NodeId, ScheduleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleRole {
    Master,
    Overlay,
}

impl ScheduleRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleRole::Master => "master",
            ScheduleRole::Overlay => "overlay",
        }
    }
}

impl fmt::Display for ScheduleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleRole {
    type Err = ParseScheduleRoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "master" | "baseline" => Ok(ScheduleRole::Master),
            "overlay" | "operational" | "comparison" => Ok(ScheduleRole::Overlay),
            _ => Err(ParseScheduleRoleError {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScheduleRoleError {
    value: String,
}

impl fmt::Display for ParseScheduleRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid schedule role '{}': expected master or overlay",
            self.value
        )
    }
}

impl Error for ParseScheduleRoleError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub role: ScheduleRole,
}

impl Schedule {
    #[cfg(test)]
    pub fn master(id: ScheduleId) -> Self {
        Self {
            id,
            role: ScheduleRole::Master,
        }
    }

    pub fn overlay(id: ScheduleId) -> Self {
        Self {
            id,
            role: ScheduleRole::Overlay,
        }
    }
}

/// One schedulable unit of work as the document store holds it.
///
/// Dates stay in their stored text form; the graph builder decides what is
/// usable. `predecessors_raw` is the encoded predecessor list and is only
/// rewritten by an explicit edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    pub key: ActivityKey,
    pub schedule_id: ScheduleId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub predecessors_raw: Option<String>,
}

impl Activity {
    pub fn new(key: ActivityKey, schedule_id: ScheduleId, display_name: impl Into<String>) -> Self {
        Self {
            key,
            schedule_id,
            display_name: display_name.into(),
            linked_document_id: None,
            parent_key: None,
            start_date: None,
            end_date: None,
            duration: None,
            predecessors_raw: None,
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.schedule_id.clone(), self.key.clone())
    }

    pub fn predecessors(&self) -> Vec<PredecessorLink> {
        codec::decode(self.predecessors_raw.as_deref())
    }

    pub fn apply_patch(&mut self, patch: &ActivityPatch) {
        if let Some(name) = patch.display_name.as_deref() {
            self.display_name = name.to_string();
        }
        if let Some(linked) = patch.linked_document_id.as_deref() {
            self.linked_document_id = non_empty(linked);
        }
        if let Some(parent) = patch.parent_key.as_deref() {
            self.parent_key = non_empty(parent);
        }
        if let Some(start) = patch.start_date.as_deref() {
            self.start_date = Some(start.to_string());
        }
        if let Some(end) = patch.end_date.as_deref() {
            self.end_date = Some(end.to_string());
        }
        if let Some(duration) = patch.duration {
            self.duration = Some(duration);
        }
        if let Some(raw) = patch.predecessors_raw.as_deref() {
            self.predecessors_raw = Some(raw.to_string());
        }
    }
}

/// A partial update keyed by record id. `None` means "leave unchanged"; an
/// empty `linked_document_id` or `parent_key` clears the field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessors_raw: Option<String>,
}

impl ActivityPatch {
    pub fn predecessors(raw: String) -> Self {
        Self {
            predecessors_raw: Some(raw),
            ..Self::default()
        }
    }

    pub fn has_changes(&self) -> bool {
        self.display_name.is_some()
            || self.linked_document_id.is_some()
            || self.parent_key.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
            || self.duration.is_some()
            || self.predecessors_raw.is_some()
    }

    /// Folds `later` over `self`; fields set in `later` win.
    pub fn merge(&mut self, later: ActivityPatch) {
        if later.display_name.is_some() {
            self.display_name = later.display_name;
        }
        if later.linked_document_id.is_some() {
            self.linked_document_id = later.linked_document_id;
        }
        if later.parent_key.is_some() {
            self.parent_key = later.parent_key;
        }
        if later.start_date.is_some() {
            self.start_date = later.start_date;
        }
        if later.end_date.is_some() {
            self.end_date = later.end_date;
        }
        if later.duration.is_some() {
            self.duration = later.duration;
        }
        if later.predecessors_raw.is_some() {
            self.predecessors_raw = later.predecessors_raw;
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
