use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const DURABLE_TAG: &str = "rec";
const PROVISIONAL_TAG: &str = "new";

/// Identifier of a schedule (the master baseline or an overlay).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId(String);

impl ScheduleId {
    pub fn parse(raw: &str) -> Result<Self, ParseNodeIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseNodeIdError::EmptySchedule);
        }
        if trimmed.contains(':') {
            return Err(ParseNodeIdError::InvalidSchedule(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScheduleId {
    type Err = ParseNodeIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ScheduleId::parse(value)
    }
}

impl Serialize for ScheduleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ScheduleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ScheduleId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// The storage key of an activity: durable once the document store has
/// assigned a record id, provisional before that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum ActivityKey {
    Durable(String),
    Provisional(String),
}

impl ActivityKey {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityKey::Durable(key) | ActivityKey::Provisional(key) => key,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, ActivityKey::Provisional(_))
    }

    fn tag(&self) -> &'static str {
        match self {
            ActivityKey::Durable(_) => DURABLE_TAG,
            ActivityKey::Provisional(_) => PROVISIONAL_TAG,
        }
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced graph node id: `{schedule, kind, key}`.
///
/// The text form `rec:<schedule>:<key>` / `new:<schedule>:<key>` is only used at
/// the widget and CLI boundary; schedule ids never contain `:`, so the key may.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub schedule: ScheduleId,
    pub key: ActivityKey,
}

impl NodeId {
    pub fn new(schedule: ScheduleId, key: ActivityKey) -> Self {
        Self { schedule, key }
    }

    pub fn is_provisional(&self) -> bool {
        self.key.is_provisional()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.key.tag(), self.schedule, self.key.as_str())
    }
}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.trim().splitn(3, ':');
        let (Some(tag), Some(schedule), Some(key)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseNodeIdError::Malformed(value.to_string()));
        };
        if key.is_empty() {
            return Err(ParseNodeIdError::Malformed(value.to_string()));
        }
        let key = match tag {
            DURABLE_TAG => ActivityKey::Durable(key.to_string()),
            PROVISIONAL_TAG => ActivityKey::Provisional(key.to_string()),
            _ => return Err(ParseNodeIdError::UnknownKind(tag.to_string())),
        };
        Ok(NodeId::new(ScheduleId::parse(schedule)?, key))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NodeId::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseNodeIdError {
    EmptySchedule,
    InvalidSchedule(String),
    UnknownKind(String),
    Malformed(String),
}

impl fmt::Display for ParseNodeIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseNodeIdError::EmptySchedule => write!(f, "schedule id cannot be empty"),
            ParseNodeIdError::InvalidSchedule(raw) => {
                write!(f, "invalid schedule id '{}': ':' is not allowed", raw)
            }
            ParseNodeIdError::UnknownKind(tag) => write!(
                f,
                "unknown node kind '{}': expected '{}' or '{}'",
                tag, DURABLE_TAG, PROVISIONAL_TAG
            ),
            ParseNodeIdError::Malformed(raw) => write!(
                f,
                "invalid node id '{}': expected <rec|new>:<schedule>:<key>",
                raw
            ),
        }
    }
}

impl Error for ParseNodeIdError {}
