use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::domain::link::{LinkType, ParseLinkTypeError, PredecessorLink};

/// Decodes a stored predecessor payload. Malformed or missing data yields an
/// empty list; entries that cannot be read are skipped individually.
pub fn decode(raw: Option<&str>) -> Vec<PredecessorLink> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "ignoring unparseable predecessor payload");
            return Vec::new();
        }
    };
    decode_value(&value)
}

/// Same as [`decode`] but for a payload that is already parsed, e.g. an inline
/// `dependencies_json` array in an import record.
pub fn decode_value(value: &Value) -> Vec<PredecessorLink> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match read_entry(entry) {
            Ok(link) => link,
            Err(err) => {
                debug!(error = %err, "skipping predecessor entry");
                None
            }
        })
        .collect()
}

/// Strict decoding for diagnostics: reports the first problem instead of
/// silently dropping data. An absent or blank payload is an empty list.
pub fn try_decode(raw: Option<&str>) -> Result<Vec<PredecessorLink>, CodecError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Vec::new());
    };
    let value = serde_json::from_str::<Value>(raw).map_err(CodecError::Json)?;
    let Value::Array(entries) = value else {
        return Err(CodecError::NotAnArray);
    };

    let mut links = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match read_entry(entry) {
            Ok(Some(link)) => links.push(link),
            Ok(None) => return Err(CodecError::EmptyPredecessor { index }),
            Err(reason) => return Err(CodecError::Entry { index, reason }),
        }
    }
    Ok(links)
}

pub fn encode(links: &[PredecessorLink]) -> String {
    serde_json::to_string(links).unwrap_or_else(|_| "[]".to_string())
}

fn read_entry(entry: &Value) -> Result<Option<PredecessorLink>, EntryError> {
    let object = match entry {
        Value::Object(object) => object,
        Value::String(reference) => {
            return Ok(non_empty(reference).map(PredecessorLink::finish_to_start));
        }
        _ => return Err(EntryError::NotAnObject),
    };

    let reference = match object.get("predecessor") {
        Some(Value::String(reference)) => non_empty(reference),
        Some(Value::Number(number)) => Some(number.to_string()),
        None | Some(Value::Null) => None,
        Some(_) => return Err(EntryError::Predecessor),
    };
    let Some(reference) = reference else {
        return Ok(None);
    };

    let link_type = match object.get("type") {
        None | Some(Value::Null) => LinkType::default(),
        Some(Value::String(raw)) => LinkType::from_str(raw).map_err(EntryError::Type)?,
        Some(_) => return Err(EntryError::TypeNotString),
    };

    let lag = match object.get("lag") {
        None | Some(Value::Null) => 0,
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|lag| lag.round() as i64))
            .ok_or_else(|| EntryError::Lag(number.to_string()))?,
        Some(Value::String(raw)) if raw.trim().is_empty() => 0,
        Some(Value::String(raw)) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| EntryError::Lag(raw.clone()))?,
        Some(other) => return Err(EntryError::Lag(other.to_string())),
    };

    Ok(Some(PredecessorLink::new(reference, link_type, lag)))
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug)]
pub enum EntryError {
    NotAnObject,
    Predecessor,
    TypeNotString,
    Type(ParseLinkTypeError),
    Lag(String),
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryError::NotAnObject => write!(f, "entry is not an object"),
            EntryError::Predecessor => write!(f, "predecessor must be a string or number"),
            EntryError::TypeNotString => write!(f, "type must be a string"),
            EntryError::Type(err) => write!(f, "{}", err),
            EntryError::Lag(raw) => write!(f, "invalid lag {}", raw),
        }
    }
}

#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    NotAnArray,
    EmptyPredecessor { index: usize },
    Entry { index: usize, reason: EntryError },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(err) => write!(f, "predecessor payload is not valid JSON: {}", err),
            CodecError::NotAnArray => write!(f, "predecessor payload is not a JSON array"),
            CodecError::EmptyPredecessor { index } => {
                write!(f, "entry {} has an empty predecessor reference", index)
            }
            CodecError::Entry { index, reason } => write!(f, "entry {}: {}", index, reason),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CodecError::Json(err) => Some(err),
            _ => None,
        }
    }
}
