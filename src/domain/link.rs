use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkType {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

impl LinkType {
    pub const ALL: [LinkType; 4] = [
        LinkType::FinishToStart,
        LinkType::StartToStart,
        LinkType::FinishToFinish,
        LinkType::StartToFinish,
    ];

    /// Short code stored in the predecessor payload.
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::FinishToStart => "FS",
            LinkType::StartToStart => "SS",
            LinkType::FinishToFinish => "FF",
            LinkType::StartToFinish => "SF",
        }
    }

    /// Numeric link type used by the Gantt widget's link schema.
    pub fn widget_code(self) -> &'static str {
        match self {
            LinkType::FinishToStart => "0",
            LinkType::StartToStart => "1",
            LinkType::FinishToFinish => "2",
            LinkType::StartToFinish => "3",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = ParseLinkTypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        match normalized.as_str() {
            "fs" | "finishtostart" | "" => Ok(LinkType::FinishToStart),
            "ss" | "starttostart" => Ok(LinkType::StartToStart),
            "ff" | "finishtofinish" => Ok(LinkType::FinishToFinish),
            "sf" | "starttofinish" => Ok(LinkType::StartToFinish),
            _ => Err(ParseLinkTypeError {
                value: value.to_string(),
            }),
        }
    }
}

impl Serialize for LinkType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LinkType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        LinkType::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLinkTypeError {
    value: String,
}

impl fmt::Display for ParseLinkTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid link type '{}': expected one of {}",
            self.value,
            LinkType::ALL
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl Error for ParseLinkTypeError {}

/// One dependency edge, stored on the target activity.
///
/// `predecessor` is kept exactly as written: it may be a record id, a provisional
/// id, a linked-document id, or a display name.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
pub struct PredecessorLink {
    pub predecessor: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub lag: i64,
}

impl PredecessorLink {
    pub fn new(predecessor: impl Into<String>, link_type: LinkType, lag: i64) -> Self {
        Self {
            predecessor: predecessor.into(),
            link_type,
            lag,
        }
    }

    pub fn finish_to_start(predecessor: impl Into<String>) -> Self {
        Self::new(predecessor, LinkType::FinishToStart, 0)
    }
}

/// A command-line link spec: `<ref>[@<TYPE>[+|-<lag>]]`, e.g. `abc-12@SS+2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub reference: String,
    pub link_type: Option<LinkType>,
    pub lag: i64,
}

impl LinkSpec {
    pub fn into_link(self, default_type: LinkType) -> PredecessorLink {
        PredecessorLink::new(
            self.reference,
            self.link_type.unwrap_or(default_type),
            self.lag,
        )
    }
}

impl FromStr for LinkSpec {
    type Err = ParseLinkSpecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let raw = value.trim();
        let (reference, suffix) = match raw.rsplit_once('@') {
            Some((reference, suffix)) => (reference.trim(), Some(suffix.trim())),
            None => (raw, None),
        };
        if reference.is_empty() {
            return Err(ParseLinkSpecError::EmptyReference(value.to_string()));
        }

        let Some(suffix) = suffix else {
            return Ok(Self {
                reference: reference.to_string(),
                link_type: None,
                lag: 0,
            });
        };

        let split_at = suffix.find(['+', '-']).unwrap_or(suffix.len());
        let (type_part, lag_part) = suffix.split_at(split_at);
        let link_type = LinkType::from_str(type_part).map_err(ParseLinkSpecError::Type)?;
        let lag = if lag_part.is_empty() {
            0
        } else {
            lag_part
                .strip_prefix('+')
                .unwrap_or(lag_part)
                .parse::<i64>()
                .map_err(|_| ParseLinkSpecError::Lag(lag_part.to_string()))?
        };

        Ok(Self {
            reference: reference.to_string(),
            link_type: Some(link_type),
            lag,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseLinkSpecError {
    EmptyReference(String),
    Type(ParseLinkTypeError),
    Lag(String),
}

impl fmt::Display for ParseLinkSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseLinkSpecError::EmptyReference(raw) => {
                write!(f, "link spec '{}' is missing a reference", raw)
            }
            ParseLinkSpecError::Type(err) => write!(f, "{}", err),
            ParseLinkSpecError::Lag(raw) => {
                write!(f, "invalid lag '{}': expected a signed whole number of days", raw)
            }
        }
    }
}

impl Error for ParseLinkSpecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParseLinkSpecError::Type(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkSpec, LinkType, ParseLinkSpecError};
    use std::str::FromStr;

    #[test]
    fn parses_short_and_long_type_names() {
        assert_eq!(LinkType::from_str("FS").unwrap(), LinkType::FinishToStart);
        assert_eq!(LinkType::from_str("ss").unwrap(), LinkType::StartToStart);
        assert_eq!(
            LinkType::from_str("FinishToFinish").unwrap(),
            LinkType::FinishToFinish
        );
        assert_eq!(
            LinkType::from_str("start-to-finish").unwrap(),
            LinkType::StartToFinish
        );
    }

    #[test]
    fn empty_type_defaults_to_finish_to_start() {
        assert_eq!(LinkType::from_str("  ").unwrap(), LinkType::FinishToStart);
    }

    #[test]
    fn invalid_type_lists_expected_values() {
        let err = LinkType::from_str("XX").expect_err("unknown type should fail");
        let message = err.to_string();
        assert!(message.contains("'XX'"));
        assert!(message.contains("FS, SS, FF, SF"));
    }

    #[test]
    fn serializes_as_short_code() {
        let json = serde_json::to_string(&LinkType::StartToStart).unwrap();
        assert_eq!(json, "\"SS\"");
        let parsed: LinkType = serde_json::from_str("\"FinishToStart\"").unwrap();
        assert_eq!(parsed, LinkType::FinishToStart);
    }

    #[test]
    fn link_spec_without_suffix_keeps_defaults() {
        let spec = LinkSpec::from_str("rec:S1:abc-1").unwrap();
        assert_eq!(spec.reference, "rec:S1:abc-1");
        assert_eq!(spec.link_type, None);
        assert_eq!(spec.lag, 0);
    }

    #[test]
    fn link_spec_parses_type_and_signed_lag() {
        let spec = LinkSpec::from_str("abc-1@SS+3").unwrap();
        assert_eq!(spec.link_type, Some(LinkType::StartToStart));
        assert_eq!(spec.lag, 3);

        let spec = LinkSpec::from_str("abc-1@ff-2").unwrap();
        assert_eq!(spec.link_type, Some(LinkType::FinishToFinish));
        assert_eq!(spec.lag, -2);
    }

    #[test]
    fn link_spec_rejects_blank_reference_and_bad_lag() {
        assert!(matches!(
            LinkSpec::from_str("@FS"),
            Err(ParseLinkSpecError::EmptyReference(_))
        ));
        assert!(matches!(
            LinkSpec::from_str("a@FS+x"),
            Err(ParseLinkSpecError::Lag(_))
        ));
    }
}
