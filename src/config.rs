use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::domain::link::LinkType;
use crate::graph::BuildOptions;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Toml(toml::de::Error),
    Missing(PathBuf),
    InvalidValue { key: &'static str, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config '{}': {}", path.display(), source)
            }
            ConfigError::Toml(err) => write!(f, "invalid config TOML: {}", err),
            ConfigError::Missing(path) => {
                write!(f, "config file '{}' does not exist", path.display())
            }
            ConfigError::InvalidValue { key, message } => {
                write!(f, "invalid config value for '{}': {}", key, message)
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Toml(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}': expected compact or json", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub graph: BuildOptions,
    pub default_link_type: LinkType,
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    graph: RawGraph,
    #[serde(default)]
    links: RawLinks,
    #[serde(default)]
    logging: RawLogging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGraph {
    cross_schedule_links: Option<bool>,
    master_color: Option<String>,
    overlay_colors: Option<Vec<String>>,
    default_duration_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLinks {
    default_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogging {
    level: Option<String>,
    format: Option<String>,
}

impl RawConfig {
    fn overlay(&mut self, other: RawConfig) {
        let RawConfig {
            graph,
            links,
            logging,
        } = other;
        if graph.cross_schedule_links.is_some() {
            self.graph.cross_schedule_links = graph.cross_schedule_links;
        }
        if graph.master_color.is_some() {
            self.graph.master_color = graph.master_color;
        }
        if graph.overlay_colors.is_some() {
            self.graph.overlay_colors = graph.overlay_colors;
        }
        if graph.default_duration_days.is_some() {
            self.graph.default_duration_days = graph.default_duration_days;
        }
        if links.default_type.is_some() {
            self.links.default_type = links.default_type;
        }
        if logging.level.is_some() {
            self.logging.level = logging.level;
        }
        if logging.format.is_some() {
            self.logging.format = logging.format;
        }
    }
}

impl Config {
    /// The embedded defaults with no user file applied.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_toml("")
    }

    /// Loads `path` over the defaults. A missing file is only an error when
    /// the caller asked for it explicitly.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        if !path.exists() {
            if required {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            return Self::defaults();
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub(crate) fn from_toml(user: &str) -> Result<Self, ConfigError> {
        let mut merged: RawConfig = toml::from_str(DEFAULTS_TOML)?;
        merged.overlay(toml::from_str(user)?);
        Self::validate(merged)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        let master_color = raw.graph.master_color.unwrap_or_default();
        validate_color("graph.master_color", &master_color)?;
        let overlay_colors = raw.graph.overlay_colors.unwrap_or_default();
        if overlay_colors.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "graph.overlay_colors",
                message: "at least one color is required".to_string(),
            });
        }
        for color in &overlay_colors {
            validate_color("graph.overlay_colors", color)?;
        }
        let default_duration_days = raw.graph.default_duration_days.unwrap_or(1);
        if default_duration_days < 1 {
            return Err(ConfigError::InvalidValue {
                key: "graph.default_duration_days",
                message: format!("{} is not a positive number of days", default_duration_days),
            });
        }

        let default_link_type = LinkType::from_str(raw.links.default_type.as_deref().unwrap_or("FS"))
            .map_err(|err| ConfigError::InvalidValue {
                key: "links.default_type",
                message: err.to_string(),
            })?;
        let format = LogFormat::from_str(raw.logging.format.as_deref().unwrap_or("compact"))
            .map_err(|message| ConfigError::InvalidValue {
                key: "logging.format",
                message,
            })?;

        Ok(Self {
            graph: BuildOptions {
                cross_schedule_links: raw.graph.cross_schedule_links.unwrap_or(false),
                master_color,
                overlay_colors,
                default_duration_days,
            },
            default_link_type,
            logging: LoggingConfig {
                level: raw.logging.level.unwrap_or_else(|| "warn".to_string()),
                format,
            },
        })
    }
}

fn validate_color(key: &'static str, color: &str) -> Result<(), ConfigError> {
    let hex = color.strip_prefix('#').unwrap_or("");
    let valid = matches!(hex.len(), 3 | 6) && hex.chars().all(|ch| ch.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            message: format!("'{}' is not a #rgb or #rrggbb color", color),
        })
    }
}
