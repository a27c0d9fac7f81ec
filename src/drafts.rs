use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::activity::Activity;
use crate::domain::node_id::NodeId;

const DRAFTS_SCHEMA_VERSION: i64 = 1;
const DRAFTS_FILE: &str = "drafts.json";

#[derive(Debug)]
pub enum DraftError {
    Io(std::io::Error),
    Json(serde_json::Error),
    UnsupportedVersion(i64),
    NotProvisional(NodeId),
}

impl fmt::Display for DraftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftError::Io(err) => write!(f, "I/O error: {}", err),
            DraftError::Json(err) => write!(f, "JSON error: {}", err),
            DraftError::UnsupportedVersion(version) => {
                write!(f, "unsupported drafts file version {}", version)
            }
            DraftError::NotProvisional(node) => {
                write!(f, "'{}' is not a draft activity", node)
            }
        }
    }
}

impl Error for DraftError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DraftError::Io(err) => Some(err),
            DraftError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DraftError {
    fn from(value: std::io::Error) -> Self {
        DraftError::Io(value)
    }
}

impl From<serde_json::Error> for DraftError {
    fn from(value: serde_json::Error) -> Self {
        DraftError::Json(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftFile {
    schema_version: i64,
    activities: Vec<Activity>,
}

/// Provisional activities kept on disk between runs until they are promoted.
#[derive(Debug, Clone)]
pub struct DraftStore {
    path: PathBuf,
}

impl DraftStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(DRAFTS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means no drafts.
    pub fn load(&self) -> Result<Vec<Activity>, DraftError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let file: DraftFile = serde_json::from_str(&raw)?;
        if file.schema_version != DRAFTS_SCHEMA_VERSION {
            return Err(DraftError::UnsupportedVersion(file.schema_version));
        }
        Ok(file.activities)
    }

    /// Replaces the file with `activities`, which must all be provisional.
    /// An empty list removes the file.
    pub fn save(&self, activities: &[Activity]) -> Result<(), DraftError> {
        if let Some(durable) = activities.iter().find(|activity| !activity.key.is_provisional()) {
            return Err(DraftError::NotProvisional(durable.node_id()));
        }
        if activities.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = DraftFile {
            schema_version: DRAFTS_SCHEMA_VERSION,
            activities: activities.to_vec(),
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
