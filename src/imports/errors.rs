use std::error::Error;
use std::fmt;

use crate::store::StoreError;

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Db(rusqlite::Error),
    Store(StoreError),
    UnknownSchedule(String),
    InvalidRecord(String),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "I/O error: {}", err),
            ImportError::Db(err) => write!(f, "database error: {}", err),
            ImportError::Store(err) => write!(f, "store error: {}", err),
            ImportError::UnknownSchedule(id) => write!(
                f,
                "unknown schedule '{}'; add it with `plangraph schedule add`",
                id
            ),
            ImportError::InvalidRecord(message) => write!(f, "invalid source record: {}", message),
        }
    }
}

impl Error for ImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Db(err) => Some(err),
            ImportError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(value: std::io::Error) -> Self {
        ImportError::Io(value)
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(value: rusqlite::Error) -> Self {
        ImportError::Db(value)
    }
}

impl From<StoreError> for ImportError {
    fn from(value: StoreError) -> Self {
        ImportError::Store(value)
    }
}
