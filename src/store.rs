use std::error::Error;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rusqlite::Connection;

use crate::db::{self, ActivityRecord, ActivityUpdate, InsertActivity};
use crate::domain::activity::{Activity, ActivityPatch, Schedule, ScheduleRole};
use crate::domain::node_id::{ActivityKey, ScheduleId};
use crate::record_id::generate_record_id;

/// The persistence collaborator. Writes are keyed by `(schedule, recordId)`;
/// `create_activity` assigns the durable record id.
pub trait DocumentStore {
    fn list_activities(&self, schedule: Option<&ScheduleId>) -> Result<Vec<Activity>, StoreError>;

    fn get_activity(
        &self,
        schedule: &ScheduleId,
        record_id: &str,
    ) -> Result<Option<Activity>, StoreError>;

    fn create_activity(&mut self, activity: &Activity) -> Result<String, StoreError>;

    fn update_activity(
        &mut self,
        schedule: &ScheduleId,
        record_id: &str,
        patch: &ActivityPatch,
    ) -> Result<(), StoreError>;

    fn delete_activity(&mut self, schedule: &ScheduleId, record_id: &str)
        -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Db(rusqlite::Error),
    Io(std::io::Error),
    UnknownSchedule(String),
    NotFound { schedule: String, record_id: String },
    Rejected(String),
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Db(err) => write!(f, "database error: {}", err),
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
            StoreError::UnknownSchedule(id) => write!(f, "unknown schedule '{}'", id),
            StoreError::NotFound {
                schedule,
                record_id,
            } => write!(f, "activity '{}' not found in schedule '{}'", record_id, schedule),
            StoreError::Rejected(message) => write!(f, "write rejected: {}", message),
            StoreError::Corrupt(message) => write!(f, "corrupt record: {}", message),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Db(err) => Some(err),
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Db(value)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            conn: db::open_connection(db_path)?,
        })
    }

    pub fn add_schedule(&self, schedule: &Schedule) -> Result<bool, StoreError> {
        Ok(db::insert_schedule(
            &self.conn,
            schedule.id.as_str(),
            schedule.role.as_str(),
        )?)
    }

    pub fn schedule(&self, id: &ScheduleId) -> Result<Option<Schedule>, StoreError> {
        db::get_schedule(&self.conn, id.as_str())?
            .map(|record| schedule_from_record(&record.id, &record.role))
            .transpose()
    }

    pub fn schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        db::list_schedules(&self.conn)?
            .into_iter()
            .map(|record| schedule_from_record(&record.id, &record.role))
            .collect()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn require_schedule(&self, id: &ScheduleId) -> Result<(), StoreError> {
        match db::get_schedule(&self.conn, id.as_str())? {
            Some(_) => Ok(()),
            None => Err(StoreError::UnknownSchedule(id.to_string())),
        }
    }
}

impl DocumentStore for SqliteStore {
    fn list_activities(&self, schedule: Option<&ScheduleId>) -> Result<Vec<Activity>, StoreError> {
        db::list_activities(&self.conn, schedule.map(ScheduleId::as_str))?
            .into_iter()
            .map(activity_from_record)
            .collect()
    }

    fn get_activity(
        &self,
        schedule: &ScheduleId,
        record_id: &str,
    ) -> Result<Option<Activity>, StoreError> {
        db::get_activity(&self.conn, schedule.as_str(), record_id)?
            .map(activity_from_record)
            .transpose()
    }

    fn create_activity(&mut self, activity: &Activity) -> Result<String, StoreError> {
        self.require_schedule(&activity.schedule_id)?;
        let schedule = activity.schedule_id.as_str();
        let record_id = match &activity.key {
            ActivityKey::Durable(record_id) => record_id.clone(),
            ActivityKey::Provisional(_) => generate_record_id(&activity.schedule_id, |candidate| {
                db::activity_exists(&self.conn, schedule, candidate).unwrap_or(true)
            }),
        };
        if db::activity_exists(&self.conn, schedule, &record_id)? {
            return Err(StoreError::Rejected(format!(
                "record id '{}' already exists in schedule '{}'",
                record_id, schedule
            )));
        }
        db::insert_activity(
            &self.conn,
            &InsertActivity {
                schedule_id: schedule,
                record_id: &record_id,
                display_name: &activity.display_name,
                linked_document_id: activity.linked_document_id.as_deref(),
                parent_key: activity.parent_key.as_deref(),
                start_date: activity.start_date.as_deref(),
                end_date: activity.end_date.as_deref(),
                duration: activity.duration,
                predecessors_json: activity.predecessors_raw.as_deref(),
            },
        )?;
        Ok(record_id)
    }

    fn update_activity(
        &mut self,
        schedule: &ScheduleId,
        record_id: &str,
        patch: &ActivityPatch,
    ) -> Result<(), StoreError> {
        let update = ActivityUpdate {
            display_name: patch.display_name.as_deref(),
            linked_document_id: clearable(patch.linked_document_id.as_deref()),
            parent_key: clearable(patch.parent_key.as_deref()),
            start_date: patch.start_date.as_deref(),
            end_date: patch.end_date.as_deref(),
            duration: patch.duration,
            predecessors_json: patch.predecessors_raw.as_deref(),
        };
        if db::update_activity(&self.conn, schedule.as_str(), record_id, &update)? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                schedule: schedule.to_string(),
                record_id: record_id.to_string(),
            })
        }
    }

    fn delete_activity(
        &mut self,
        schedule: &ScheduleId,
        record_id: &str,
    ) -> Result<(), StoreError> {
        if db::delete_activity(&self.conn, schedule.as_str(), record_id)? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                schedule: schedule.to_string(),
                record_id: record_id.to_string(),
            })
        }
    }
}

fn clearable(value: Option<&str>) -> Option<Option<&str>> {
    value.map(|raw| Some(raw.trim()).filter(|raw| !raw.is_empty()))
}

fn schedule_from_record(id: &str, role: &str) -> Result<Schedule, StoreError> {
    let id = ScheduleId::parse(id).map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let role = ScheduleRole::from_str(role).map_err(|err| StoreError::Corrupt(err.to_string()))?;
    Ok(Schedule { id, role })
}

fn activity_from_record(record: ActivityRecord) -> Result<Activity, StoreError> {
    let schedule_id = ScheduleId::parse(&record.schedule_id)
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let mut activity = Activity::new(
        ActivityKey::Durable(record.record_id),
        schedule_id,
        record.display_name,
    );
    activity.linked_document_id = record.linked_document_id;
    activity.parent_key = record.parent_key;
    activity.start_date = record.start_date;
    activity.end_date = record.end_date;
    activity.duration = record.duration;
    activity.predecessors_raw = record.predecessors_json;
    Ok(activity)
}
