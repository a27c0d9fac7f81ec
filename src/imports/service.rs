use std::fs::File;
use std::io::{BufRead, BufReader};

use serde::Serialize;
use tracing::{debug, info};

use crate::db::{self, ImportStateRecord};
use crate::domain::activity::{Activity, ActivityPatch};
use crate::domain::dates::now_utc_rfc3339;
use crate::domain::node_id::{ActivityKey, ScheduleId};
use crate::store::{DocumentStore, SqliteStore};

use super::errors::ImportError;
use super::source::{normalize_path, source_key, SourceRecord};

pub struct ImportService<'a> {
    store: &'a mut SqliteStore,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub schedule_id: String,
    pub source_ref: String,
    pub status: String,
    pub processed_count: u64,
    pub imported_count: u64,
    pub updated_count: u64,
    pub skipped_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub dry_run: bool,
    pub last_run_at: String,
}

#[derive(Debug, Clone, Default)]
struct ImportRun {
    processed_count: u64,
    imported_count: u64,
    updated_count: u64,
    skipped_count: u64,
    error_count: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
}

impl<'a> ImportService<'a> {
    pub fn new(store: &'a mut SqliteStore) -> Self {
        Self { store }
    }

    /// Reads one activity per line into `schedule`. Records that already exist
    /// are updated in place; identical ones are skipped. Bad lines are counted
    /// and the run continues.
    pub fn import_jsonl(
        &mut self,
        file: &str,
        schedule: &ScheduleId,
        dry_run: bool,
    ) -> Result<ImportSummary, ImportError> {
        if self.store.schedule(schedule)?.is_none() {
            return Err(ImportError::UnknownSchedule(schedule.to_string()));
        }
        let source_ref = normalize_path(file)?;
        let source_key = source_key(schedule, &source_ref);
        let reader = BufReader::new(File::open(&source_ref)?);
        let mut run = ImportRun::default();

        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            let text = line?;
            if text.trim().is_empty() {
                continue;
            }
            run.processed_count += 1;

            let record: SourceRecord = match serde_json::from_str(&text) {
                Ok(record) => record,
                Err(err) => {
                    run.error_count += 1;
                    run.last_error = Some(format!("line {}: invalid JSON: {}", line_number, err));
                    continue;
                }
            };

            match self.import_record(schedule, record, dry_run) {
                Ok(Outcome::Created) => run.imported_count += 1,
                Ok(Outcome::Updated) => run.updated_count += 1,
                Ok(Outcome::Unchanged) => run.skipped_count += 1,
                Err(ImportError::InvalidRecord(message)) => {
                    debug!(line = line_number, message = %message, "skipping invalid record");
                    run.error_count += 1;
                    run.last_error = Some(format!("line {}: {}", line_number, message));
                }
                Err(err) => {
                    run.last_error = Some(format!("line {}: {}", line_number, err));
                    return self.finish_run(
                        schedule,
                        source_ref,
                        source_key,
                        run,
                        "failed",
                        dry_run,
                        Err(err),
                    );
                }
            }
        }

        let status = if dry_run {
            "dry_run"
        } else if run.error_count > 0 {
            "partial"
        } else {
            "completed"
        };
        self.finish_run(schedule, source_ref, source_key, run, status, dry_run, Ok(()))
    }

    fn import_record(
        &mut self,
        schedule: &ScheduleId,
        record: SourceRecord,
        dry_run: bool,
    ) -> Result<Outcome, ImportError> {
        let incoming = record.into_activity(schedule)?;
        let existing = match &incoming.key {
            ActivityKey::Durable(record_id) => self.store.get_activity(schedule, record_id)?,
            ActivityKey::Provisional(_) => None,
        };

        let Some(existing) = existing else {
            if !dry_run {
                self.store.create_activity(&incoming)?;
            }
            return Ok(Outcome::Created);
        };

        let patch = replacement_patch(&incoming, &existing);
        let mut merged = existing.clone();
        merged.apply_patch(&patch);
        if merged == existing {
            return Ok(Outcome::Unchanged);
        }
        if !dry_run {
            self.store
                .update_activity(schedule, existing.key.as_str(), &patch)?;
        }
        Ok(Outcome::Updated)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_run(
        &self,
        schedule: &ScheduleId,
        source_ref: String,
        source_key: String,
        run: ImportRun,
        status: &str,
        dry_run: bool,
        result: Result<(), ImportError>,
    ) -> Result<ImportSummary, ImportError> {
        let last_run_at = now_utc_rfc3339();
        db::upsert_import_state(
            self.store.connection(),
            &ImportStateRecord {
                source_key,
                schedule_id: schedule.to_string(),
                source_ref: source_ref.clone(),
                last_run_at: last_run_at.clone(),
                last_status: status.to_string(),
                processed_count: run.processed_count as i64,
                imported_count: (run.imported_count + run.updated_count) as i64,
                skipped_count: run.skipped_count as i64,
                error_count: run.error_count as i64,
                last_error: run.last_error.clone(),
            },
        )?;

        result?;
        info!(
            schedule = %schedule,
            source = %source_ref,
            status,
            imported = run.imported_count,
            updated = run.updated_count,
            skipped = run.skipped_count,
            errors = run.error_count,
            "import finished"
        );
        Ok(ImportSummary {
            schedule_id: schedule.to_string(),
            source_ref,
            status: status.to_string(),
            processed_count: run.processed_count,
            imported_count: run.imported_count,
            updated_count: run.updated_count,
            skipped_count: run.skipped_count,
            error_count: run.error_count,
            last_error: run.last_error,
            dry_run,
            last_run_at,
        })
    }
}

/// The source record is authoritative for the fields it carries.
fn replacement_patch(incoming: &Activity, existing: &Activity) -> ActivityPatch {
    let predecessors_raw = match (&incoming.predecessors_raw, &existing.predecessors_raw) {
        (Some(raw), _) => Some(raw.clone()),
        (None, Some(_)) => Some("[]".to_string()),
        (None, None) => None,
    };
    ActivityPatch {
        display_name: Some(incoming.display_name.clone()),
        linked_document_id: Some(incoming.linked_document_id.clone().unwrap_or_default()),
        parent_key: Some(incoming.parent_key.clone().unwrap_or_default()),
        start_date: incoming.start_date.clone(),
        end_date: incoming.end_date.clone(),
        duration: incoming.duration,
        predecessors_raw,
    }
}
