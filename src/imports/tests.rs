use std::path::PathBuf;

use uuid::Uuid;

use crate::codec;
use crate::db;
use crate::domain::activity::Schedule;
use crate::domain::link::{LinkType, PredecessorLink};
use crate::domain::node_id::{ActivityKey, ScheduleId};
use crate::store::{DocumentStore, SqliteStore};

use super::errors::ImportError;
use super::service::ImportService;
use super::source::{source_key, SourceRecord};

fn unique_workspace() -> PathBuf {
    let root = std::env::temp_dir().join(format!("plangraph-import-test-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&root).expect("workspace should be creatable");
    root
}

fn schedule() -> ScheduleId {
    ScheduleId::parse("BASE").expect("schedule id should parse")
}

fn open_store(root: &std::path::Path) -> SqliteStore {
    let db_path = root.join(".plangraph/cache/store.sqlite");
    let store = SqliteStore::open(db_path.to_str().expect("utf8 path")).expect("store should open");
    store
        .add_schedule(&Schedule::master(schedule()))
        .expect("schedule should be added");
    store
}

#[test]
fn jsonl_import_accepts_source_field_names() {
    let root = unique_workspace();
    let mut store = open_store(&root);
    let input = root.join("activities.jsonl");
    std::fs::write(
        &input,
        concat!(
            "{\"name\":\"A-1\",\"task_name\":\"Survey\",\"task\":\"TASK-9\",",
            "\"baseline_start_date\":\"2024-01-01\",\"duration\":\"2\"}\n",
            "\n",
            "{\"name\":\"A-2\",\"activity_name\":\"Grade\",\"start_date\":\"2024-01-03 08:00:00\",",
            "\"dependencies_json\":\"[{\\\"predecessor\\\":\\\"A-1\\\",\\\"type\\\":\\\"SS\\\",\\\"lag\\\":1}]\",",
            "\"parent_task\":\"A-1\"}\n",
            "{\"name\":\"A-3\",\"activity_name\":\"Pave\",\"start_date\":\"2024-01-06\",",
            "\"dependencies_json\":[{\"predecessor\":\"A-2\"}]}\n"
        ),
    )
    .expect("jsonl should be writable");

    let summary = ImportService::new(&mut store)
        .import_jsonl(input.to_str().expect("utf8 path"), &schedule(), false)
        .expect("import should succeed");
    assert_eq!(summary.processed_count, 3);
    assert_eq!(summary.imported_count, 3);
    assert_eq!(summary.error_count, 0);
    assert_eq!(summary.status, "completed");

    let survey = store
        .get_activity(&schedule(), "A-1")
        .expect("get should succeed")
        .expect("A-1 should exist");
    assert_eq!(survey.display_name, "Survey");
    assert_eq!(survey.linked_document_id.as_deref(), Some("TASK-9"));
    assert_eq!(survey.duration, Some(2));

    let grade = store
        .get_activity(&schedule(), "A-2")
        .expect("get should succeed")
        .expect("A-2 should exist");
    assert_eq!(grade.start_date.as_deref(), Some("2024-01-03"));
    assert_eq!(grade.parent_key.as_deref(), Some("A-1"));
    assert_eq!(
        grade.predecessors(),
        vec![PredecessorLink::new("A-1", LinkType::StartToStart, 1)]
    );

    let pave = store
        .get_activity(&schedule(), "A-3")
        .expect("get should succeed")
        .expect("A-3 should exist");
    assert_eq!(
        pave.predecessors_raw.as_deref(),
        Some(codec::encode(&[PredecessorLink::finish_to_start("A-2")]).as_str())
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn reimport_skips_unchanged_and_updates_changed_records() {
    let root = unique_workspace();
    let mut store = open_store(&root);
    let input = root.join("activities.jsonl");
    let path = input.to_str().expect("utf8 path").to_string();
    std::fs::write(
        &input,
        "{\"name\":\"A-1\",\"task_name\":\"Survey\",\"start_date\":\"2024-01-01\"}\n",
    )
    .expect("jsonl should be writable");
    ImportService::new(&mut store)
        .import_jsonl(&path, &schedule(), false)
        .expect("first import should succeed");

    let summary = ImportService::new(&mut store)
        .import_jsonl(&path, &schedule(), false)
        .expect("second import should succeed");
    assert_eq!(summary.imported_count, 0);
    assert_eq!(summary.skipped_count, 1);

    std::fs::write(
        &input,
        "{\"name\":\"A-1\",\"task_name\":\"Site survey\",\"start_date\":\"2024-01-02\"}\n",
    )
    .expect("jsonl should be writable");
    let summary = ImportService::new(&mut store)
        .import_jsonl(&path, &schedule(), false)
        .expect("third import should succeed");
    assert_eq!(summary.updated_count, 1);
    let survey = store
        .get_activity(&schedule(), "A-1")
        .expect("get should succeed")
        .expect("A-1 should exist");
    assert_eq!(survey.display_name, "Site survey");
    assert_eq!(survey.start_date.as_deref(), Some("2024-01-02"));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn bad_lines_are_counted_and_dry_run_writes_nothing() {
    let root = unique_workspace();
    let mut store = open_store(&root);
    let input = root.join("activities.jsonl");
    let path = input.to_str().expect("utf8 path").to_string();
    std::fs::write(
        &input,
        concat!(
            "not json\n",
            "{\"start_date\":\"2024-01-01\"}\n",
            "{\"name\":\"A-1\",\"task_name\":\"Survey\",\"duration\":-3}\n",
            "{\"task_name\":\"Unnamed\",\"start_date\":\"2024-01-01\"}\n"
        ),
    )
    .expect("jsonl should be writable");

    let summary = ImportService::new(&mut store)
        .import_jsonl(&path, &schedule(), true)
        .expect("dry run should succeed");
    assert_eq!(summary.status, "dry_run");
    assert_eq!(summary.processed_count, 4);
    assert_eq!(summary.error_count, 3);
    assert_eq!(summary.imported_count, 1);
    assert!(summary
        .last_error
        .as_deref()
        .is_some_and(|message| message.starts_with("line 3:")));
    assert!(store
        .list_activities(Some(&schedule()))
        .expect("list should succeed")
        .is_empty());

    let summary = ImportService::new(&mut store)
        .import_jsonl(&path, &schedule(), false)
        .expect("import should succeed");
    assert_eq!(summary.status, "partial");
    let stored = store
        .list_activities(Some(&schedule()))
        .expect("list should succeed");
    assert_eq!(stored.len(), 1);
    assert!(stored[0].key.as_str().starts_with("base-"));

    let state = db::get_import_state(
        store.connection(),
        &source_key(&schedule(), &summary.source_ref),
    )
    .expect("state should load")
    .expect("state should exist");
    assert_eq!(state.last_status, "partial");
    assert_eq!(state.error_count, 3);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn unknown_schedule_is_rejected_before_reading() {
    let root = unique_workspace();
    let mut store = open_store(&root);
    let other = ScheduleId::parse("OPS").expect("schedule id should parse");
    let err = ImportService::new(&mut store)
        .import_jsonl("missing.jsonl", &other, false)
        .expect_err("unknown schedule should fail");
    assert!(matches!(err, ImportError::UnknownSchedule(_)));
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn records_without_ids_become_store_assigned() {
    let record: SourceRecord =
        serde_json::from_str("{\"task\":\"TASK-1\",\"duration\":3.0}").expect("record should parse");
    let activity = record
        .into_activity(&schedule())
        .expect("record should convert");
    assert!(activity.key.is_provisional());
    assert_eq!(activity.display_name, "TASK-1");
    assert_eq!(activity.duration, Some(3));
    assert!(matches!(activity.key, ActivityKey::Provisional(_)));
}

#[test]
fn out_of_range_durations_are_invalid_records() {
    let record: SourceRecord = serde_json::from_str(
        "{\"name\":\"A-1\",\"task_name\":\"Survey\",\"duration\":200000000000000}",
    )
    .expect("record should parse");
    let err = record
        .into_activity(&schedule())
        .expect_err("oversized duration should be rejected");
    assert!(matches!(err, ImportError::InvalidRecord(message) if message.contains("200000000000000")));
}
