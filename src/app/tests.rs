use super::{App, AppError, NewActivity};
use crate::check::CheckKind;
use crate::config::Config;
use crate::domain::activity::{Activity, ScheduleRole};
use crate::domain::link::LinkType;
use crate::graph::GraphEdge;
use crate::session::SessionError;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn unique_workspace() -> PathBuf {
    let root = std::env::temp_dir().join(format!("plangraph-app-test-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&root).expect("temp workspace should be creatable");
    root
}

fn open_app(root: &Path) -> App {
    let db_path = root.join(".plangraph/cache/store.sqlite");
    App::open(
        db_path.to_str().expect("utf8 path"),
        &root.join(".plangraph"),
        Config::defaults().expect("defaults should load"),
    )
    .expect("app should open")
}

fn fields(name: &str, start: Option<&str>) -> NewActivity {
    NewActivity {
        display_name: name.to_string(),
        start_date: start.map(str::to_string),
        ..NewActivity::default()
    }
}

fn node(activity: &Activity) -> String {
    activity.node_id().to_string()
}

fn master_app(root: &Path) -> App {
    let app = open_app(root);
    app.add_schedule("S1", ScheduleRole::Master)
        .expect("master schedule should be added");
    app
}

#[test]
fn schedules_are_listed_with_activity_and_draft_counts() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    app.add_schedule("O1", ScheduleRole::Overlay)
        .expect("overlay should be added");
    assert!(matches!(
        app.add_schedule("S1", ScheduleRole::Master),
        Err(AppError::InvalidArgument(_))
    ));

    app.create_activity("S1", fields("Survey", Some("2024-01-01")), false)
        .expect("stored activity should be created");
    let draft = app
        .create_activity("S1", fields("Grade", None), true)
        .expect("draft should be created");
    assert!(draft.key.is_provisional());
    assert!(app.drafts_path().exists());

    let listed = app.list_schedules().expect("schedules should list");
    let master = listed
        .iter()
        .find(|view| view.id.as_str() == "S1")
        .expect("master should be listed");
    assert_eq!(master.activities, 1);
    assert_eq!(master.drafts, 1);
    let overlay = listed
        .iter()
        .find(|view| view.id.as_str() == "O1")
        .expect("overlay should be listed");
    assert_eq!(overlay.role, ScheduleRole::Overlay);
    assert_eq!(overlay.activities, 0);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn links_are_added_shown_and_removed() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let a = app
        .create_activity("S1", fields("Survey", Some("2024-01-01")), false)
        .expect("a should be created");
    let b = app
        .create_activity("S1", fields("Grade", Some("2024-01-05")), false)
        .expect("b should be created");

    let view = app
        .add_link(&node(&a), &node(&b), Some("ss"), 2)
        .expect("link should be added");
    assert_eq!(view.report.written, vec![b.node_id()]);
    assert!(view.message.is_none());

    let detail = app.show(&node(&b)).expect("b should show");
    assert_eq!(detail.predecessors.len(), 1);
    assert_eq!(detail.predecessors[0].resolved, Some(a.node_id()));
    assert_eq!(detail.predecessors[0].link_type, LinkType::StartToStart);
    assert_eq!(detail.predecessors[0].lag, 2);
    let detail = app.show(&node(&a)).expect("a should show");
    assert_eq!(detail.successors.len(), 1);

    let graph = app.graph(&[], false).expect("graph should build");
    assert_eq!(graph.edges.len(), 1);
    let edge_id = GraphEdge::edge_id(&a.node_id(), &b.node_id());
    app.remove_link(&edge_id).expect("link should be removed");
    let graph = app.graph(&[], false).expect("graph should build");
    assert!(graph.edges.is_empty());
    assert!(matches!(
        app.remove_link(&edge_id),
        Err(AppError::Session(SessionError::UnknownEdge(_)))
    ));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn predecessor_and_successor_edits_use_link_specs() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let a = app
        .create_activity("S1", fields("Survey", Some("2024-01-01")), false)
        .expect("a should be created");
    let b = app
        .create_activity("S1", fields("Grade", Some("2024-01-05")), false)
        .expect("b should be created");
    let c = app
        .create_activity("S1", fields("Pave", Some("2024-01-09")), false)
        .expect("c should be created");

    app.set_predecessors(&node(&b), &[format!("{}@FF-1", a.key.as_str())])
        .expect("predecessors should be saved");
    let detail = app.show(&node(&b)).expect("b should show");
    assert_eq!(detail.predecessors[0].link_type, LinkType::FinishToFinish);
    assert_eq!(detail.predecessors[0].lag, -1);

    app.set_successors(&node(&b), &[c.key.as_str().to_string()])
        .expect("successors should be saved");
    let detail = app.show(&node(&c)).expect("c should show");
    assert_eq!(detail.predecessors.len(), 1);
    assert_eq!(detail.predecessors[0].resolved, Some(b.node_id()));
    assert_eq!(detail.predecessors[0].link_type, LinkType::FinishToStart);

    assert!(matches!(
        app.set_predecessors(&node(&b), &["@SS".to_string()]),
        Err(AppError::LinkSpec(_))
    ));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn moving_an_activity_keeps_its_duration() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let mut seed = fields("Survey", Some("2024-01-01"));
    seed.duration = Some(3);
    let a = app
        .create_activity("S1", seed, false)
        .expect("a should be created");
    assert_eq!(a.end_date.as_deref(), Some("2024-01-03"));

    app.move_activity(&node(&a), "2024-02-01", None)
        .expect("move should succeed");
    let detail = app.show(&node(&a)).expect("a should show");
    assert_eq!(detail.activity.start_date.as_deref(), Some("2024-02-01"));
    assert_eq!(detail.activity.end_date.as_deref(), Some("2024-02-03"));

    assert!(matches!(
        app.move_activity(&node(&a), "next week", None),
        Err(AppError::Session(SessionError::InvalidDate(_)))
    ));
    assert!(matches!(
        app.create_activity("S1", fields("Bad", Some("soon")), false),
        Err(AppError::Session(SessionError::InvalidDate(_)))
    ));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn removing_an_activity_strips_successor_references() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let a = app
        .create_activity("S1", fields("Survey", Some("2024-01-01")), false)
        .expect("a should be created");
    let mut seed = fields("Grade", Some("2024-01-05"));
    seed.predecessors = vec![a.key.as_str().to_string()];
    let b = app
        .create_activity("S1", seed, false)
        .expect("b should be created");

    let view = app.remove_activity(&node(&a)).expect("remove should succeed");
    assert!(view.report.deleted.contains(&a.node_id()));
    let detail = app.show(&node(&b)).expect("b should show");
    assert!(detail.predecessors.is_empty());
    let graph = app.graph(&[], false).expect("graph should build");
    assert_eq!(graph.nodes.len(), 1);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn promoting_drafts_rewrites_stored_references() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let draft = app
        .create_activity("S1", fields("Survey", Some("2024-01-01")), true)
        .expect("draft should be created");
    let mut seed = fields("Grade", Some("2024-01-05"));
    seed.predecessors = vec![draft.key.as_str().to_string()];
    let b = app
        .create_activity("S1", seed, false)
        .expect("b should be created");

    let reports = app.promote_drafts().expect("promotion should succeed");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].provisional, draft.node_id());
    assert!(!reports[0].durable.is_provisional());
    assert!(!app.drafts_path().exists());

    let detail = app.show(&node(&b)).expect("b should show");
    assert_eq!(
        detail.predecessors[0].reference,
        reports[0].durable.key.as_str()
    );
    assert_eq!(detail.predecessors[0].resolved, Some(reports[0].durable.clone()));
    assert!(app.promote_drafts().expect("nothing to promote").is_empty());

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn cloned_overlays_resolve_copied_predecessors() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let a = app
        .create_activity("S1", fields("Survey", Some("2024-01-01")), false)
        .expect("a should be created");
    let mut seed = fields("Grade", Some("2024-01-05"));
    seed.predecessors = vec![a.key.as_str().to_string()];
    app.create_activity("S1", seed, false)
        .expect("b should be created");
    let mut seed = fields("Pave", Some("2024-01-08"));
    seed.linked_document_id = Some("DOC-C".to_string());
    let c = app
        .create_activity("S1", seed, false)
        .expect("c should be created");
    let mut seed = fields("Stripe", Some("2024-01-10"));
    seed.predecessors = vec![c.key.as_str().to_string()];
    app.create_activity("S1", seed, false)
        .expect("d should be created");

    let summary = app.clone_schedule("S1", "O1").expect("clone should succeed");
    assert_eq!(summary.copied, 4);
    assert!(matches!(
        app.clone_schedule("S1", "O1"),
        Err(AppError::InvalidArgument(_))
    ));

    let overlay = app
        .graph(&["O1".to_string()], false)
        .expect("overlay graph should build");
    assert_eq!(overlay.nodes.len(), 4);
    assert_eq!(overlay.edges.len(), 2);
    assert!(overlay.dropped.is_empty());
    assert!(overlay
        .nodes
        .iter()
        .all(|node| node.role == ScheduleRole::Overlay));
    let pave = overlay
        .nodes
        .iter()
        .find(|node| node.display_name == "Pave")
        .expect("pave should be copied");
    assert_eq!(pave.linked_document_id.as_deref(), Some("DOC-C"));
    assert!(overlay
        .edges
        .iter()
        .any(|edge| edge.source == pave.id));

    let both = app.graph(&[], false).expect("full graph should build");
    assert_eq!(both.nodes.len(), 8);
    assert_eq!(both.edges.len(), 4);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn merge_applies_propagated_dates_to_the_master() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let a = app
        .create_activity("S1", fields("Survey", Some("2024-01-01")), false)
        .expect("a should be created");

    let file = root.join("propagated.json");
    std::fs::write(
        &file,
        format!(
            "[{{\"recordId\":\"{}\",\"startDate\":\"2024-03-01\",\"endDate\":\"2024-03-04\"}},{{\"recordId\":\"ghost\"}}]",
            a.key.as_str()
        ),
    )
    .expect("propagation file should be writable");

    let merged = app.merge(&file, None).expect("merge should succeed");
    assert_eq!(merged.schedule.as_str(), "S1");
    assert_eq!(merged.summary.matched, 1);
    assert_eq!(merged.summary.unknown, vec!["ghost".to_string()]);
    assert_eq!(merged.commit.report.written, vec![a.node_id()]);

    let detail = app.show(&node(&a)).expect("a should show");
    assert_eq!(detail.activity.start_date.as_deref(), Some("2024-03-01"));
    assert_eq!(detail.activity.end_date.as_deref(), Some("2024-03-04"));

    std::fs::write(&file, "not json").expect("file should be writable");
    assert!(matches!(
        app.merge(&file, Some("S1")),
        Err(AppError::InvalidArgument(_))
    ));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn merge_needs_a_schedule_without_a_single_master() {
    let root = unique_workspace();
    let mut app = open_app(&root);
    app.add_schedule("O1", ScheduleRole::Overlay)
        .expect("overlay should be added");
    let file = root.join("propagated.json");
    std::fs::write(&file, "[]").expect("propagation file should be writable");

    assert!(matches!(
        app.merge(&file, None),
        Err(AppError::InvalidArgument(_))
    ));
    let merged = app
        .merge(&file, Some("O1"))
        .expect("explicit schedule should merge");
    assert_eq!(merged.summary.matched, 0);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn check_and_import_run_against_the_store() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    let file = root.join("activities.jsonl");
    std::fs::write(
        &file,
        concat!(
            "{\"name\":\"r1\",\"activity_name\":\"Survey\",\"start_date\":\"2024-01-01\"}\n",
            "{\"name\":\"r2\",\"activity_name\":\"Grade\",\"start_date\":\"2024-01-05\",\"dependencies_json\":\"[{\\\"predecessor\\\":\\\"ghost\\\"}]\"}\n",
        ),
    )
    .expect("jsonl should be writable");

    let summary = app
        .import_jsonl(file.to_str().expect("utf8 path"), "S1", false)
        .expect("import should succeed");
    assert_eq!(summary.imported_count, 2);

    let report = app.check().expect("check should run");
    assert_eq!(report.activities_scanned, 2);
    assert_eq!(report.count(CheckKind::UnresolvedReference), 1);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn bad_input_maps_to_app_errors() {
    let root = unique_workspace();
    let mut app = master_app(&root);
    assert!(matches!(app.show("garbage"), Err(AppError::NodeId(_))));
    assert!(matches!(
        app.create_activity("ZZ", fields("Survey", None), false),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        app.create_activity("S1", fields("  ", None), false),
        Err(AppError::InvalidArgument(_))
    ));
    assert!(matches!(
        app.graph(&["ZZ".to_string()], false),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        app.show("rec:S1:missing"),
        Err(AppError::Session(SessionError::UnknownNode(_)))
    ));
    let err = app.show("rec:S1:missing").expect_err("missing node should fail");
    assert!(err.to_string().contains("rec:S1:missing"));

    let _ = std::fs::remove_dir_all(root);
}
