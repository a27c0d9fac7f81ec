use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use uuid::Uuid;

fn unique_workspace(prefix: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{prefix}-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&path).expect("workspace should be creatable");
    path
}

fn run_plangraph(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plangraph"))
        .env_remove("PLANGRAPH_CONFIG")
        .env_remove("PLANGRAPH_LOG")
        .env("NO_COLOR", "1")
        .arg("--repo-root")
        .arg(root)
        .arg("--db")
        .arg(root.join(".plangraph/cache/store.sqlite"))
        .args(args)
        .output()
        .expect("plangraph command should run")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success but failed.\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_failure(output: &Output) {
    assert!(
        !output.status.success(),
        "expected failure but command succeeded.\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn parse_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be valid json")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Creates an activity and returns its node id.
fn create(root: &Path, args: &[&str]) -> String {
    let mut full = vec!["new"];
    full.extend_from_slice(args);
    full.push("--json");
    let output = run_plangraph(root, &full);
    assert_success(&output);
    let json = parse_json(&output);
    let tag = if json["key"]["kind"] == "provisional" {
        "new"
    } else {
        "rec"
    };
    format!(
        "{}:{}:{}",
        tag,
        json["schedule_id"].as_str().expect("schedule id should be a string"),
        json["key"]["key"].as_str().expect("key should be a string")
    )
}

fn record_id(node: &str) -> &str {
    node.splitn(3, ':').nth(2).expect("node id should have a key")
}

#[test]
fn graph_reflects_links_added_and_removed_from_the_cli() {
    let root = unique_workspace("plangraph-cli-graph");
    assert_success(&run_plangraph(&root, &["schedule", "add", "S1", "--master"]));

    let survey = create(&root, &["S1", "Survey", "--start", "2024-01-01", "--duration", "2"]);
    let grade = create(
        &root,
        &["S1", "Grade", "--start", "2024-01-03", "-p", record_id(&survey)],
    );
    let pave = create(&root, &["S1", "Pave", "--start", "2024-01-08"]);

    let graph = parse_json(&run_plangraph(&root, &["graph", "--json"]));
    assert_eq!(graph["data"].as_array().map(Vec::len), Some(3));
    let links = graph["links"].as_array().expect("links should be an array");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["source"], survey.as_str());
    assert_eq!(links[0]["target"], grade.as_str());
    assert_eq!(links[0]["type"], "0");

    let linked = run_plangraph(&root, &["link", "add", &grade, &pave, "--type", "SS", "--lag", "-1"]);
    assert_success(&linked);
    assert!(stdout(&linked).starts_with(&format!("linked {}", pave)));

    let detail = parse_json(&run_plangraph(&root, &["show", &grade, "--json"]));
    let successors = detail["successors"]
        .as_array()
        .expect("successors should be an array");
    assert_eq!(successors.len(), 1);
    assert_eq!(successors[0]["resolved"], pave.as_str());
    assert_eq!(successors[0]["lag"], -1);

    let edge_id = format!("{}->{}", grade, pave);
    assert_success(&run_plangraph(&root, &["link", "rm", &edge_id]));
    let graph = parse_json(&run_plangraph(&root, &["graph", "--json"]));
    assert_eq!(graph["links"].as_array().map(Vec::len), Some(1));
    assert_failure(&run_plangraph(&root, &["link", "rm", &edge_id]));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn predecessor_edits_and_removal_keep_both_ends_consistent() {
    let root = unique_workspace("plangraph-cli-edit");
    assert_success(&run_plangraph(&root, &["schedule", "add", "S1", "--master"]));
    let survey = create(&root, &["S1", "Survey", "--start", "2024-01-01"]);
    let grade = create(&root, &["S1", "Grade", "--start", "2024-01-03"]);

    let spec = format!("{}@FF+2", record_id(&survey));
    assert_success(&run_plangraph(&root, &["preds", &grade, &spec]));
    let detail = parse_json(&run_plangraph(&root, &["show", &survey, "--json"]));
    assert_eq!(detail["successors"][0]["resolved"], grade.as_str());
    assert_eq!(detail["successors"][0]["link_type"], "FF");

    let removed = run_plangraph(&root, &["rm", &survey]);
    assert_success(&removed);
    let detail = parse_json(&run_plangraph(&root, &["show", &grade, "--json"]));
    assert_eq!(detail["predecessors"].as_array().map(Vec::len), Some(0));
    assert_failure(&run_plangraph(&root, &["show", &survey]));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn drafts_survive_between_runs_until_promoted() {
    let root = unique_workspace("plangraph-cli-drafts");
    assert_success(&run_plangraph(&root, &["schedule", "add", "S1", "--master"]));
    let draft = create(&root, &["S1", "Survey", "--start", "2024-01-01", "--draft"]);
    assert!(draft.starts_with("new:S1:"));
    assert!(root.join(".plangraph/drafts.json").exists());

    let grade = create(
        &root,
        &["S1", "Grade", "--start", "2024-01-03", "-p", record_id(&draft)],
    );
    let graph = parse_json(&run_plangraph(&root, &["graph", "--json"]));
    assert_eq!(graph["links"][0]["source"], draft.as_str());

    let promoted = run_plangraph(&root, &["promote", "--json"]);
    assert_success(&promoted);
    let reports = parse_json(&promoted);
    assert_eq!(reports[0]["provisional"], draft.as_str());
    let durable = reports[0]["durable"]
        .as_str()
        .expect("durable id should be a string")
        .to_string();
    assert!(durable.starts_with("rec:S1:"));
    assert!(!root.join(".plangraph/drafts.json").exists());

    let detail = parse_json(&run_plangraph(&root, &["show", &grade, "--json"]));
    assert_eq!(detail["predecessors"][0]["reference"], record_id(&durable));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn check_fails_on_unresolved_references() {
    let root = unique_workspace("plangraph-cli-check");
    assert_success(&run_plangraph(&root, &["schedule", "add", "S1", "--master"]));
    create(&root, &["S1", "Survey", "--start", "2024-01-01"]);
    assert_success(&run_plangraph(&root, &["check"]));

    create(&root, &["S1", "Grade", "--start", "2024-01-03", "-p", "ghost"]);
    let output = run_plangraph(&root, &["check", "--json"]);
    assert_failure(&output);
    let report = parse_json(&output);
    assert_eq!(report["issues"][0]["kind"], "unresolved_reference");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn invalid_input_and_config_fail_cleanly() {
    let root = unique_workspace("plangraph-cli-invalid");
    assert_success(&run_plangraph(&root, &["schedule", "add", "S1", "--master"]));
    assert_failure(&run_plangraph(&root, &["schedule", "add", "S1"]));
    assert_failure(&run_plangraph(&root, &["new", "ZZ", "Survey"]));
    assert_failure(&run_plangraph(&root, &["show", "not-a-node"]));
    assert_failure(&run_plangraph(&root, &["new", "S1", "Survey", "--start", "soon"]));

    let missing = root.join("missing.toml");
    assert_failure(&run_plangraph(
        &root,
        &["--config", missing.to_str().expect("utf8 path"), "check"],
    ));

    std::fs::write(root.join(".plangraph/config.toml"), "[links]\ndefault_type = \"XX\"\n")
        .expect("config should be writable");
    let output = run_plangraph(&root, &["check"]);
    assert_failure(&output);
    assert!(String::from_utf8_lossy(&output.stderr).contains("links.default_type"));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn import_and_merge_round_trip_through_the_store() {
    let root = unique_workspace("plangraph-cli-import");
    assert_success(&run_plangraph(&root, &["schedule", "add", "S1", "--master"]));
    let file = root.join("records.jsonl");
    std::fs::write(
        &file,
        "{\"name\":\"r1\",\"task_name\":\"Survey\",\"baseline_start_date\":\"2024-01-01\"}\n",
    )
    .expect("jsonl should be writable");
    let imported = run_plangraph(
        &root,
        &["import", file.to_str().expect("utf8 path"), "--schedule", "S1", "--json"],
    );
    assert_success(&imported);
    assert_eq!(parse_json(&imported)["imported_count"], 1);

    let updates = root.join("propagated.json");
    std::fs::write(
        &updates,
        "[{\"recordId\":\"r1\",\"startDate\":\"2024-02-01\",\"duration\":4},{\"recordId\":\"gone\"}]",
    )
    .expect("propagation file should be writable");
    let merged = run_plangraph(
        &root,
        &["merge", updates.to_str().expect("utf8 path"), "--json"],
    );
    assert_success(&merged);
    let merged = parse_json(&merged);
    assert_eq!(merged["matched"], 1);
    assert_eq!(merged["unknown"][0], "gone");

    let detail = parse_json(&run_plangraph(&root, &["show", "rec:S1:r1", "--json"]));
    assert_eq!(detail["activity"]["start_date"], "2024-02-01");
    assert_eq!(detail["activity"]["duration"], 4);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn completions_print_without_a_store() {
    let root = unique_workspace("plangraph-cli-completions");
    let output = run_plangraph(&root, &["completions", "bash"]);
    assert_success(&output);
    assert!(stdout(&output).contains("plangraph"));
    assert!(!root.join(".plangraph/cache/store.sqlite").exists());
    let _ = std::fs::remove_dir_all(root);
}
