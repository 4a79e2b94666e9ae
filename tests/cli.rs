mod common;

use std::fs;

use assert_cmd::Command;
use common::{TABLE_ID, TestWorkspace, typed_storage};
use output_mapping::{backend::Backend, storage_api::memory::InMemoryStorage};
use predicates::str::contains;

const TYPED_MAPPING: &str = r#"
settings:
  component_id: keboola.ex-db-snowflake
tables:
  - destination: in.c-output-mapping-test.typed_table
    description: Orders export
    schema:
      - name: col1
        primary_key: true
        nullable: false
        data_type:
          base: {type: STRING}
          snowflake: {type: VARCHAR, length: 255}
      - name: col2
        nullable: false
        data_type:
          base: {type: NUMERIC}
          snowflake: {type: NUMBER}
      - name: col3
        data_type:
          base: {type: NUMERIC}
          snowflake: {type: NUMBER, length: 123}
      - name: col4
        data_type: {base: {type: STRING}}
"#;

fn output_mapping() -> Command {
    Command::cargo_bin("output-mapping").expect("binary exists")
}

fn workspace_with_typed_table() -> (TestWorkspace, std::path::PathBuf, std::path::PathBuf) {
    let workspace = TestWorkspace::new();
    let state = workspace.path().join("state.json");
    typed_storage(Backend::Snowflake).save(&state).expect("save state");
    let mapping = workspace.write("mapping.yml", TYPED_MAPPING);
    (workspace, mapping, state)
}

#[test]
fn normalize_prints_one_identifier_per_line() {
    output_mapping()
        .args(["normalize", "Žluťoučký kůň", "$Percent%", "Order ID"])
        .assert()
        .success()
        .stdout("zlutoucky_kun\n_percent_\norder_id\n");
}

#[test]
fn normalize_honours_max_length() {
    output_mapping()
        .args(["normalize", "--max-length", "5", "customer_name"])
        .assert()
        .success()
        .stdout("custo\n");
}

#[test]
fn plan_lists_pending_changes_without_touching_state() {
    let (_workspace, mapping, state) = workspace_with_typed_table();
    let before = fs::read_to_string(&state).expect("read state");

    output_mapping()
        .args(["plan", "-m"])
        .arg(&mapping)
        .arg("-s")
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("add column"))
        .stdout(contains("col4"))
        .stdout(contains(TABLE_ID));

    assert_eq!(fs::read_to_string(&state).expect("read state"), before);
}

#[test]
fn apply_updates_state_in_place() {
    let (_workspace, mapping, state) = workspace_with_typed_table();

    output_mapping()
        .args(["apply", "-m"])
        .arg(&mapping)
        .arg("-s")
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("col1, col2, col3, col4"));

    let storage = InMemoryStorage::load(&state).expect("reload state");
    let table = storage.stored_table(TABLE_ID).expect("table");
    assert_eq!(table.columns.len(), 4);
    assert_eq!(
        table.metadata.get("KBC.description").map(String::as_str),
        Some("Orders export")
    );
}

#[test]
fn apply_creates_state_when_missing() {
    let workspace = TestWorkspace::new();
    let mapping = workspace.write(
        "mapping.yml",
        r#"
tables:
  - destination: out.c-reports.daily
    columns: [id, total]
    primary_key: [id]
"#,
    );
    let state = workspace.path().join("fresh.json");
    let output = workspace.path().join("result.json");

    output_mapping()
        .args(["apply", "-m"])
        .arg(&mapping)
        .arg("-s")
        .arg(&state)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    assert!(!state.exists());
    let storage = InMemoryStorage::load(&output).expect("result state");
    let table = storage.stored_table("out.c-reports.daily").expect("table");
    assert!(!table.is_typed);
    assert_eq!(table.primary_key, vec!["id"]);
}

#[test]
fn apply_reports_structure_violations() {
    let workspace = TestWorkspace::new();
    let state = workspace.path().join("state.json");
    typed_storage(Backend::Snowflake).save(&state).expect("save state");
    let mapping = workspace.write(
        "mapping.yml",
        r#"
tables:
  - destination: in.c-output-mapping-test.typed_table
    schema:
      - name: col1
        primary_key: true
        nullable: false
        data_type: {base: {type: STRING}}
      - name: col2
        nullable: false
        data_type: {base: {type: STRING}}
      - name: col3
        data_type: {base: {type: NUMERIC}}
"#,
    );

    output_mapping()
        .args(["apply", "-m"])
        .arg(&mapping)
        .arg("-s")
        .arg(&state)
        .assert()
        .failure()
        .stderr(contains("column \"col2\" has different type than the schema"));
}

#[test]
fn plan_requires_existing_state() {
    let workspace = TestWorkspace::new();
    let mapping = workspace.write("mapping.yml", TYPED_MAPPING);
    output_mapping()
        .args(["plan", "-m"])
        .arg(&mapping)
        .arg("-s")
        .arg(workspace.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(contains("Loading storage state"));
}

#[test]
fn unknown_mapping_keys_are_rejected() {
    let workspace = TestWorkspace::new();
    let mapping = workspace.write(
        "mapping.yml",
        "tables:\n  - destination: out.c-main.x\n    colums: [id]\n",
    );
    output_mapping()
        .args(["apply", "-m"])
        .arg(&mapping)
        .arg("-s")
        .arg(workspace.path().join("state.json"))
        .assert()
        .failure()
        .stderr(contains("Parsing mapping YAML"));
}
