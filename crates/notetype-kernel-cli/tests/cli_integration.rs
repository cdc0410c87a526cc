use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use ulid::Ulid;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", Ulid::new()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_ntk<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_ntk"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute ntk binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_ntk(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "ntk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let value: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(value.get("contract_version").and_then(Value::as_str), Some("cli.v1"));
    value
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn ordinals(value: &Value, key: &str) -> Vec<i64> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
        .iter()
        .map(|item| match item {
            Value::Number(_) => item.as_i64().unwrap_or(-1),
            other => other.get("ordinal").and_then(Value::as_i64).unwrap_or(-1),
        })
        .collect()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn field(name: &str, ordinal: usize) -> Value {
    serde_json::json!({ "name": name, "ordinal": ordinal, "font": "Arial", "size": 20 })
}

fn template(name: &str, ordinal: usize, question: &str) -> Value {
    serde_json::json!({
        "name": name,
        "ordinal": ordinal,
        "question_format": question,
        "answer_format": "{{FrontSide}}",
        "css": ".card {}"
    })
}

fn write_note_types(dir: &Path) -> PathBuf {
    let reversed = serde_json::json!({
        "id": 1_000,
        "name": "Basic (and reversed card)",
        "kind": {
            "type": "standard",
            "requirements": [
                { "template_ordinal": 0, "kind": "all", "field_ordinals": [0] },
                { "template_ordinal": 1, "kind": "all", "field_ordinals": [1] }
            ]
        },
        "fields": [field("Front", 0), field("Back", 1)],
        "templates": [template("Card 1", 0, "{{Front}}"), template("Card 2", 1, "{{Back}}")],
        "default_deck": 1,
        "modified": 0
    });
    let cloze = serde_json::json!({
        "id": 2_000,
        "name": "Cloze",
        "kind": { "type": "cloze" },
        "fields": [field("Text", 0), field("Extra", 1)],
        "templates": [template("Cloze", 0, "{{cloze:Text}}")],
        "default_deck": 1,
        "modified": 0
    });
    let path = dir.join("note_types.json");
    let body = serde_json::to_string_pretty(&serde_json::json!([reversed, cloze]))
        .unwrap_or_else(|err| panic!("failed to encode note types: {err}"));
    fs::write(&path, body)
        .unwrap_or_else(|err| panic!("failed to write {}: {err}", path.display()));
    path
}

#[test]
fn db_commands_cover_schema_version_migrate_and_integrity() {
    let sandbox = unique_temp_dir("ntk-cli-db");
    let db = sandbox.join("collection.sqlite3");

    let before = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_i64(&before, "current_version"), 0);
    assert_eq!(before.get("up_to_date").and_then(Value::as_bool), Some(false));

    let dry_run = run_json(["--db", path_str(&db), "db", "migrate", "--dry-run"]);
    assert_eq!(ordinals(&dry_run, "would_apply_versions"), vec![1]);

    let migrated = run_json(["--db", path_str(&db), "db", "migrate"]);
    assert_eq!(as_i64(&migrated, "after_version"), 1);
    assert_eq!(migrated.get("up_to_date").and_then(Value::as_bool), Some(true));

    let again = run_json(["--db", path_str(&db), "db", "migrate"]);
    assert_eq!(ordinals(&again, "applied_versions"), Vec::<i64>::new());

    let integrity = run_json(["--db", path_str(&db), "db", "integrity-check"]);
    assert_eq!(integrity.get("quick_check_ok").and_then(Value::as_bool), Some(true));

    let _ = fs::remove_dir_all(&sandbox);
}

#[test]
fn imported_note_types_are_listed_and_shown() {
    let sandbox = unique_temp_dir("ntk-cli-notetype");
    let db = sandbox.join("collection.sqlite3");
    let file = write_note_types(&sandbox);

    let imported =
        run_json(["--db", path_str(&db), "notetype", "import", "--file", path_str(&file)]);
    assert_eq!(ordinals(&imported, "imported"), vec![1_000, 2_000]);
    assert_eq!(imported.get("written").and_then(Value::as_bool), Some(true));

    let listed = run_json(["--db", path_str(&db), "notetype", "list"]);
    let note_types = listed
        .get("note_types")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing note_types: {listed}"));
    assert_eq!(note_types.len(), 2);
    assert_eq!(note_types[0].get("current").and_then(Value::as_bool), Some(true));
    assert_eq!(note_types[1].get("cloze").and_then(Value::as_bool), Some(true));

    let shown = run_json(["--db", path_str(&db), "notetype", "show", "--id", "1000"]);
    let name = shown.pointer("/note_type/name").and_then(Value::as_str);
    assert_eq!(name, Some("Basic (and reversed card)"));
    assert!(shown.get("schema_hash").and_then(Value::as_u64).is_some());

    let missing = run_ntk(["--db", path_str(&db), "notetype", "show", "--id", "3"]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("note type not found: 3"));

    let _ = fs::remove_dir_all(&sandbox);
}

#[test]
fn note_add_generates_available_cards() {
    let sandbox = unique_temp_dir("ntk-cli-note");
    let db = sandbox.join("collection.sqlite3");
    let file = write_note_types(&sandbox);
    let _ = run_json(["--db", path_str(&db), "notetype", "import", "--file", path_str(&file)]);

    let front_only = run_json([
        "--db",
        path_str(&db),
        "note",
        "add",
        "--note-type-id",
        "1000",
        "--field",
        "hello",
    ]);
    assert_eq!(ordinals(&front_only, "cards"), vec![0]);
    let note_id = as_i64(&front_only, "note_id").to_string();

    let available = run_json(["--db", path_str(&db), "note", "available", "--note-id", &note_id]);
    assert_eq!(ordinals(&available, "available_ordinals"), vec![0]);

    let both = run_json([
        "--db",
        path_str(&db),
        "note",
        "add",
        "--note-type-id",
        "1000",
        "--field",
        "hello",
        "--field",
        "   ",
    ]);
    assert_eq!(ordinals(&both, "cards"), vec![0]);

    let cloze = run_json([
        "--db",
        path_str(&db),
        "note",
        "add",
        "--note-type-id",
        "2000",
        "--field",
        "{{c1::Paris}} is in {{c2::France}}",
    ]);
    assert_eq!(ordinals(&cloze, "cards"), vec![0, 1]);
    let cloze_id = as_i64(&cloze, "note_id").to_string();

    let cards = run_json(["--db", path_str(&db), "card", "list", "--note-id", &cloze_id]);
    assert_eq!(ordinals(&cards, "cards"), vec![0, 1]);

    let too_many = run_ntk([
        "--db",
        path_str(&db),
        "note",
        "add",
        "--note-type-id",
        "1000",
        "--field",
        "a",
        "--field",
        "b",
        "--field",
        "c",
    ]);
    assert!(!too_many.status.success());

    let _ = fs::remove_dir_all(&sandbox);
}

#[test]
fn importing_a_note_type_without_id_fails() {
    let sandbox = unique_temp_dir("ntk-cli-import");
    let db = sandbox.join("collection.sqlite3");
    let file = sandbox.join("unsaved.json");
    let body = serde_json::json!({
        "name": "Unsaved",
        "kind": { "type": "cloze" },
        "default_deck": 1,
        "modified": 0
    });
    fs::write(&file, body.to_string())
        .unwrap_or_else(|err| panic!("failed to write {}: {err}", file.display()));

    let output = run_ntk(["--db", path_str(&db), "notetype", "import", "--file", path_str(&file)]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("has no id"));

    let listed = run_json(["--db", path_str(&db), "notetype", "list"]);
    assert_eq!(listed.get("note_types").and_then(Value::as_array).map(Vec::len), Some(0));

    let _ = fs::remove_dir_all(&sandbox);
}
