use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cledger_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cledger");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    // Test input files
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("people.csv"),
        "FirstName,LastName,EmailID,Department,City,DirectNumber\n\
         Ada,Lovelace,ada@example.com,Engineering,London,+44 1\n\
         Grace,Hopper,grace@example.com,Navy,Arlington,+1 2\n\
         Alan,Turing,,Mathematics,Manchester,+44 3\n",
    )
    .unwrap();
    fs::write(files_dir.join("notes.txt"), "not a spreadsheet").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/ledger.sqlite"

[server]
bind = "127.0.0.1:7341"

[ingest]
staging_dir = "{root}/data/staging"

[export]
default_page_size = 2
max_page_size = 50
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ledger.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cledger(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cledger_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cledger binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

fn import_json(config_path: &Path, file: &Path) -> serde_json::Value {
    let (stdout, stderr, success) =
        run_cledger(config_path, &["import", file.to_str().unwrap(), "--json"]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).expect("import --json prints JSON")
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cledger(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(root_of(&config_path).join("data/ledger.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cledger(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cledger(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_twice_inserts_then_updates() {
    let (_tmp, config_path) = setup_test_env();
    let file = root_of(&config_path).join("files/people.csv");
    run_cledger(&config_path, &["init"]);

    let first = import_json(&config_path, &file);
    assert_eq!(first["processed"], 3);
    assert_eq!(first["inserted"], 3);
    assert_eq!(first["updated"], 0);
    assert_eq!(first["keyless"], 1);
    assert_eq!(first["duplicatesExistingCount"], 0);
    assert!(first["reportId"].is_string());

    let second = import_json(&config_path, &file);
    // The keyless row is inserted again; keyed rows update in place.
    assert_eq!(second["inserted"], 1);
    assert_eq!(second["updated"], 2);
    assert_eq!(second["keyless"], 1);
    assert_eq!(second["duplicatesExistingCount"], 2);

    let (stdout, _, success) = run_cledger(&config_path, &["stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["records"], 4);
    assert_eq!(stats["keyless"], 2);
    assert_eq!(stats["uploadReports"], 2);
}

#[test]
fn test_import_leaves_no_staged_files() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    run_cledger(&config_path, &["init"]);
    import_json(&config_path, &root.join("files/people.csv"));

    let staged = fs::read_dir(root.join("data/staging"))
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(staged, 0);
}

#[test]
fn test_import_rejects_unsupported_extension() {
    let (_tmp, config_path) = setup_test_env();
    let file = root_of(&config_path).join("files/notes.txt");
    run_cledger(&config_path, &["init"]);

    let (_, stderr, success) = run_cledger(&config_path, &["import", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported"), "stderr={}", stderr);
}

#[test]
fn test_report_shows_upload() {
    let (_tmp, config_path) = setup_test_env();
    let file = root_of(&config_path).join("files/people.csv");
    run_cledger(&config_path, &["init"]);
    let summary = import_json(&config_path, &file);
    let report_id = summary["reportId"].as_str().unwrap().to_string();

    let (stdout, stderr, success) =
        run_cledger(&config_path, &["report", &report_id, "--json"]);
    assert!(success, "report failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["filename"], "people.csv");
    assert_eq!(report["inserted"], 3);
    assert_eq!(report["username"], "unknown");

    let (_, _, missing) = run_cledger(&config_path, &["report", "no-such-report"]);
    assert!(!missing);
}

#[test]
fn test_export_filters_by_any_of_listed_values() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    run_cledger(&config_path, &["init"]);
    import_json(&config_path, &root.join("files/people.csv"));

    let out = root.join("out/cities.csv");
    let (stdout, stderr, success) = run_cledger(
        &config_path,
        &[
            "export",
            "--fields",
            "FirstName,City",
            "-f",
            "City=london,MANCHESTER",
            "-o",
            out.to_str().unwrap(),
        ],
    );
    assert!(success, "export failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 2"));

    let csv = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines, vec!["FirstName,City", "Ada,London", "Alan,Manchester"]);

    // Partial values never satisfy a value list
    let (stdout, _, success) = run_cledger(
        &config_path,
        &["export", "-f", "City=lon,man", "-o", out.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("records: 0"));
}

#[test]
fn test_export_and_replay_snapshot() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    run_cledger(&config_path, &["init"]);
    import_json(&config_path, &root.join("files/people.csv"));

    let out = root.join("out/export.csv");
    let (stdout, stderr, success) = run_cledger(
        &config_path,
        &[
            "--actor",
            "alice",
            "export",
            "--fields",
            "EmailID,FirstName,DirectNumber",
            "-o",
            out.to_str().unwrap(),
        ],
    );
    assert!(success, "export failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 3"));

    // File export is verbatim
    let csv = fs::read_to_string(&out).unwrap();
    assert!(csv.starts_with("EmailID,FirstName,DirectNumber\n"));
    assert!(csv.contains("ada@example.com,Ada,+44 1"));

    let (stdout, _, success) = run_cledger(
        &config_path,
        &["snapshots", "list", "--username", "alice", "--json"],
    );
    assert!(success);
    let list: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(list["total"], 1);
    let snapshot_id = list["items"][0]["id"].as_str().unwrap().to_string();

    // Page 1 uses the configured default page size of 2
    let (stdout, stderr, success) =
        run_cledger(&config_path, &["snapshots", "items", &snapshot_id]);
    assert!(success, "items failed: {}", stderr);
    let page: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["page"], 1);
    assert_eq!(
        page["fields"],
        serde_json::json!(["EmailID", "FirstName", "DirectNumber"])
    );
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["FirstName"], "Ada");
    assert_eq!(items[0]["EmailID"], "NA");
    assert_eq!(items[0]["DirectNumber"], "NA");
    assert_eq!(items[1]["FirstName"], "Grace");

    let (stdout, _, success) = run_cledger(
        &config_path,
        &["snapshots", "items", &snapshot_id, "--page", "2"],
    );
    assert!(success);
    let page: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["FirstName"], "Alan");

    let (_, _, success) = run_cledger(
        &config_path,
        &["snapshots", "items", &snapshot_id, "--page", "0"],
    );
    assert!(!success);
}

#[test]
fn test_export_rejects_unknown_field() {
    let (_tmp, config_path) = setup_test_env();
    run_cledger(&config_path, &["init"]);

    let (_, stderr, success) = run_cledger(&config_path, &["export", "--fields", "Password"]);
    assert!(!success);
    assert!(stderr.contains("unknown export field"), "stderr={}", stderr);
}
