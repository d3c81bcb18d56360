use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/finsight.sqlite"

[fetch]
timeout_secs = 5

[pipeline]
max_retries = 1
backoff_base_ms = 10

[scheduler]
enabled = false

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("finsight.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_finsight(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_finsight"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run finsight binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

async fn run_finsight_async(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let config_path = config_path.to_path_buf();
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_finsight(&config_path, &args)
    })
    .await
    .unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_finsight(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/finsight.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_finsight(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_finsight(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_recent_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_finsight(&config_path, &["init"]);

    let (stdout, _, success) = run_finsight(&config_path, &["recent"]);
    assert!(success);
    assert!(stdout.contains("No materials yet."));

    let (stdout, _, success) = run_finsight(&config_path, &["recent", "--json"]);
    assert!(success);
    assert_eq!(stdout.trim(), "[]");
}

#[test]
fn test_submit_requires_one_source() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_finsight(&config_path, &["submit", "--title", "nothing"]);
    assert!(!success);
    assert!(stderr.contains("exactly one"), "stderr: {}", stderr);

    let (_, _, success) = run_finsight(
        &config_path,
        &[
            "submit",
            "--url",
            "https://a.example.com",
            "--youtube",
            "https://youtu.be/dQw4w9WgXcQ",
        ],
    );
    assert!(!success);
}

#[test]
fn test_get_missing_material() {
    let (_tmp, config_path) = setup_test_env();
    run_finsight(&config_path, &["init"]);

    let (_, stderr, success) = run_finsight(
        &config_path,
        &["get", "00000000-0000-0000-0000-000000000000"],
    );
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);

    let (_, _, success) = run_finsight(&config_path, &["get", "not-a-uuid"]);
    assert!(!success);
}

#[test]
fn test_missing_local_pdf_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope.pdf");

    let (stdout, stderr, success) =
        run_finsight(&config_path, &["submit", "--pdf", missing.to_str().unwrap()]);
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status: failed"), "stdout: {}", stdout);
    assert!(stdout.contains("error: NotFound"), "stdout: {}", stdout);
    assert!(stdout.contains("attempts: 1"), "stdout: {}", stdout);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submit_url_then_get_and_schedule() {
    let server = MockServer::start().await;
    Mock::given(path("/outlook"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(
                    "<html><head><title>Rates Outlook</title></head>\
                     <body><h1>Outlook</h1><p>Cuts expected in Q4.</p></body></html>",
                ),
        )
        .mount(&server)
        .await;

    let (_tmp, config_path) = setup_test_env();
    let url = format!("{}/outlook", server.uri());

    let (stdout, stderr, success) =
        run_finsight_async(&config_path, &["submit", "--url", &url]).await;
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status: completed"), "stdout: {}", stdout);

    let (stdout, _, success) = run_finsight_async(&config_path, &["recent", "--json"]).await;
    assert!(success);
    let recent: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let first = &recent[0];
    assert_eq!(first["title"], "Rates Outlook");
    assert_eq!(first["url"], url.as_str());
    let id = first["id"].as_str().unwrap().to_string();

    let (stdout, _, success) = run_finsight_async(&config_path, &["get", &id, "--json"]).await;
    assert!(success);
    let material: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(material["extracted_content"]
        .as_str()
        .unwrap()
        .contains("Cuts expected in Q4."));

    let (_, stderr, success) = run_finsight_async(
        &config_path,
        &["schedule", "create", &id, "--interval", "10"],
    )
    .await;
    assert!(!success);
    assert!(stderr.contains("at least 60"), "stderr: {}", stderr);

    let (stdout, stderr, success) = run_finsight_async(
        &config_path,
        &["schedule", "create", &id, "--interval", "3600"],
    )
    .await;
    assert!(success, "schedule create failed: {}", stderr);
    assert!(stdout.contains("every 3600s"));
    let schedule_id = stdout.split_whitespace().next().unwrap().to_string();

    let (stdout, _, success) = run_finsight_async(&config_path, &["schedule", "list"]).await;
    assert!(success);
    assert!(stdout.contains(&schedule_id));

    let (stdout, _, success) =
        run_finsight_async(&config_path, &["schedule", "cancel", &schedule_id]).await;
    assert!(success);
    assert!(stdout.contains("inactive"));

    let (stdout, _, _) = run_finsight_async(&config_path, &["schedule", "list"]).await;
    assert!(stdout.contains("No schedules."));
    let (stdout, _, _) = run_finsight_async(&config_path, &["schedule", "list", "--all"]).await;
    assert!(stdout.contains(&schedule_id));
}
