use anyhow::Result;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run the CLI binary against the test database
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<std::process::Output> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_docsift"));
    cmd.arg("--db")
        .arg(temp_dir.path().join("index.db"))
        .args(args);

    let output = cmd.output()?;
    Ok(output)
}

/// Helper to create a small document tree
fn populate_tree(temp_dir: &TempDir) -> Result<String> {
    let root = temp_dir.path().join("docs");
    std::fs::create_dir_all(root.join("minutes"))?;
    std::fs::write(
        root.join("minutes").join("march.txt"),
        "the harbour committee approved the dredging budget",
    )?;
    std::fs::write(root.join("readme.md"), "archive of committee minutes")?;
    Ok(root.to_string_lossy().to_string())
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_cli_index_then_search() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = populate_tree(&temp_dir)?;

    let output = run_cli(&temp_dir, &["index", &root])?;
    assert!(output.status.success(), "index failed: {output:?}");
    assert!(stdout(&output).contains("Indexed: 2"));

    let output = run_cli(
        &temp_dir,
        &["search", "harbour", "--scope", &root, "--format", "json"],
    )?;
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["source"], "Database");

    let output = run_cli(&temp_dir, &["search", "committee", "--scope", &root])?;
    assert!(stdout(&output).contains("Found 2 results"));
    Ok(())
}

#[test]
fn test_cli_stats_check_and_detail() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = populate_tree(&temp_dir)?;
    run_cli(&temp_dir, &["index", &root])?;

    let output = run_cli(&temp_dir, &["stats", "--format", "json"])?;
    let json: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(json["total_indexed_files"], 2);

    let march = Path::new(&root).join("minutes").join("march.txt");
    let missing = Path::new(&root).join("april.txt");
    let output = run_cli(
        &temp_dir,
        &[
            "check",
            &march.to_string_lossy(),
            &missing.to_string_lossy(),
        ],
    )?;
    let text = stdout(&output);
    assert!(text.contains(&format!("indexed {}", march.display())));
    assert!(text.contains(&format!("missing {}", missing.display())));

    let output = run_cli(&temp_dir, &["detail", &march.to_string_lossy(), "--format", "full"])?;
    assert!(stdout(&output).contains("dredging budget"));
    Ok(())
}

#[test]
fn test_cli_history_and_maintenance() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = populate_tree(&temp_dir)?;
    run_cli(&temp_dir, &["index", &root])?;
    run_cli(&temp_dir, &["search", "dredging"])?;

    let output = run_cli(&temp_dir, &["history"])?;
    assert!(stdout(&output).contains("dredging"));

    let output = run_cli(&temp_dir, &["history", "--clear"])?;
    assert!(output.status.success());
    let output = run_cli(&temp_dir, &["history"])?;
    assert!(!stdout(&output).contains("dredging"));

    for command in ["optimize", "vacuum", "clear"] {
        let output = run_cli(&temp_dir, &[command])?;
        assert!(output.status.success(), "{command} failed: {output:?}");
    }
    let output = run_cli(&temp_dir, &["stats", "--format", "json"])?;
    let json: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(json["total_indexed_files"], 0);
    Ok(())
}

#[test]
fn test_cli_status_json() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let output = run_cli(&temp_dir, &["status", "--format", "json"])?;
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(json["health"]["database_connected"], true);
    assert_eq!(json["status"]["is_running"], false);
    Ok(())
}

#[test]
fn test_cli_rejects_bad_format() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["stats", "--format", "xml"])?;
    assert!(!output.status.success());
    Ok(())
}
