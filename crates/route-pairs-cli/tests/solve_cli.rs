use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use route_pairs_core::table::read_table;

fn mock_solver() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mock_route_solver"))
}

/// 起点 n 件（偶数は A、奇数は B に割当）と終点 A / B を書き出す
fn write_inputs(dir: &Path, n: usize) -> (PathBuf, PathBuf) {
    let origins = dir.join("origins.jsonl");
    let mut text = String::from(
        r#"{"fields":[{"name":"OID","type":"OID"},{"name":"DestID","type":"String"},{"name":"SHAPE","type":"Geometry"},{"name":"CurbApproach","type":"SmallInteger"}]}"#,
    );
    text.push('\n');
    for i in 1..=n {
        let dest = if i % 2 == 0 { "A" } else { "B" };
        let row = json!([i, dest, {"type": "Point", "coordinates": [i as f64, 0.0]}, 0]);
        text.push_str(&row.to_string());
        text.push('\n');
    }
    fs::write(&origins, text).unwrap();

    let destinations = dir.join("destinations.jsonl");
    let text = [
        r#"{"fields":[{"name":"StoreID","type":"String"},{"name":"SHAPE","type":"Geometry"}]}"#,
        r#"["A",{"type":"Point","coordinates":[0.0,1.0]}]"#,
        r#"["B",{"type":"Point","coordinates":[0.0,2.0]}]"#,
    ]
    .join("\n");
    fs::write(&destinations, text).unwrap();
    (origins, destinations)
}

/// 必須引数を揃えたコマンド。`overrides` に含まれる引数は既定値の代わりに使う。
fn command(dir: &Path, n: usize, overrides: &[(&str, &str)]) -> Command {
    let (origins, destinations) = write_inputs(dir, n);
    let out = dir.join("out").join("routes.jsonl");
    let scratch = dir.join("scratch");
    let solver = mock_solver();
    let defaults: Vec<(&str, &str)> = vec![
        ("--origins", origins.to_str().unwrap()),
        ("--origins-id-field", "OID"),
        ("--assigned-dest-field", "DestID"),
        ("--destinations", destinations.to_str().unwrap()),
        ("--destinations-id-field", "StoreID"),
        ("--network-data-source", "/data/SanFrancisco/Streets_ND"),
        ("--travel-mode", "Driving Time"),
        ("--time-units", "Minutes"),
        ("--distance-units", "Miles"),
        ("--max-routes", "2"),
        ("--max-processes", "2"),
        ("--out-routes", out.to_str().unwrap()),
        ("--scratch-folder", scratch.to_str().unwrap()),
        ("--solver", solver.to_str().unwrap()),
    ];

    let mut cmd = Command::cargo_bin("solve_large_route_pairs").unwrap();
    for (flag, value) in &defaults {
        if !overrides.iter().any(|(f, _)| f == flag) {
            cmd.arg(flag).arg(value);
        }
    }
    for (flag, value) in overrides {
        // `=` 形式にして `--fail-all` のようなハイフン始まりの値も渡せるようにする
        cmd.arg(format!("{flag}={value}"));
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

fn column(path: &Path, name: &str) -> Vec<Value> {
    let table = read_table(path).unwrap();
    let idx = table.schema.index_of(name).unwrap();
    table.rows.iter().map(|r| r[idx].clone()).collect()
}

#[test]
fn solves_all_chunks_through_the_mock_solver() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out").join("routes.jsonl");

    let assert = command(tmp.path(), 5, &[("--time-of-day", "20220329 08:00")])
        .assert()
        .success()
        .stderr(predicate::str::contains("INFO | Finished Route calculation 3 of 3."))
        .stderr(predicate::str::contains("INFO | Finished calculating Routes."));

    let summary: Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(summary["total_chunks"], json!(3));
    assert_eq!(summary["succeeded_chunks"], json!(3));
    assert_eq!(summary["failed_chunks"], json!(0));
    assert_eq!(summary["merged_rows"], json!(5));

    assert_eq!(column(&out, "OriginUniqueID"), (1..=5).map(|i| json!(i)).collect::<Vec<_>>());
    let names = column(&out, "Name");
    assert_eq!(names[..2], [json!("1 - B"), json!("2 - A")]);
    assert!(!tmp.path().join("scratch").exists());
}

#[test]
fn reverse_direction_flag_accepts_boolish_values() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out").join("routes.jsonl");

    command(tmp.path(), 2, &[("--max-routes", "10"), ("--reverse-direction", "yes")])
        .assert()
        .success();

    assert_eq!(column(&out, "Name"), vec![json!("B - 1"), json!("A - 2")]);
}

#[test]
fn all_failed_solves_exit_cleanly_without_output() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out").join("routes.jsonl");

    let assert = command(tmp.path(), 3, &[("--solver-arg", "--fail-all")])
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "WARN | All Route solves failed, so no output was produced.",
        ));

    let summary: Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(summary["combined_output"], Value::Null);
    assert_eq!(summary["failed_chunks"], json!(2));
    assert!(!out.exists());
}

#[test]
fn rejected_travel_mode_fails_before_dispatch() {
    let tmp = tempfile::tempdir().unwrap();

    command(
        tmp.path(),
        3,
        &[("--solver-arg", "--reject"), ("--solver-arg", "travelMode")],
    )
    .assert()
    .failure()
    .stderr(predicate::str::contains("ERROR | Error initializing Route analysis."))
    .stderr(predicate::str::contains("unsupported value for travelMode"))
    .stderr(predicate::str::contains("Finished Route calculation").not());

    assert!(!tmp.path().join("out").exists());
}

#[test]
fn config_file_overrides_static_properties() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("route.toml");
    fs::write(
        &config,
        "cleanup = \"keep\"\n\n[solver_properties]\nreturnDirections = true\ntimeUnits = \"Hours\"\n",
    )
    .unwrap();

    command(
        tmp.path(),
        4,
        &[
            ("--config", config.to_str().unwrap()),
            ("--solver-arg", "--reject"),
            ("--solver-arg", "returnDirections"),
        ],
    )
    .assert()
    .success()
    .stderr(predicate::str::contains(
        "WARN | Failed to set property returnDirections from config file. Default will be used instead.",
    ))
    .stderr(predicate::str::contains(
        "WARN | Route config file property timeUnits is handled explicitly by the tool parameters and will be ignored.",
    ));

    // keep ポリシーなのでチャンクごとのジョブフォルダが残る
    let kept = fs::read_dir(tmp.path().join("scratch")).unwrap().count();
    assert_eq!(kept, 2);
}

#[test]
fn invalid_parameters_are_reported() {
    let tmp = tempfile::tempdir().unwrap();
    command(tmp.path(), 2, &[("--time-units", "Fortnights")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid time units: Fortnights"));

    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "unknown_key = 1\n").unwrap();
    command(tmp.path(), 2, &[("--config", config.to_str().unwrap())])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config"));

    let tmp = tempfile::tempdir().unwrap();
    command(tmp.path(), 2, &[("--time-of-day", "2022-03-29T08:00")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid time of day"));
}

#[test]
fn missing_solver_binary_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("no-such-solver");
    command(tmp.path(), 2, &[("--solver", missing.to_str().unwrap())])
        .assert()
        .failure()
        .stderr(predicate::str::contains("solver binary not found"));
}

#[test]
fn bare_solver_name_is_resolved_from_path() {
    let tmp = tempfile::tempdir().unwrap();
    let solver = mock_solver();
    let bin_dir = solver.parent().unwrap();
    let name = solver.file_name().unwrap().to_str().unwrap().to_string();
    let path = std::env::join_paths(
        std::iter::once(bin_dir.to_path_buf())
            .chain(std::env::split_paths(&std::env::var_os("PATH").unwrap_or_default())),
    )
    .unwrap();

    command(tmp.path(), 2, &[("--solver", &name)])
        .env("PATH", path)
        .assert()
        .success()
        .stderr(predicate::str::contains("INFO | Finished calculating Routes."));
}

#[test]
fn stdout_is_rejected_as_combined_output() {
    let tmp = tempfile::tempdir().unwrap();
    command(tmp.path(), 2, &[("--out-routes", "-")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--out-routes must be a file path"));
    assert!(!tmp.path().join("scratch").exists());
}
