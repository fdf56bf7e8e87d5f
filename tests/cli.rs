use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hotmap"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap())
        .unwrap_or_else(|e| panic!("invalid JSON at {}: {}", path.display(), e))
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn assert_ok(out: &Output, what: &str) {
    assert!(
        out.status.success(),
        "{what} should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
}

#[test]
fn commands_lists_every_subcommand() {
    let out = run(&["commands"]);
    assert_ok(&out, "commands");
    let v: Value = serde_json::from_slice(&out.stdout).unwrap();
    let names: Vec<&str> = v["commands"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    for expected in ["render", "replay", "serve", "demo-data"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
}

#[test]
fn demo_render_replay_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.json");
    let config = dir.path().join("data.config.json");

    let out = run(&[
        "demo-data", "--out", &arg(&data), "--rows", "6", "--cols", "20", "--seed", "7",
    ]);
    assert_ok(&out, "demo-data");
    let doc = read_json(&data);
    assert_eq!(doc["matrix"].as_array().unwrap().len(), 6);
    assert!(config.exists());

    let frame = dir.path().join("frame.png");
    let out = run(&[
        "render",
        "--data",
        &arg(&data),
        "--config",
        &arg(&config),
        "--out",
        &arg(&frame),
        "--rows-per-step",
        "2",
    ]);
    assert_ok(&out, "render");
    assert!(frame.exists());
    let sidecar = read_json(&dir.path().join("frame.json"));
    assert_eq!(sidecar["rows"], 6);
    assert_eq!(sidecar["cols"], 20);
    let total: u64 = sidecar["bins"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["cells"].as_u64().unwrap())
        .sum();
    assert_eq!(total + sidecar["default_cells"].as_u64().unwrap(), 120);

    let layout = &sidecar["layout"];
    let gx = layout["grid"]["x"].as_f64().unwrap();
    let gy = layout["grid"]["y"].as_f64().unwrap();
    let cw = layout["cellW"].as_f64().unwrap();
    let ch = layout["cellH"].as_f64().unwrap();
    let center = |row: f64, col: f64| (gx + col * cw + cw / 2.0, gy + row * ch + ch / 2.0);

    let (x0, y0) = center(1.0, 2.0);
    let (x1, y1) = center(3.0, 5.0);
    let (cx, cy) = center(0.0, 0.0);
    let script = json!([
        {"type": "labeling", "enabled": true},
        {"type": "annotation", "text": "burst"},
        {"type": "down", "x": x1, "y": y1},
        {"type": "move", "x": x0, "y": y0},
        {"type": "up", "x": x0, "y": y0},
        {"type": "labeling", "enabled": false},
        {"type": "down", "x": cx, "y": cy},
        {"type": "up", "x": cx, "y": cy}
    ]);
    let script_path = dir.path().join("script.json");
    std::fs::write(&script_path, script.to_string()).unwrap();

    let labels_out = dir.path().join("labels.json");
    let final_png = dir.path().join("final.png");
    let out = run(&[
        "replay",
        "--data",
        &arg(&data),
        "--config",
        &arg(&config),
        "--script",
        &arg(&script_path),
        "--labels-out",
        &arg(&labels_out),
        "--out",
        &arg(&final_png),
        "--file-name",
        "pipeline",
    ]);
    assert_ok(&out, "replay");
    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    let labels = report["labels"].as_array().unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0]["startRow"], 1);
    assert_eq!(labels[0]["endRow"], 3);
    assert_eq!(labels[0]["startCol"], 2);
    assert_eq!(labels[0]["endCol"], 5);
    assert_eq!(labels[0]["annotation"], "burst");

    let events: Vec<&Value> = report["steps"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|s| s["events"].as_array().unwrap())
        .collect();
    assert!(events.iter().any(|e| e["type"] == "labelCreated"));
    assert!(events.iter().any(|e| e["type"] == "click"));
    assert!(!events.iter().any(|e| e["type"] == "selection"));

    let saved = read_json(&labels_out);
    assert_eq!(saved["fileName"], "pipeline");
    assert_eq!(saved["data"]["labelCount"], 1);
    assert_eq!(saved["data"]["labels"].as_array().unwrap().len(), 1);
    assert!(final_png.exists());
}

#[test]
fn missing_inputs_fail_with_error_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&[
        "render",
        "--data",
        &arg(&dir.path().join("nope.json")),
        "--config",
        &arg(&dir.path().join("nope.config.json")),
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("error:"));
}
