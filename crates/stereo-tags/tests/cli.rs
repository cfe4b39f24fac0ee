use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn cli() -> Command {
    Command::cargo_bin("stereo-tags").expect("binary")
}

#[test]
fn generate_writes_png() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("tag.png");
    cli()
        .args(["generate", "--id", "17", "--width", "80", "--border", "1", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote tag 17"));

    let img = image::open(&output).expect("png").to_luma8();
    assert_eq!(img.dimensions(), (100, 100));
    assert_eq!(img.get_pixel(0, 0).0[0], 255);
    assert_eq!(img.get_pixel(12, 12).0[0], 0);
}

#[test]
fn generate_rejects_invalid_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    cli()
        .args(["generate", "--id", "4096", "--output"])
        .arg(dir.path().join("tag.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot render tag 4096"));
}

#[test]
fn detect_reports_generated_tag() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image_path = dir.path().join("tag.png");
    cli()
        .args(["generate", "--id", "42", "--width", "160", "--border", "2", "--output"])
        .arg(&image_path)
        .assert()
        .success();

    let report_path = dir.path().join("report.json");
    let config = serde_json::json!({
        "image_path": image_path,
        "camera": {
            "width": 240, "height": 240,
            "fx": 400.0, "fy": 400.0, "cx": 119.5, "cy": 119.5
        },
        "tag_sizes": { "default_size": 0.16 },
        "output_path": report_path,
    });
    let config_path = dir.path().join("detect.json");
    fs::write(&config_path, config.to_string()).expect("config");

    cli()
        .args(["detect", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("id 42"));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("report")).expect("json");
    let tags = report["tags"].as_array().expect("tags");
    assert!(tags.iter().any(|t| t["id"] == 42));
    assert!(report["error"].is_null());
}

#[test]
fn detect_fails_on_missing_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let report_path = dir.path().join("report.json");
    let config = serde_json::json!({
        "image_path": dir.path().join("missing.png"),
        "camera": {
            "width": 64, "height": 64,
            "fx": 100.0, "fy": 100.0, "cx": 31.5, "cy": 31.5
        },
        "output_path": report_path,
    });
    let config_path = dir.path().join("detect.json");
    fs::write(&config_path, config.to_string()).expect("config");

    cli()
        .args(["detect", "--config"])
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("detection failed"));
    assert!(report_path.exists());
}

#[test]
fn verbose_flag_enables_stderr_logging() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = serde_json::json!({
        "image_path": dir.path().join("missing.png"),
        "camera": {
            "width": 64, "height": 64,
            "fx": 100.0, "fy": 100.0, "cx": 31.5, "cy": 31.5
        },
        "output_path": dir.path().join("report.json"),
    });
    let config_path = dir.path().join("detect.json");
    fs::write(&config_path, config.to_string()).expect("config");

    cli()
        .args(["-vv", "detect", "--config"])
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("WARN detect]")
                .and(predicate::str::contains("missing.png")),
        );
}
