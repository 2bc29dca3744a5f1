use std::process::Command;
use tempfile::TempDir;

/// Environment variables are only set on subprocesses to avoid races between tests

fn write_png(path: &std::path::Path) {
    image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]))
        .save(path)
        .unwrap();
}

#[test]
fn test_detect_model_env_override() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join("in")).unwrap();
    write_png(&temp_dir.path().join("in/a.jpg"));

    let output = Command::new(env!("CARGO_BIN_EXE_nexis"))
        .args(["detect", "in", "out"])
        .env("NEXIS_DETECT_MODEL_PATH", "/non/existent/path.onnx")
        .env("NO_COLOR", "1")
        .current_dir(temp_dir.path())
        .output()
        .expect("Failed to execute nexis");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NEXIS_DETECT_MODEL_PATH"), "got: {stderr}");
    assert!(stderr.contains("does not exist"), "got: {stderr}");
}

#[test]
fn test_sr_model_env_override() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join("in")).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_nexis"))
        .args(["upscale", "in", "out"])
        .env("NEXIS_SR_MODEL_PATH", "/non/existent/FSRCNN_x4.onnx")
        .env("NO_COLOR", "1")
        .current_dir(temp_dir.path())
        .output()
        .expect("Failed to execute nexis");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NEXIS_SR_MODEL_PATH"), "got: {stderr}");
}

#[test]
fn test_empty_model_from_model_dir_rejected() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join("in")).unwrap();
    let models = temp_dir.path().join("models");
    std::fs::create_dir(&models).unwrap();
    std::fs::write(models.join("yolov8n.onnx"), b"").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_nexis"))
        .args(["detect", "in", "out"])
        .env("NEXIS_MODEL_DIR", &models)
        .env_remove("NEXIS_DETECT_MODEL_PATH")
        .env("NO_COLOR", "1")
        .current_dir(temp_dir.path())
        .output()
        .expect("Failed to execute nexis");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("empty"), "got: {stderr}");
}

#[test]
fn test_rust_log_honoured_without_verbosity_flags() {
    let temp_dir = TempDir::new().unwrap();

    let quiet = Command::new(env!("CARGO_BIN_EXE_nexis"))
        .args(["view", "nothing"])
        .env("RUST_LOG", "error")
        .env("NO_COLOR", "1")
        .current_dir(temp_dir.path())
        .output()
        .expect("Failed to execute nexis");
    assert!(quiet.status.success());
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("No images found"));

    let verbose = Command::new(env!("CARGO_BIN_EXE_nexis"))
        .args(["-v", "view", "nothing"])
        .env("RUST_LOG", "error")
        .env("NO_COLOR", "1")
        .current_dir(temp_dir.path())
        .output()
        .expect("Failed to execute nexis");
    assert!(String::from_utf8_lossy(&verbose.stderr).contains("No images found"));
}
