use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Expand a leading `~/` against the user's home directory
pub fn expand_tilde(raw: &str) -> PathBuf {
    match (raw.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

/// Directory named by `env_var` when set and non-empty, otherwise `default`
pub fn dir_from_env_or(env_var: &str, default: PathBuf) -> PathBuf {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => expand_tilde(value.trim()),
        _ => default,
    }
}

/// Download cache: `$NEXIS_MODEL_CACHE_DIR` or `<platform cache>/nexis/models`.
/// The directory is created if missing.
pub fn model_cache_dir() -> Result<PathBuf> {
    let platform_default = dirs::cache_dir()
        .ok_or_else(|| anyhow!("Unable to determine cache directory"))?
        .join("nexis")
        .join("models");
    let dir = dir_from_env_or("NEXIS_MODEL_CACHE_DIR", platform_default);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create model cache {}", dir.display()))?;
    Ok(dir)
}

/// Directory holding the default model files: `$NEXIS_MODEL_DIR` or `./models`
pub fn default_model_dir() -> PathBuf {
    dir_from_env_or("NEXIS_MODEL_DIR", PathBuf::from("models"))
}

pub fn calculate_md5(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(calculate_md5_bytes(&contents))
}

pub fn calculate_md5_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Compare a file's MD5 against an expected hex digest, ignoring case
pub fn verify_checksum(path: &Path, expected_md5: &str) -> Result<bool> {
    Ok(calculate_md5(path)?.eq_ignore_ascii_case(expected_md5.trim()))
}

/// One-line size summary used in model error messages
pub fn describe_file(path: &Path) -> String {
    match fs::metadata(path) {
        Ok(metadata) => {
            let size = metadata.len();
            format!(
                "{} bytes ({:.2} MB)",
                size,
                size as f64 / (1024.0 * 1024.0)
            )
        }
        Err(e) => format!("unavailable ({e})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_md5_calculation() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("weights.onnx");
        fs::write(&file_path, "hello world").unwrap();

        assert_eq!(
            calculate_md5(&file_path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert!(verify_checksum(&file_path, "5EB63BBBE01EEED093CB22BB8F5ACDC3").unwrap());
        assert!(!verify_checksum(&file_path, "00000000000000000000000000000000").unwrap());
    }

    #[test]
    fn test_md5_of_empty_input() {
        assert_eq!(calculate_md5_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_describe_missing_file() {
        let described = describe_file(Path::new("/definitely/not/here.onnx"));
        assert!(described.starts_with("unavailable"));
    }

    #[test]
    #[serial]
    fn test_dir_from_env_or() {
        let original = std::env::var("NEXIS_TEST_DIR");

        std::env::remove_var("NEXIS_TEST_DIR");
        assert_eq!(
            dir_from_env_or("NEXIS_TEST_DIR", PathBuf::from("fallback")),
            PathBuf::from("fallback")
        );

        std::env::set_var("NEXIS_TEST_DIR", "   ");
        assert_eq!(
            dir_from_env_or("NEXIS_TEST_DIR", PathBuf::from("fallback")),
            PathBuf::from("fallback")
        );

        std::env::set_var("NEXIS_TEST_DIR", "/opt/weights");
        assert_eq!(
            dir_from_env_or("NEXIS_TEST_DIR", PathBuf::from("fallback")),
            PathBuf::from("/opt/weights")
        );

        std::env::set_var("NEXIS_TEST_DIR", "~/.cache/nexis-test");
        let expanded = dir_from_env_or("NEXIS_TEST_DIR", PathBuf::from("fallback"));
        assert!(!expanded.to_string_lossy().contains('~'));
        assert!(expanded.ends_with(".cache/nexis-test"));

        match original {
            Ok(val) => std::env::set_var("NEXIS_TEST_DIR", val),
            Err(_) => std::env::remove_var("NEXIS_TEST_DIR"),
        }
    }

    #[test]
    #[serial]
    fn test_model_cache_dir_is_created() {
        let original = std::env::var("NEXIS_MODEL_CACHE_DIR");
        let temp_dir = tempdir().unwrap();
        let cache = temp_dir.path().join("cache").join("models");

        std::env::set_var("NEXIS_MODEL_CACHE_DIR", &cache);
        assert_eq!(model_cache_dir().unwrap(), cache);
        assert!(cache.is_dir());

        match original {
            Ok(val) => std::env::set_var("NEXIS_MODEL_CACHE_DIR", val),
            Err(_) => std::env::remove_var("NEXIS_MODEL_CACHE_DIR"),
        }
    }

    #[test]
    #[serial]
    fn test_default_model_dir() {
        let original = std::env::var("NEXIS_MODEL_DIR");

        std::env::remove_var("NEXIS_MODEL_DIR");
        assert_eq!(default_model_dir(), PathBuf::from("models"));

        std::env::set_var("NEXIS_MODEL_DIR", "/srv/models");
        assert_eq!(default_model_dir(), PathBuf::from("/srv/models"));

        match original {
            Ok(val) => std::env::set_var("NEXIS_MODEL_DIR", val),
            Err(_) => std::env::remove_var("NEXIS_MODEL_DIR"),
        }
    }
}
