//! Model file resolution and download caching.
//!
//! A model is located in priority order:
//! 1. `--model-path` on the command line
//! 2. `--model-url`, downloaded into the model cache (optionally MD5-checked)
//! 3. the command's environment variable (`NEXIS_SR_MODEL_PATH`, `NEXIS_DETECT_MODEL_PATH`)
//! 4. a fixed file name inside `$NEXIS_MODEL_DIR` (default `./models`)
//!
//! Local paths are checked before anything is processed so that a missing
//! model aborts the run up front.

use crate::cache_common;
use crate::color_utils::symbols;
use crate::path_validation::validate_path;
use crate::progress::{add_progress_bar, remove_progress_bar};
use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Model location flags shared by every model-backed command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliModelInfo {
    pub model_path: Option<String>,
    pub model_url: Option<String>,
    pub model_checksum: Option<String>,
}

impl CliModelInfo {
    pub fn validate(&self) -> Result<()> {
        if self.model_path.is_some() && self.model_url.is_some() {
            bail!("Cannot specify both --model-path and --model-url. Choose one.");
        }
        if self.model_checksum.is_some() && self.model_url.is_none() {
            bail!("--model-checksum can only be used with --model-url");
        }
        Ok(())
    }
}

/// Where a resolved model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrigin {
    CliPath,
    Downloaded,
    Environment,
    Default,
}

impl std::fmt::Display for ModelOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ModelOrigin::CliPath => "--model-path",
            ModelOrigin::Downloaded => "--model-url",
            ModelOrigin::Environment => "environment",
            ModelOrigin::Default => "default location",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub path: PathBuf,
    pub origin: ModelOrigin,
}

/// A remote model and the name it is cached under
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub url: String,
    pub md5_checksum: Option<String>,
    pub filename: String,
}

impl DownloadSpec {
    pub fn from_url(url: &str, md5_checksum: Option<String>) -> Self {
        let filename = url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("downloaded_model.onnx")
            .to_string();
        Self {
            url: url.to_string(),
            md5_checksum,
            filename,
        }
    }

    /// Checksummed downloads are cached as `name-<md5>.ext` so different
    /// versions behind the same file name do not collide.
    pub fn cache_file_name(&self) -> String {
        match &self.md5_checksum {
            Some(checksum) => match self.filename.rsplit_once('.') {
                Some((stem, ext)) => format!("{stem}-{}.{ext}", checksum.to_lowercase()),
                None => format!("{}-{}", self.filename, checksum.to_lowercase()),
            },
            None => self.filename.clone(),
        }
    }
}

/// Implemented by command configs that need a model file
pub trait ModelAccess {
    fn cli_model_info(&self) -> &CliModelInfo;

    /// Environment variable that may name the model file
    fn env_var_name(&self) -> &'static str;

    /// File name looked up inside the default model directory
    fn default_model_filename(&self) -> String;

    fn resolve_model(&self) -> Result<ResolvedModel> {
        let default_path = cache_common::default_model_dir().join(self.default_model_filename());
        resolve_model_path(self.cli_model_info(), self.env_var_name(), &default_path)
    }
}

/// Walk the resolution order and return the first usable model file
pub fn resolve_model_path(
    cli: &CliModelInfo,
    env_var: &str,
    default_path: &Path,
) -> Result<ResolvedModel> {
    cli.validate()?;

    if let Some(model_path) = &cli.model_path {
        log::info!("{}Using CLI-provided model path: {model_path}", symbols::system_setup());
        let path = PathBuf::from(model_path);
        check_local_model(&path, ModelOrigin::CliPath)?;
        return Ok(ResolvedModel {
            path,
            origin: ModelOrigin::CliPath,
        });
    }

    if let Some(model_url) = &cli.model_url {
        let spec = DownloadSpec::from_url(model_url, cli.model_checksum.clone());
        let path = get_or_download_model(&spec)?;
        return Ok(ResolvedModel {
            path,
            origin: ModelOrigin::Downloaded,
        });
    }

    if let Ok(env_path) = std::env::var(env_var) {
        if !env_path.trim().is_empty() {
            log::debug!("Using model path from {env_var}: {env_path}");
            let path = cache_common::expand_tilde(env_path.trim());
            check_local_model(&path, ModelOrigin::Environment)
                .with_context(|| format!("Model named by {env_var} is unusable"))?;
            return Ok(ResolvedModel {
                path,
                origin: ModelOrigin::Environment,
            });
        }
    }

    check_local_model(default_path, ModelOrigin::Default).with_context(|| {
        format!(
            "No model found at {} (use --model-path, --model-url, {env_var} or NEXIS_MODEL_DIR)",
            default_path.display()
        )
    })?;
    Ok(ResolvedModel {
        path: default_path.to_path_buf(),
        origin: ModelOrigin::Default,
    })
}

/// The file must exist, be a regular file and be non-empty
fn check_local_model(path: &Path, origin: ModelOrigin) -> Result<()> {
    validate_path(path, false)?;
    if path.is_dir() {
        bail!(
            "Model path from {origin} is a directory, expected an .onnx file: {}",
            path.display()
        );
    }
    let size = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?
        .len();
    if size == 0 {
        bail!(
            "Model file is empty (0 bytes): {}\n\
             Empty model files are not valid ONNX models.",
            path.display()
        );
    }
    log::debug!(
        "Model file {}: {}",
        path.display(),
        cache_common::describe_file(path)
    );
    Ok(())
}

/// Return a cached copy of `spec`, downloading it if absent or invalid
pub fn get_or_download_model(spec: &DownloadSpec) -> Result<PathBuf> {
    let cache_dir = cache_common::model_cache_dir()?;
    let model_path = cache_dir.join(spec.cache_file_name());
    log::debug!("Model cache path: {}", model_path.display());

    if cached_copy_is_usable(&model_path, spec)? {
        log::info!(
            "{}Using cached model: {}",
            symbols::completed_successfully(),
            model_path.display()
        );
        return Ok(model_path);
    }

    download_model(&spec.url, &model_path)?;

    match &spec.md5_checksum {
        Some(checksum) => {
            let actual = cache_common::calculate_md5(&model_path)?;
            if !actual.eq_ignore_ascii_case(checksum.trim()) {
                let file_info = cache_common::describe_file(&model_path);
                fs::remove_file(&model_path).ok();
                bail!(
                    "Downloaded model failed checksum verification.\n\
                     Expected: {checksum}\n\
                     Actual:   {actual}\n\
                     File:     {file_info}\n\
                     URL:      {}",
                    spec.url
                );
            }
            log::info!(
                "{}Model downloaded and verified",
                symbols::completed_successfully()
            );
        }
        None => log::warn!(
            "{}Model downloaded without a checksum; integrity not verified",
            symbols::warning()
        ),
    }

    Ok(model_path)
}

/// Empty or checksum-mismatched cache entries are removed
fn cached_copy_is_usable(model_path: &Path, spec: &DownloadSpec) -> Result<bool> {
    let Ok(metadata) = fs::metadata(model_path) else {
        return Ok(false);
    };

    if metadata.len() == 0 {
        log::warn!(
            "{}Cached model is empty, re-downloading",
            symbols::warning()
        );
        fs::remove_file(model_path)?;
        return Ok(false);
    }

    match &spec.md5_checksum {
        Some(checksum) => {
            if cache_common::verify_checksum(model_path, checksum)? {
                Ok(true)
            } else {
                log::warn!(
                    "{}Cached model has an unexpected checksum, re-downloading",
                    symbols::warning()
                );
                fs::remove_file(model_path)?;
                Ok(false)
            }
        }
        None => {
            log::debug!("Reusing unverified cached download (no checksum given)");
            Ok(true)
        }
    }
}

fn download_model(url: &str, output_path: &Path) -> Result<()> {
    log::info!("Downloading model from: {url}");

    let client = reqwest::blocking::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| anyhow!("Failed to send HTTP request: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("HTTP request failed with status: {status}");
    }

    let content_length = response.content_length();
    let progress_bar = match content_length {
        Some(length) => {
            let pb = ProgressBar::new(length);
            let style = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})")
                .map_err(|e| anyhow!("Failed to create progress style: {e}"))?
                .progress_chars("#> ");
            pb.set_style(style);
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_message("Downloading model (unknown size)...");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    };
    add_progress_bar(progress_bar.clone());

    // Stream into a temporary name so an interrupted download never looks cached.
    let partial_path = output_path.with_extension("part");
    let result = stream_to_file(&mut response, &partial_path, &progress_bar);

    progress_bar.finish_and_clear();
    remove_progress_bar(&progress_bar);

    let downloaded = match result {
        Ok(n) => n,
        Err(e) => {
            fs::remove_file(&partial_path).ok();
            return Err(e);
        }
    };

    if downloaded == 0 {
        fs::remove_file(&partial_path).ok();
        bail!("Downloaded file is empty (0 bytes)");
    }
    if let Some(expected) = content_length {
        if downloaded != expected {
            log::warn!(
                "{}Size mismatch: expected {expected} bytes, got {downloaded} bytes",
                symbols::warning()
            );
        }
    }

    fs::rename(&partial_path, output_path).with_context(|| {
        format!(
            "Failed to move download into place at {}",
            output_path.display()
        )
    })?;

    log::info!(
        "{}Model downloaded to: {}",
        symbols::save_file(),
        output_path.display()
    );
    Ok(())
}

fn stream_to_file(reader: &mut impl Read, path: &Path, pb: &ProgressBar) -> Result<u64> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut buffer = [0u8; 8192];
    let mut downloaded = 0u64;

    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| anyhow!("Failed to read response data: {e}"))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])
            .with_context(|| format!("Failed to write to {}", path.display()))?;
        downloaded += n as u64;
        pb.set_position(downloaded);
    }

    file.flush()?;
    file.sync_all()?;
    Ok(downloaded)
}
