//! Model processing framework shared by every batch command.
//!
//! A command supplies a `ModelProcessor` (how to turn one decoded image into
//! one output image) and a `ModelConfig`; `run_model_processing` does the
//! rest: precondition checks, model loading, directory traversal, per-file
//! error isolation, output writing and the optional run report.

use anyhow::{Context, Result};
use chrono::Utc;
use image::DynamicImage;
use ort::session::Session;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

use crate::color_utils::{progress::create_batch_progress_bar, symbols};
use crate::config::BaseModelConfig;
use crate::image_input::{
    open_image, scan_directory, DirectoryScan, ExtensionPolicy, ImageInput, Traversal,
};
use crate::model_access::ModelAccess;
use crate::onnx_session::{create_onnx_session, SessionConfig};
use crate::output_manager::OutputManager;
use crate::path_validation::validate_path;
use crate::progress::remove_progress_bar;
use crate::run_report::RunReport;

/// Configuration trait for models that can be processed generically
pub trait ModelConfig: ModelAccess + Serialize {
    fn base(&self) -> &BaseModelConfig;
}

/// Core trait that all batch commands implement
pub trait ModelProcessor: Sized {
    type Config: ModelConfig;

    /// Command name used in logs and the run report
    const NAME: &'static str;

    fn traversal() -> Traversal;

    fn extension_policy() -> ExtensionPolicy;

    /// Wrap a freshly created session; called once per run
    fn from_session(session: Session, config: &Self::Config) -> Result<Self>;

    /// Transform one decoded image into the image to write
    fn process_image(&mut self, image: &DynamicImage, input: &ImageInput)
        -> Result<DynamicImage>;
}

/// What happened to one file of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Written { input: PathBuf, output: PathBuf },
    Skipped { path: PathBuf, reason: String },
    Failed { path: PathBuf, error: String },
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<FileOutcome>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Written { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }
}

fn process_one<P: ModelProcessor>(
    processor: &mut P,
    input: &ImageInput,
    output: &OutputManager,
) -> Result<PathBuf> {
    let img = open_image(&input.path)
        .with_context(|| format!("Could not load image {}", input.path.display()))?;
    log::debug!(
        "Processing {}: {}x{}",
        input.relative_path.display(),
        img.width(),
        img.height()
    );
    let processed = processor.process_image(&img, input)?;
    output.write_image(input, &processed)
}

/// Run every scanned image through `processor`.
///
/// Failures are logged and recorded; they never stop the batch.
pub fn process_batch<P: ModelProcessor>(
    processor: &mut P,
    scan: &DirectoryScan,
    output: &OutputManager,
) -> RunSummary {
    let mut summary = RunSummary::default();
    summary
        .outcomes
        .extend(scan.skipped.iter().map(|path| FileOutcome::Skipped {
            path: path.clone(),
            reason: "unsupported file extension".to_string(),
        }));

    let total = scan.images.len();
    let progress_bar = create_batch_progress_bar(total);

    for (index, input) in scan.images.iter().enumerate() {
        let started = Instant::now();
        let outcome = match process_one(processor, input, output) {
            Ok(output_path) => {
                log::info!(
                    "{}Processed {} ({}/{}) in {:.1}ms",
                    symbols::completed_successfully(),
                    input.relative_path.display(),
                    index + 1,
                    total,
                    started.elapsed().as_secs_f64() * 1000.0
                );
                FileOutcome::Written {
                    input: input.path.clone(),
                    output: output_path,
                }
            }
            Err(e) => {
                log::error!(
                    "{}Error processing {}: {e:#}",
                    symbols::operation_failed(),
                    input.file_name()
                );
                FileOutcome::Failed {
                    path: input.path.clone(),
                    error: format!("{e:#}"),
                }
            }
        };
        summary.outcomes.push(outcome);

        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
        remove_progress_bar(&pb);
    }

    summary
}

/// Generic batch processing function that works with any model
pub fn run_model_processing<P: ModelProcessor>(config: P::Config) -> Result<RunSummary> {
    let started_at = Utc::now();
    let base = config.base();

    validate_path(&base.source_dir, true)
        .with_context(|| format!("Invalid source directory for {}", P::NAME))?;

    let resolved = config.resolve_model()?;
    log::info!(
        "{}Model: {} ({})",
        symbols::resources_found(),
        resolved.path.display(),
        resolved.origin
    );

    let (session, model_info) = create_onnx_session(
        &resolved.path,
        &SessionConfig {
            device: &base.device,
        },
    )?;
    let mut processor = P::from_session(session, &config)?;

    std::fs::create_dir_all(&base.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            base.output_dir.display()
        )
    })?;

    let scan = scan_directory(
        &base.source_dir,
        P::traversal(),
        P::extension_policy(),
        Some(&base.output_dir),
    )?;
    if scan.images.is_empty() {
        log::warn!(
            "{}No images found in {}",
            symbols::warning(),
            base.source_dir.display()
        );
    } else {
        log::info!(
            "{}Found {} image(s) to process",
            symbols::resources_found(),
            scan.images.len()
        );
    }

    let batch_start = Instant::now();
    let output = OutputManager::new(&base.output_dir);
    let summary = process_batch(&mut processor, &scan, &output);
    log_summary(&summary, batch_start.elapsed().as_secs_f64());

    if base.write_metadata {
        let report = RunReport::build(
            P::NAME,
            &config,
            &model_info,
            resolved.origin,
            started_at,
            &summary,
        )?;
        let report_path = report.save(&base.output_dir)?;
        log::info!(
            "{}Run report written to {}",
            symbols::save_file(),
            report_path.display()
        );
    }

    Ok(summary)
}

fn log_summary(summary: &RunSummary, seconds: f64) {
    let (written, skipped, failed) = (summary.written(), summary.skipped(), summary.failed());
    if failed == 0 {
        log::info!(
            "{}Processed {written} image(s) in {seconds:.1}s ({skipped} skipped)",
            symbols::completed_successfully()
        );
    } else {
        log::warn!(
            "{}Processed {written} image(s) in {seconds:.1}s; {failed} failed, {skipped} skipped",
            symbols::completed_partially_successfully()
        );
    }
}
