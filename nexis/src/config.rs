//! Configuration layer separating CLI arguments from internal run configurations.
//!
//! - `GlobalArgs`: flags accepted by every command
//! - `*Command`: clap structs holding only command-specific arguments
//! - `*Config`: what the processing code consumes, built with `from_args`
//!
//! `from_args` is where cross-field validation happens, so invalid
//! combinations are rejected before any model or file is touched.

use clap::{Args, Parser};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use serde::Serialize;
use std::path::PathBuf;

use crate::clahe::{ClaheConfig, MAX_TILES};
use crate::model_access::{CliModelInfo, ModelAccess};
use crate::model_processing::ModelConfig;
use crate::onnx_session::DEVICE_CHOICES;
use crate::super_resolution::SrAlgorithm;

pub const SR_MODEL_ENV: &str = "NEXIS_SR_MODEL_PATH";
pub const DETECT_MODEL_ENV: &str = "NEXIS_DETECT_MODEL_PATH";
pub const DEFAULT_DETECT_MODEL: &str = "yolov8n.onnx";

/// Parse probability value (must be between 0.0 and 1.0)
pub fn parse_probability(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&val) {
        return Err(format!("Must be between 0.0 and 1.0, got {val}"));
    }
    Ok(val)
}

pub fn parse_device(s: &str) -> Result<String, String> {
    let lower = s.to_ascii_lowercase();
    if DEVICE_CHOICES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(format!(
            "Unknown device '{s}'; expected one of {}",
            DEVICE_CHOICES.join(", ")
        ))
    }
}

/// Upscaling factor; per-algorithm support is checked in `from_args`
pub fn parse_scale(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(scale @ (2 | 3 | 4 | 8)) => Ok(scale),
        Ok(other) => Err(format!("Scale must be 2, 3, 4 or 8, got {other}")),
        Err(_) => Err(format!("Invalid scale: '{s}'")),
    }
}

pub fn parse_clip_limit(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(val.is_finite() && val > 0.0) {
        return Err(format!("Clip limit must be greater than 0, got {val}"));
    }
    Ok(val)
}

/// Parse a CLAHE tile grid given as `N` (square) or `COLSxROWS`
pub fn parse_tile_grid(s: &str) -> Result<(u32, u32), String> {
    let parse_one = |part: &str| -> Result<u32, String> {
        match part.trim().parse::<u32>() {
            Ok(0) => Err("Tile grid dimensions must be at least 1".to_string()),
            Ok(n) if n > MAX_TILES => Err(format!(
                "Tile grid dimensions must be at most {MAX_TILES}, got {n}"
            )),
            Ok(n) => Ok(n),
            Err(_) => Err(format!("Invalid tile grid: '{s}'")),
        }
    };
    match s.split_once(['x', 'X']) {
        Some((cols, rows)) => Ok((parse_one(cols)?, parse_one(rows)?)),
        None => {
            let n = parse_one(s)?;
            Ok((n, n))
        }
    }
}

/// Global CLI arguments that apply to all nexis commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Verbosity level (-q/-qq to quieten, -v/-vv for debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Device to use for inference (auto, cpu, cuda, coreml)
    #[arg(long, default_value = "auto", global = true, value_parser = parse_device)]
    pub device: String,

    /// Disable colored output (also respects NO_COLOR and NEXIS_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Write a nexis-run.toml report into the output directory
    #[arg(long, global = true)]
    pub metadata: bool,
}

/// Model location flags shared by every model-backed command
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Path to a model file (.onnx)
    #[arg(long)]
    pub model_path: Option<String>,

    /// URL to download the model from
    #[arg(long)]
    pub model_url: Option<String>,

    /// MD5 checksum for model verification (used with --model-url)
    #[arg(long)]
    pub model_checksum: Option<String>,
}

impl From<ModelArgs> for CliModelInfo {
    fn from(args: ModelArgs) -> Self {
        Self {
            model_path: args.model_path,
            model_url: args.model_url,
            model_checksum: args.model_checksum,
        }
    }
}

/// Base configuration common to all model-backed commands
#[derive(Debug, Clone, Serialize)]
pub struct BaseModelConfig {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Requested device, one of `DEVICE_CHOICES`
    pub device: String,
    #[serde(skip)]
    pub write_metadata: bool,
}

impl BaseModelConfig {
    fn from_global(global: &GlobalArgs, source_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            source_dir,
            output_dir,
            device: global.device.clone(),
            write_metadata: global.metadata,
        }
    }
}

fn check_model_args(model: &ModelArgs) -> Result<CliModelInfo, String> {
    let cli: CliModelInfo = model.clone().into();
    cli.validate().map_err(|e| e.to_string())?;
    Ok(cli)
}

fn check_scale(algorithm: SrAlgorithm, scale: u32) -> Result<(), String> {
    if algorithm.supported_scales().contains(&scale) {
        Ok(())
    } else {
        Err(format!(
            "{} does not support x{scale}; supported scales: {:?}",
            algorithm.model_name(),
            algorithm.supported_scales()
        ))
    }
}

/// CLI command for super-resolution of a directory tree
#[derive(Parser, Debug, Clone)]
pub struct UpscaleCommand {
    /// Directory to read images from (searched recursively)
    #[arg(value_name = "SOURCE_DIR")]
    pub source_dir: PathBuf,

    /// Directory to write upscaled images to; mirrors the source tree
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Super-resolution network (fsrcnn, espcn, lapsrn, edsr)
    #[arg(long, default_value = "fsrcnn")]
    pub algorithm: SrAlgorithm,

    /// Upscaling factor
    #[arg(long, default_value = "4", value_parser = parse_scale)]
    pub scale: u32,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpscaleConfig {
    #[serde(flatten)]
    pub base: BaseModelConfig,
    pub algorithm: SrAlgorithm,
    pub scale: u32,
    #[serde(skip)]
    pub model: CliModelInfo,
}

impl UpscaleConfig {
    pub fn from_args(global: &GlobalArgs, cmd: UpscaleCommand) -> Result<Self, String> {
        check_scale(cmd.algorithm, cmd.scale)?;
        Ok(Self {
            base: BaseModelConfig::from_global(global, cmd.source_dir, cmd.output_dir),
            algorithm: cmd.algorithm,
            scale: cmd.scale,
            model: check_model_args(&cmd.model)?,
        })
    }
}

/// CLI command for super-resolution followed by contrast enhancement
#[derive(Parser, Debug, Clone)]
pub struct EnhanceCommand {
    /// Directory to read images from (top level only)
    #[arg(value_name = "SOURCE_DIR")]
    pub source_dir: PathBuf,

    /// Directory to write enhanced images to
    #[arg(value_name = "OUTPUT_DIR", default_value = "enhanced_outputs")]
    pub output_dir: PathBuf,

    /// Super-resolution network (fsrcnn, espcn, lapsrn, edsr)
    #[arg(long, default_value = "edsr")]
    pub algorithm: SrAlgorithm,

    /// Upscaling factor
    #[arg(long, default_value = "4", value_parser = parse_scale)]
    pub scale: u32,

    /// Skip the CLAHE step and only upscale
    #[arg(long)]
    pub no_clahe: bool,

    /// CLAHE clip limit
    #[arg(long, default_value = "3.0", value_parser = parse_clip_limit)]
    pub clip_limit: f32,

    /// CLAHE tile grid, `N` or `COLSxROWS`
    #[arg(long, default_value = "8", value_parser = parse_tile_grid)]
    pub tile_grid: (u32, u32),

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhanceConfig {
    #[serde(flatten)]
    pub base: BaseModelConfig,
    pub algorithm: SrAlgorithm,
    pub scale: u32,
    /// `None` when `--no-clahe` is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clahe: Option<ClaheSettings>,
    #[serde(skip)]
    pub model: CliModelInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClaheSettings {
    pub clip_limit: f32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl From<ClaheSettings> for ClaheConfig {
    fn from(s: ClaheSettings) -> Self {
        ClaheConfig {
            clip_limit: s.clip_limit,
            tiles_x: s.tiles_x,
            tiles_y: s.tiles_y,
        }
    }
}

impl EnhanceConfig {
    pub fn from_args(global: &GlobalArgs, cmd: EnhanceCommand) -> Result<Self, String> {
        check_scale(cmd.algorithm, cmd.scale)?;
        let clahe = (!cmd.no_clahe).then_some(ClaheSettings {
            clip_limit: cmd.clip_limit,
            tiles_x: cmd.tile_grid.0,
            tiles_y: cmd.tile_grid.1,
        });
        Ok(Self {
            base: BaseModelConfig::from_global(global, cmd.source_dir, cmd.output_dir),
            algorithm: cmd.algorithm,
            scale: cmd.scale,
            clahe,
            model: check_model_args(&cmd.model)?,
        })
    }
}

/// CLI command for animal detection
#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    /// Directory to read images from (top level only)
    #[arg(value_name = "SOURCE_DIR")]
    pub source_dir: PathBuf,

    /// Directory to write annotated images to
    #[arg(value_name = "OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Confidence threshold for detections (0.0-1.0)
    #[arg(short, long, default_value = "0.3", value_parser = parse_probability)]
    pub confidence: f32,

    /// IoU threshold for non-maximum suppression (0.0-1.0)
    #[arg(long, default_value = "0.7", value_parser = parse_probability)]
    pub iou_threshold: f32,

    /// Keep only COCO animal classes (bird, cat, dog, horse, ...)
    #[arg(long)]
    pub animals_only: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionConfig {
    #[serde(flatten)]
    pub base: BaseModelConfig,
    pub confidence: f32,
    pub iou_threshold: f32,
    pub animals_only: bool,
    #[serde(skip)]
    pub model: CliModelInfo,
}

impl DetectionConfig {
    pub fn from_args(global: &GlobalArgs, cmd: DetectCommand) -> Result<Self, String> {
        Ok(Self {
            base: BaseModelConfig::from_global(global, cmd.source_dir, cmd.output_dir),
            confidence: cmd.confidence,
            iou_threshold: cmd.iou_threshold,
            animals_only: cmd.animals_only,
            model: check_model_args(&cmd.model)?,
        })
    }
}

/// CLI command for reviewing a directory of results
#[derive(Parser, Debug, Clone)]
pub struct ViewCommand {
    /// Directory of images to review
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Render a contact sheet of every readable image to this path
    #[arg(long, value_name = "PATH")]
    pub sheet: Option<PathBuf>,

    /// Thumbnails per contact sheet row
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u32).range(1..))]
    pub columns: u32,

    /// Longest side of each thumbnail in pixels
    #[arg(long, default_value = "256", value_parser = clap::value_parser!(u32).range(16..))]
    pub thumb_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    pub dir: PathBuf,
    pub sheet: Option<PathBuf>,
    pub columns: u32,
    pub thumb_size: u32,
}

impl ViewConfig {
    pub fn from_args(cmd: ViewCommand) -> Self {
        Self {
            dir: cmd.dir,
            sheet: cmd.sheet,
            columns: cmd.columns,
            thumb_size: cmd.thumb_size,
        }
    }
}

// Model lookup and ModelConfig implementations for model_processing integration

impl ModelAccess for UpscaleConfig {
    fn cli_model_info(&self) -> &CliModelInfo {
        &self.model
    }

    fn env_var_name(&self) -> &'static str {
        SR_MODEL_ENV
    }

    fn default_model_filename(&self) -> String {
        self.algorithm.default_model_filename(self.scale)
    }
}

impl ModelAccess for EnhanceConfig {
    fn cli_model_info(&self) -> &CliModelInfo {
        &self.model
    }

    fn env_var_name(&self) -> &'static str {
        SR_MODEL_ENV
    }

    fn default_model_filename(&self) -> String {
        self.algorithm.default_model_filename(self.scale)
    }
}

impl ModelAccess for DetectionConfig {
    fn cli_model_info(&self) -> &CliModelInfo {
        &self.model
    }

    fn env_var_name(&self) -> &'static str {
        DETECT_MODEL_ENV
    }

    fn default_model_filename(&self) -> String {
        DEFAULT_DETECT_MODEL.to_string()
    }
}

impl ModelConfig for UpscaleConfig {
    fn base(&self) -> &BaseModelConfig {
        &self.base
    }
}

impl ModelConfig for EnhanceConfig {
    fn base(&self) -> &BaseModelConfig {
        &self.base
    }
}

impl ModelConfig for DetectionConfig {
    fn base(&self) -> &BaseModelConfig {
        &self.base
    }
}
