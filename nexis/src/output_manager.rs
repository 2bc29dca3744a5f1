//! Output path management shared by all batch commands.
//!
//! Outputs always land at `output_root / relative_path`, so a recursive run
//! mirrors the source tree and a flat run produces a flat directory. File
//! names and extensions are kept as-is.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use log::debug;
use std::path::{Path, PathBuf};

use crate::image_input::ImageInput;

/// Maps accepted inputs to their location under the output root
pub struct OutputManager<'a> {
    output_root: &'a Path,
}

impl<'a> OutputManager<'a> {
    pub fn new(output_root: &'a Path) -> Self {
        Self { output_root }
    }

    /// Output path for an input, creating any missing parent directories
    pub fn output_path_for(&self, input: &ImageInput) -> Result<PathBuf> {
        let output_path = self.output_root.join(&input.relative_path);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory {}", parent.display())
            })?;
        }
        Ok(output_path)
    }

    /// Write a processed image to its mirrored path and return that path
    pub fn write_image(&self, input: &ImageInput, image: &DynamicImage) -> Result<PathBuf> {
        let output_path = self.output_path_for(input)?;
        save_image(image, &output_path)?;
        debug!("Wrote {}", output_path.display());
        Ok(output_path)
    }
}

/// Encode `image` in the format implied by `path`'s extension.
///
/// JPEG cannot carry alpha, so JPEG outputs are always RGB.
pub fn save_image(image: &DynamicImage, path: &Path) -> Result<()> {
    let format = ImageFormat::from_path(path)
        .with_context(|| format!("Unsupported output format for {}", path.display()))?;

    let encodable = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        ImageFormat::WebP if image.color().has_alpha() => {
            DynamicImage::ImageRgba8(image.to_rgba8())
        }
        ImageFormat::WebP => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image.clone(),
    };

    encodable
        .save_with_format(path, format)
        .with_context(|| format!("Failed to write image {}", path.display()))
}

/// Make a file path relative to a TOML file (used for the run report)
pub fn make_path_relative_to_toml(file_path: &Path, toml_path: &Path) -> String {
    toml_path
        .parent()
        .and_then(|toml_dir| file_path.strip_prefix(toml_dir).ok())
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|| file_path.to_string_lossy().to_string())
}
