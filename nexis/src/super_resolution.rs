//! Single-image super-resolution with pretrained ONNX networks.
//!
//! Two families of network are supported:
//! - luminance networks (FSRCNN, ESPCN, LapSRN) take the Y channel of YCrCb
//!   scaled to `[0, 1]` as `[1, 1, H, W]`; chroma is resized bicubically and
//!   merged back in
//! - EDSR takes BGR in `[0, 255]` with the DIV2K channel mean removed, as
//!   `[1, 3, H, W]`, and the mean is added back to its output

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use ndarray::{Array4, ArrayView4, Ix4};
use ort::{session::Session, value::Tensor};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::color_space::{rgb_to_ycrcb, ycrcb_to_rgb, FloatPlane, YCrCbPlanes};

/// DIV2K mean in B, G, R order
const EDSR_BGR_MEAN: [f32; 3] = [103.154_58, 111.561_55, 114.356_3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SrAlgorithm {
    Fsrcnn,
    Espcn,
    Lapsrn,
    Edsr,
}

/// Tensor layout a network expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkInput {
    Luminance,
    BgrMeanShifted,
}

impl SrAlgorithm {
    pub const ALL: [SrAlgorithm; 4] = [
        SrAlgorithm::Fsrcnn,
        SrAlgorithm::Espcn,
        SrAlgorithm::Lapsrn,
        SrAlgorithm::Edsr,
    ];

    /// Name used in model file names, e.g. `FSRCNN_x4.onnx`
    pub fn model_name(self) -> &'static str {
        match self {
            SrAlgorithm::Fsrcnn => "FSRCNN",
            SrAlgorithm::Espcn => "ESPCN",
            SrAlgorithm::Lapsrn => "LapSRN",
            SrAlgorithm::Edsr => "EDSR",
        }
    }

    pub fn supported_scales(self) -> &'static [u32] {
        match self {
            SrAlgorithm::Lapsrn => &[2, 4, 8],
            _ => &[2, 3, 4],
        }
    }

    pub fn default_model_filename(self, scale: u32) -> String {
        format!("{}_x{scale}.onnx", self.model_name())
    }

    fn network_input(self) -> NetworkInput {
        match self {
            SrAlgorithm::Edsr => NetworkInput::BgrMeanShifted,
            _ => NetworkInput::Luminance,
        }
    }
}

impl fmt::Display for SrAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.model_name().to_lowercase())
    }
}

impl FromStr for SrAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SrAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.model_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("Unknown algorithm '{s}' (expected fsrcnn, espcn, lapsrn or edsr)")
            })
    }
}

/// `[1, 1, H, W]` tensor of luminance in `[0, 1]`
fn luminance_tensor(y: &FloatPlane) -> Array4<f32> {
    let (w, h) = y.dimensions();
    Array4::from_shape_fn((1, 1, h as usize, w as usize), |(_, _, row, col)| {
        y.get_pixel(col as u32, row as u32).0[0] / 255.0
    })
}

/// First channel of a `[1, C, H, W]` network output, rescaled to `[0, 255]`
fn luminance_from_tensor(output: &ArrayView4<f32>) -> FloatPlane {
    let (_, _, h, w) = output.dim();
    FloatPlane::from_fn(w as u32, h as u32, |col, row| {
        Luma([(output[[0, 0, row as usize, col as usize]] * 255.0).clamp(0.0, 255.0)])
    })
}

/// `[1, 3, H, W]` BGR tensor with the dataset mean removed
fn bgr_mean_tensor(rgb: &RgbImage) -> Array4<f32> {
    let (w, h) = rgb.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, row, col)| {
        let px = rgb.get_pixel(col as u32, row as u32);
        // channel 0 is blue
        f32::from(px.0[2 - c]) - EDSR_BGR_MEAN[c]
    })
}

fn rgb_from_bgr_tensor(output: &ArrayView4<f32>) -> RgbImage {
    let (_, _, h, w) = output.dim();
    RgbImage::from_fn(w as u32, h as u32, |col, row| {
        let (row, col) = (row as usize, col as usize);
        let channel = |c: usize| {
            (output[[0, c, row, col]] + EDSR_BGR_MEAN[c])
                .round()
                .clamp(0.0, 255.0) as u8
        };
        Rgb([channel(2), channel(1), channel(0)])
    })
}

/// The network must produce exactly `scale` times the input in each dimension
fn check_output_shape(
    output: &ArrayView4<f32>,
    input_size: (u32, u32),
    scale: u32,
    min_channels: usize,
) -> Result<()> {
    let (_, channels, h, w) = output.dim();
    let expected = (input_size.0 * scale, input_size.1 * scale);
    if (w as u32, h as u32) != expected || channels < min_channels {
        bail!(
            "Model produced {w}x{h} with {channels} channel(s); expected {}x{} for a x{scale} model. \
             Check that the model file matches --scale",
            expected.0,
            expected.1
        );
    }
    Ok(())
}

/// A loaded super-resolution network bound to one algorithm and scale
pub struct SuperResolver {
    session: Session,
    algorithm: SrAlgorithm,
    scale: u32,
    input_name: String,
    output_name: String,
}

impl SuperResolver {
    pub fn new(session: Session, algorithm: SrAlgorithm, scale: u32) -> Result<Self> {
        if !algorithm.supported_scales().contains(&scale) {
            bail!(
                "{} does not support x{scale} (supported: {:?})",
                algorithm.model_name(),
                algorithm.supported_scales()
            );
        }
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("Model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| anyhow!("Model has no outputs"))?;
        log::debug!(
            "{} x{scale}: input '{input_name}', output '{output_name}'",
            algorithm.model_name()
        );

        Ok(Self {
            session,
            algorithm,
            scale,
            input_name,
            output_name,
        })
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<Array4<f32>> {
        let tensor = Tensor::from_array(input)
            .map_err(|e| anyhow!("Failed to create input tensor: {e}"))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| anyhow!("Failed to run inference: {e}"))?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| anyhow!("Failed to extract output array: {e}"))?;
        output
            .to_owned()
            .into_dimensionality::<Ix4>()
            .context("Expected a 4D model output")
    }

    fn upsample_luminance(&mut self, rgb: &RgbImage) -> Result<RgbImage> {
        let (w, h) = rgb.dimensions();
        let planes = rgb_to_ycrcb(rgb);

        let output = self.infer(luminance_tensor(&planes.y))?;
        check_output_shape(&output.view(), (w, h), self.scale, 1)?;

        let (out_w, out_h) = (w * self.scale, h * self.scale);
        let upscaled = YCrCbPlanes {
            y: luminance_from_tensor(&output.view()),
            cr: imageops::resize(&planes.cr, out_w, out_h, FilterType::CatmullRom),
            cb: imageops::resize(&planes.cb, out_w, out_h, FilterType::CatmullRom),
        };
        ycrcb_to_rgb(&upscaled)
    }

    fn upsample_bgr(&mut self, rgb: &RgbImage) -> Result<RgbImage> {
        let output = self.infer(bgr_mean_tensor(rgb))?;
        check_output_shape(&output.view(), rgb.dimensions(), self.scale, 3)?;
        Ok(rgb_from_bgr_tensor(&output.view()))
    }

    /// Upscale `img` by the configured factor.
    ///
    /// An alpha channel, if present, is resized bicubically and reattached.
    pub fn upsample(&mut self, img: &DynamicImage) -> Result<DynamicImage> {
        let rgb = img.to_rgb8();
        let upscaled = match self.algorithm.network_input() {
            NetworkInput::Luminance => self.upsample_luminance(&rgb)?,
            NetworkInput::BgrMeanShifted => self.upsample_bgr(&rgb)?,
        };

        if !img.color().has_alpha() {
            return Ok(DynamicImage::ImageRgb8(upscaled));
        }

        let rgba = img.to_rgba8();
        let alpha = GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            Luma([rgba.get_pixel(x, y).0[3]])
        });
        Ok(DynamicImage::ImageRgba8(attach_alpha(&upscaled, &alpha)))
    }
}

fn attach_alpha(rgb: &RgbImage, alpha: &GrayImage) -> RgbaImage {
    let (w, h) = rgb.dimensions();
    let alpha = imageops::resize(alpha, w, h, FilterType::CatmullRom);
    RgbaImage::from_fn(w, h, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        image::Rgba([r, g, b, alpha.get_pixel(x, y).0[0]])
    })
}
