//! Animal detection with a YOLOv8 COCO model.
//!
//! Each image is letterboxed to the model input, decoded, filtered and
//! suppressed per class, then annotated on a copy that keeps the original
//! file name in the output directory.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use log::debug;
use ort::{session::Session, value::Tensor};
use std::time::Instant;

use crate::config::DetectionConfig;
use crate::detection_obj::Detection;
use crate::image_input::{ExtensionPolicy, ImageInput, Traversal};
use crate::model_processing::{run_model_processing, ModelProcessor, RunSummary};
use crate::yolo_postprocessing::{draw_detections, postprocess_output};
use crate::yolo_preprocessing::preprocess_image;

const DEFAULT_MODEL_SIZE: u32 = 640;

pub fn run_detection(config: DetectionConfig) -> Result<RunSummary> {
    run_model_processing::<DetectionProcessor>(config)
}

pub struct DetectionProcessor {
    session: Session,
    input_name: String,
    output_name: String,
    model_size: u32,
    confidence: f32,
    iou_threshold: f32,
    animals_only: bool,
}

/// Square input size from an NCHW shape; negative dims are dynamic.
///
/// A fixed non-square input cannot take a square letterbox, so it is an error.
fn square_input_size(dims: &[i64]) -> Result<Option<u32>> {
    let fixed = |i: usize| dims.get(i).copied().filter(|&d| d > 0);
    match (fixed(2), fixed(3)) {
        (Some(h), Some(w)) if h != w => Err(anyhow!(
            "Model input {w}x{h} is not square; only square detection inputs are supported"
        )),
        (Some(d), _) | (None, Some(d)) => u32::try_from(d)
            .map(Some)
            .map_err(|_| anyhow!("Model input size {d} is out of range")),
        (None, None) => Ok(None),
    }
}

/// Square input size declared by the model, if it is static
fn declared_input_size(session: &Session) -> Result<Option<u32>> {
    let Some(input) = session.inputs.first() else {
        return Ok(None);
    };
    match &input.input_type {
        ort::value::ValueType::Tensor { shape, .. } => {
            let dims = shape.to_vec();
            debug!("Input: {}, shape: {:?}", input.name, dims);
            square_input_size(&dims)
        }
        other => {
            debug!("Unexpected input type: {other:?}");
            Ok(None)
        }
    }
}

/// Keep only animal classes when requested
pub fn filter_detections(detections: Vec<Detection>, animals_only: bool) -> Vec<Detection> {
    if animals_only {
        detections.into_iter().filter(Detection::is_animal).collect()
    } else {
        detections
    }
}

/// Copy of `img` with `detections` drawn on it, in the image's own colour type
pub fn annotate(img: &DynamicImage, detections: &[Detection]) -> Result<DynamicImage> {
    let mut rgba = img.to_rgba8();
    draw_detections(&mut rgba, detections)?;
    Ok(if img.color().has_alpha() {
        DynamicImage::ImageRgba8(rgba)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())
    })
}

impl DetectionProcessor {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let (orig_width, orig_height) = img.dimensions();
        let (input_tensor, letterbox) = preprocess_image(img, self.model_size)?;

        let inference_start = Instant::now();
        let input_value = Tensor::from_array(input_tensor)
            .map_err(|e| anyhow!("Failed to create input value: {e}"))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| anyhow!("Failed to run inference: {e}"))?;
        debug!(
            "Inference completed in {:.1} ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        let output_view = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| anyhow!("Failed to extract output array: {e}"))?;

        postprocess_output(
            &output_view,
            self.confidence,
            self.iou_threshold,
            &letterbox,
            orig_width,
            orig_height,
        )
    }
}

impl ModelProcessor for DetectionProcessor {
    type Config = DetectionConfig;
    const NAME: &'static str = "detect";

    fn traversal() -> Traversal {
        Traversal::Flat
    }

    fn extension_policy() -> ExtensionPolicy {
        ExtensionPolicy::without_webp()
    }

    fn from_session(session: Session, config: &DetectionConfig) -> Result<Self> {
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("Model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| anyhow!("Model has no outputs"))?;
        let model_size = declared_input_size(&session)?.unwrap_or_else(|| {
            debug!("Model input size is dynamic; using {DEFAULT_MODEL_SIZE}");
            DEFAULT_MODEL_SIZE
        });

        Ok(Self {
            session,
            input_name,
            output_name,
            model_size,
            confidence: config.confidence,
            iou_threshold: config.iou_threshold,
            animals_only: config.animals_only,
        })
    }

    fn process_image(&mut self, image: &DynamicImage, input: &ImageInput) -> Result<DynamicImage> {
        let detections = filter_detections(self.detect(image)?, self.animals_only);

        log::info!(
            "{}: {} detection(s)",
            input.relative_path.display(),
            detections.len()
        );
        for d in &detections {
            debug!(
                "  {} at ({:.0}, {:.0}, {:.0}, {:.0})",
                d.label(),
                d.x1,
                d.y1,
                d.x2,
                d.y2
            );
        }

        annotate(image, &detections)
    }
}
