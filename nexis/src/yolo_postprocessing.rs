use std::collections::HashMap;

use crate::detection_obj::{class_name, Detection};
use crate::yolo_preprocessing::Letterbox;
use ab_glyph::{FontRef, PxScale};
use anyhow::{anyhow, bail, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use ndarray::ArrayViewD;

static FONT_BYTES: &[u8] = include_bytes!("../fonts/DejaVuSans.ttf");

const BOX_THICKNESS: i32 = 3;
const LABEL_SCALE: f32 = 18.0;

pub fn label_font() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(FONT_BYTES).map_err(|e| anyhow!("Failed to load label font: {e}"))
}

/// Per-class non-maximum suppression; boxes of different classes never suppress each other
pub fn nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut class_groups: HashMap<u32, Vec<Detection>> = HashMap::new();
    for detection in detections {
        class_groups
            .entry(detection.class_id)
            .or_default()
            .push(detection);
    }

    let mut all_results = Vec::new();
    for (_, mut class_detections) in class_groups {
        class_detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut suppressed = vec![false; class_detections.len()];
        for i in 0..class_detections.len() {
            if suppressed[i] {
                continue;
            }
            for j in (i + 1)..class_detections.len() {
                if !suppressed[j] && class_detections[i].iou(&class_detections[j]) > iou_threshold {
                    suppressed[j] = true;
                }
            }
        }

        all_results.extend(
            class_detections
                .into_iter()
                .zip(suppressed)
                .filter(|(_, s)| !s)
                .map(|(d, _)| d),
        );
    }

    all_results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    all_results
}

/// Decode a `[1, 4 + classes, boxes]` YOLOv8 output into detections on the original image.
///
/// Boxes are centre/size in model input pixels; the best class score is the confidence.
pub fn postprocess_output(
    output: &ArrayViewD<f32>,
    confidence_threshold: f32,
    iou_threshold: f32,
    letterbox: &Letterbox,
    img_width: u32,
    img_height: u32,
) -> Result<Vec<Detection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        bail!("Expected output shape [1, 4 + classes, boxes], got {shape:?}");
    }
    let (num_classes, num_boxes) = (shape[1] - 4, shape[2]);
    let (max_x, max_y) = (img_width as f32, img_height as f32);

    let mut detections = Vec::new();
    for i in 0..num_boxes {
        let (best_class, confidence) = (0..num_classes)
            .map(|c| (c, output[[0, 4 + c, i]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence <= confidence_threshold {
            continue;
        }

        let (cx, cy) = (output[[0, 0, i]], output[[0, 1, i]]);
        let (w, h) = (output[[0, 2, i]], output[[0, 3, i]]);
        let (x1, y1) = letterbox.to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_original(cx + w / 2.0, cy + h / 2.0);

        detections.push(Detection {
            x1: x1.clamp(0.0, max_x),
            y1: y1.clamp(0.0, max_y),
            x2: x2.clamp(0.0, max_x),
            y2: y2.clamp(0.0, max_y),
            confidence,
            class_id: best_class as u32,
            class_name: class_name(best_class as u32),
        });
    }

    Ok(nms(detections, iou_threshold))
}

/// Stable, distinct colour per class id
pub fn class_color(class_id: u32) -> Rgba<u8> {
    const PALETTE: [[u8; 3]; 10] = [
        [255, 56, 56],
        [255, 157, 151],
        [255, 112, 31],
        [255, 178, 29],
        [207, 210, 49],
        [72, 249, 10],
        [26, 147, 52],
        [0, 212, 187],
        [44, 153, 168],
        [0, 194, 255],
    ];
    let [r, g, b] = PALETTE[class_id as usize % PALETTE.len()];
    Rgba([r, g, b, 255])
}

/// Draw boxes and `name confidence` labels onto `img`
pub fn draw_detections(img: &mut RgbaImage, detections: &[Detection]) -> Result<()> {
    let font = label_font()?;
    let scale = PxScale::from(LABEL_SCALE);
    let (img_w, img_h) = (img.width() as i32, img.height() as i32);

    for detection in detections {
        let color = class_color(detection.class_id);
        let x1 = detection.x1.round() as i32;
        let y1 = detection.y1.round() as i32;
        let x2 = detection.x2.round() as i32;
        let y2 = detection.y2.round() as i32;

        for t in 0..BOX_THICKNESS {
            let (w, h) = (x2 - x1 - 2 * t, y2 - y1 - 2 * t);
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(img, Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32), color);
        }

        let label = detection.label();
        let (text_w, text_h) = text_size(scale, &font, &label);
        let (bg_w, bg_h) = (text_w as i32 + 4, text_h as i32 + 4);
        // Above the box when there is room, otherwise just inside it
        let label_y = if y1 - bg_h >= 0 { y1 - bg_h } else { y1.min(img_h - 1) };
        let label_x = x1.clamp(0, (img_w - 1).max(0));

        draw_filled_rect_mut(
            img,
            Rect::at(label_x, label_y).of_size(bg_w as u32, bg_h as u32),
            color,
        );
        draw_text_mut(
            img,
            Rgba([255, 255, 255, 255]),
            label_x + 2,
            label_y + 2,
            scale,
            &font,
            &label,
        );
    }
    Ok(())
}
