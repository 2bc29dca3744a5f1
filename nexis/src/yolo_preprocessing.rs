use anyhow::Result;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

/// YOLO's letterbox padding colour
const PAD_VALUE: u8 = 114;

/// How an image was placed inside the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn for_image(width: u32, height: u32, target_size: u32) -> Self {
        let scale = target_size as f32 / width.max(height) as f32;
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target_size);
        Self {
            scale,
            pad_x: ((target_size - new_w) / 2) as f32,
            pad_y: ((target_size - new_h) / 2) as f32,
        }
    }

    /// Map a point in model input coordinates back onto the original image
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }
}

/// Letterbox `img` into a `[1, 3, size, size]` RGB tensor scaled to `[0, 1]`
pub fn preprocess_image(img: &DynamicImage, target_size: u32) -> Result<(Array4<f32>, Letterbox)> {
    anyhow::ensure!(
        img.width() > 0 && img.height() > 0,
        "Cannot letterbox an empty image"
    );
    let rgb = img.to_rgb8();
    let letterbox = Letterbox::for_image(rgb.width(), rgb.height(), target_size);
    let new_w = ((rgb.width() as f32 * letterbox.scale).round() as u32).clamp(1, target_size);
    let new_h = ((rgb.height() as f32 * letterbox.scale).round() as u32).clamp(1, target_size);

    let resized = imageops::resize(&rgb, new_w, new_h, imageops::FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(target_size, target_size, Rgb([PAD_VALUE; 3]));
    imageops::replace(
        &mut canvas,
        &resized,
        i64::from(letterbox.pad_x as u32),
        i64::from(letterbox.pad_y as u32),
    );

    let size = target_size as usize;
    let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        f32::from(canvas.get_pixel(x as u32, y as u32).0[c]) / 255.0
    });
    Ok((tensor, letterbox))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_image_padded_vertically() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 0, 0])));
        let (tensor, lb) = preprocess_image(&img, 64).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.scale, 0.32);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 16.0);

        // padding row, then image row
        assert!((tensor[[0, 0, 0, 10]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 32, 10]] - 1.0).abs() < 0.01);
        assert!(tensor[[0, 1, 32, 10]].abs() < 0.01);
    }

    #[test]
    fn test_coordinate_mapping_inverts_transform() {
        let lb = Letterbox::for_image(640, 480, 320);
        for &(x, y) in &[(0.0, 0.0), (639.0, 479.0), (123.5, 321.25)] {
            let (mx, my) = lb.to_model(x, y);
            let (ox, oy) = lb.to_original(mx, my);
            assert!((ox - x).abs() < 1e-3 && (oy - y).abs() < 1e-3);
        }
    }

    #[test]
    fn test_tall_image_padded_horizontally() {
        let lb = Letterbox::for_image(100, 400, 640);
        assert_eq!(lb.scale, 1.6);
        assert_eq!(lb.pad_x, 240.0);
        assert_eq!(lb.pad_y, 0.0);
    }
}
