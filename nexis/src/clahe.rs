//! Contrast Limited Adaptive Histogram Equalization.
//!
//! The image is split into a grid of tiles. Each tile gets its own
//! equalization lookup table built from a clipped histogram, and every
//! output pixel is bilinearly blended from the four nearest tile tables.
//! Images that do not divide evenly into the grid are padded by reflection
//! (without repeating the edge pixel) for histogram purposes only.

use anyhow::{ensure, Result};
use image::{GrayImage, Luma, RgbImage};

use crate::color_space::{lab_to_rgb, rgb_to_lab};

const BINS: usize = 256;

/// Largest number of tiles along either axis of the grid
pub const MAX_TILES: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaheConfig {
    /// Relative clip limit; values <= 0 disable clipping
    pub clip_limit: f32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            tiles_x: 8,
            tiles_y: 8,
        }
    }
}

fn reflect_101(i: i64, len: i64) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let m = i.rem_euclid(period);
    (if m >= len { period - m } else { m }) as usize
}

/// Histogram of one tile, read through reflect-101 padding
fn tile_histogram(src: &GrayImage, x0: u32, y0: u32, tile_w: u32, tile_h: u32) -> [u32; BINS] {
    let (w, h) = (i64::from(src.width()), i64::from(src.height()));
    let mut hist = [0u32; BINS];
    for ty in 0..tile_h {
        let y = reflect_101(i64::from(y0 + ty), h) as u32;
        for tx in 0..tile_w {
            let x = reflect_101(i64::from(x0 + tx), w) as u32;
            hist[src.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    hist
}

/// Clip the histogram at `limit` and spread the excess over all bins
fn clip_histogram(hist: &mut [u32; BINS], limit: u32) {
    let mut clipped = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            clipped += *count - limit;
            *count = limit;
        }
    }

    let batch = clipped / BINS as u32;
    let mut residual = clipped - batch * BINS as u32;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (BINS / residual as usize).max(1);
        for count in hist.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *count += 1;
            residual -= 1;
        }
    }
}

fn equalization_lut(hist: &[u32; BINS], tile_area: u32) -> [u8; BINS] {
    let scale = 255.0 / tile_area as f32;
    let mut lut = [0u8; BINS];
    let mut sum = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        sum += count;
        *entry = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Neighbouring tile indices and the weight of the second one
fn interpolation_axis(pos: u32, tile_size: u32, tiles: u32) -> (usize, usize, f32) {
    let t = pos as f32 / tile_size as f32 - 0.5;
    let first = t.floor();
    let weight = t - first;
    let first = first as i64;
    let lo = first.max(0) as usize;
    let hi = (first + 1).min(i64::from(tiles) - 1) as usize;
    (lo, hi, weight)
}

/// Apply CLAHE to a single 8-bit channel
pub fn apply_clahe(src: &GrayImage, config: &ClaheConfig) -> Result<GrayImage> {
    let valid = 1..=MAX_TILES;
    ensure!(
        valid.contains(&config.tiles_x) && valid.contains(&config.tiles_y),
        "CLAHE tile grid must be between 1x1 and {MAX_TILES}x{MAX_TILES}, got {}x{}",
        config.tiles_x,
        config.tiles_y
    );

    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return Ok(src.clone());
    }

    let tile_w = w.div_ceil(config.tiles_x);
    let tile_h = h.div_ceil(config.tiles_y);
    let tile_area = tile_w * tile_h;

    let clip_limit = (config.clip_limit > 0.0)
        .then(|| ((config.clip_limit * tile_area as f32 / BINS as f32) as u32).max(1));

    let mut luts = Vec::with_capacity(config.tiles_x as usize * config.tiles_y as usize);
    for ty in 0..config.tiles_y {
        for tx in 0..config.tiles_x {
            let mut hist = tile_histogram(src, tx * tile_w, ty * tile_h, tile_w, tile_h);
            if let Some(limit) = clip_limit {
                clip_histogram(&mut hist, limit);
            }
            luts.push(equalization_lut(&hist, tile_area));
        }
    }
    let lut_at = |tx: usize, ty: usize| &luts[ty * config.tiles_x as usize + tx];

    let x_axis: Vec<_> = (0..w)
        .map(|x| interpolation_axis(x, tile_w, config.tiles_x))
        .collect();

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let (ty1, ty2, ya) = interpolation_axis(y, tile_h, config.tiles_y);
        for (x, &(tx1, tx2, xa)) in x_axis.iter().enumerate() {
            let v = src.get_pixel(x as u32, y).0[0] as usize;
            let top =
                f32::from(lut_at(tx1, ty1)[v]) * (1.0 - xa) + f32::from(lut_at(tx2, ty1)[v]) * xa;
            let bottom =
                f32::from(lut_at(tx1, ty2)[v]) * (1.0 - xa) + f32::from(lut_at(tx2, ty2)[v]) * xa;
            let blended = top * (1.0 - ya) + bottom * ya;
            out.put_pixel(x as u32, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }

    Ok(out)
}

/// Equalize lightness in Lab space, leaving chroma untouched
pub fn enhance_luminance(img: &RgbImage, config: &ClaheConfig) -> Result<RgbImage> {
    let mut lab = rgb_to_lab(img);
    lab.l = apply_clahe(&lab.l, config)?;
    lab_to_rgb(&lab)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(w: u32, h: u32, lo: u8, hi: u8) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| {
            let span = f32::from(hi - lo);
            Luma([lo + (span * x as f32 / (w - 1) as f32).round() as u8])
        })
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(0, 5), 0);
        assert_eq!(reflect_101(4, 5), 4);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 1), 0);
    }

    #[test]
    fn test_clip_histogram_preserves_total() {
        let mut hist = [0u32; BINS];
        hist[10] = 500;
        hist[200] = 12;
        clip_histogram(&mut hist, 20);
        assert_eq!(hist.iter().sum::<u32>(), 512);
        assert!(hist[10] <= 20 + 2);
    }

    #[test]
    fn test_constant_image_stays_constant() {
        let src = GrayImage::from_pixel(37, 23, Luma([90]));
        let out = apply_clahe(&src, &ClaheConfig::default()).unwrap();

        assert_eq!(out.dimensions(), src.dimensions());
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn test_single_tile_preserves_intensity_order() {
        let src = gradient(64, 16, 0, 255);
        let config = ClaheConfig {
            clip_limit: 2.0,
            tiles_x: 1,
            tiles_y: 1,
        };
        let out = apply_clahe(&src, &config).unwrap();

        for y in 0..16 {
            for x in 1..64 {
                assert!(out.get_pixel(x, y).0[0] >= out.get_pixel(x - 1, y).0[0]);
            }
        }
    }

    #[test]
    fn test_low_contrast_is_stretched() {
        let src = gradient(128, 128, 100, 140);
        let out = apply_clahe(&src, &ClaheConfig::default()).unwrap();

        let range = |img: &GrayImage| {
            let (lo, hi) = img
                .pixels()
                .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
            hi - lo
        };
        assert!(range(&out) > range(&src));
    }

    #[test]
    fn test_grid_larger_than_image() {
        let src = gradient(5, 3, 0, 200);
        let out = apply_clahe(&src, &ClaheConfig::default()).unwrap();
        assert_eq!(out.dimensions(), (5, 3));
    }

    #[test]
    fn test_zero_grid_rejected() {
        let config = ClaheConfig {
            tiles_x: 0,
            ..ClaheConfig::default()
        };
        assert!(apply_clahe(&GrayImage::new(4, 4), &config).is_err());
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let config = ClaheConfig {
            tiles_x: 70_000,
            tiles_y: 70_000,
            ..ClaheConfig::default()
        };
        let err = apply_clahe(&gradient(4, 4, 0, 200), &config).unwrap_err();
        assert!(err.to_string().contains("64x64"));

        let widest = ClaheConfig {
            tiles_x: MAX_TILES,
            tiles_y: 1,
            ..ClaheConfig::default()
        };
        let out = apply_clahe(&gradient(4, 4, 0, 200), &widest).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
    }

    #[test]
    fn test_enhance_luminance_keeps_gray_neutral() {
        let img = RgbImage::from_fn(32, 32, |x, y| {
            let v = (60 + x + y) as u8;
            Rgb([v, v, v])
        });
        let out = enhance_luminance(&img, &ClaheConfig::default()).unwrap();

        assert_eq!(out.dimensions(), img.dimensions());
        for p in out.pixels() {
            let [r, g, b] = p.0;
            assert!(r.abs_diff(g) <= 2 && g.abs_diff(b) <= 2, "{:?}", p);
        }
    }
}
