//! Colour space conversions used by super-resolution and contrast enhancement.
//!
//! Conversions follow the 8-bit conventions of common imaging libraries:
//! YCrCb uses the BT.601 luma weights with chroma offset by 128, and Lab
//! stores `L` scaled to 0..=255 and `a`/`b` offset by 128 (D65 white point).

use anyhow::{bail, Result};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};

/// Single channel of float samples in the 0..=255 range
pub type FloatPlane = ImageBuffer<Luma<f32>, Vec<f32>>;

pub struct YCrCbPlanes {
    pub y: FloatPlane,
    pub cr: FloatPlane,
    pub cb: FloatPlane,
}

pub fn rgb_to_ycrcb(img: &RgbImage) -> YCrCbPlanes {
    let (w, h) = img.dimensions();
    let mut y = FloatPlane::new(w, h);
    let mut cr = FloatPlane::new(w, h);
    let mut cb = FloatPlane::new(w, h);

    for (x, row, px) in img.enumerate_pixels() {
        let [r, g, b] = px.0.map(f32::from);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        y.put_pixel(x, row, Luma([luma]));
        cr.put_pixel(x, row, Luma([(r - luma) * 0.713 + 128.0]));
        cb.put_pixel(x, row, Luma([(b - luma) * 0.564 + 128.0]));
    }

    YCrCbPlanes { y, cr, cb }
}

pub fn ycrcb_to_rgb(planes: &YCrCbPlanes) -> Result<RgbImage> {
    let dims = planes.y.dimensions();
    if planes.cr.dimensions() != dims || planes.cb.dimensions() != dims {
        bail!(
            "Channel size mismatch: Y {:?}, Cr {:?}, Cb {:?}",
            dims,
            planes.cr.dimensions(),
            planes.cb.dimensions()
        );
    }

    let mut out = RgbImage::new(dims.0, dims.1);
    for (x, row, px) in out.enumerate_pixels_mut() {
        let luma = planes.y.get_pixel(x, row).0[0];
        let cr = planes.cr.get_pixel(x, row).0[0] - 128.0;
        let cb = planes.cb.get_pixel(x, row).0[0] - 128.0;
        *px = Rgb([
            to_u8(luma + 1.403 * cr),
            to_u8(luma - 0.714 * cr - 0.344 * cb),
            to_u8(luma + 1.773 * cb),
        ]);
    }
    Ok(out)
}

/// Lab image with an 8-bit lightness channel ready for histogram work
pub struct LabPlanes {
    /// L * 255 / 100
    pub l: GrayImage,
    /// a + 128
    pub a: FloatPlane,
    /// b + 128
    pub b: FloatPlane,
}

// D65 reference white
const XN: f32 = 0.950_456;
const ZN: f32 = 1.088_754;
const EPSILON: f32 = 0.008_856;
const KAPPA: f32 = 903.3;

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn rgb_to_lab(img: &RgbImage) -> LabPlanes {
    let (w, h) = img.dimensions();
    let mut l_plane = GrayImage::new(w, h);
    let mut a_plane = FloatPlane::new(w, h);
    let mut b_plane = FloatPlane::new(w, h);

    for (x, row, px) in img.enumerate_pixels() {
        let [r, g, b] = px.0.map(|c| srgb_to_linear(f32::from(c) / 255.0));

        let xv = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / XN;
        let yv = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
        let zv = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / ZN;

        let (fx, fy, fz) = (lab_f(xv), lab_f(yv), lab_f(zv));
        let lightness = if yv > EPSILON {
            116.0 * fy - 16.0
        } else {
            KAPPA * yv
        };

        l_plane.put_pixel(x, row, Luma([to_u8(lightness * 255.0 / 100.0)]));
        a_plane.put_pixel(x, row, Luma([500.0 * (fx - fy) + 128.0]));
        b_plane.put_pixel(x, row, Luma([200.0 * (fy - fz) + 128.0]));
    }

    LabPlanes {
        l: l_plane,
        a: a_plane,
        b: b_plane,
    }
}

pub fn lab_to_rgb(lab: &LabPlanes) -> Result<RgbImage> {
    let dims = lab.l.dimensions();
    if lab.a.dimensions() != dims || lab.b.dimensions() != dims {
        bail!("Lab channel size mismatch");
    }

    let mut out = RgbImage::new(dims.0, dims.1);
    for (x, row, px) in out.enumerate_pixels_mut() {
        let lightness = f32::from(lab.l.get_pixel(x, row).0[0]) * 100.0 / 255.0;
        let a = lab.a.get_pixel(x, row).0[0] - 128.0;
        let b = lab.b.get_pixel(x, row).0[0] - 128.0;

        let fy = (lightness + 16.0) / 116.0;
        let yv = if lightness > KAPPA * EPSILON {
            fy * fy * fy
        } else {
            lightness / KAPPA
        };
        let xv = lab_f_inv(fy + a / 500.0) * XN;
        let zv = lab_f_inv(fy - b / 200.0) * ZN;

        let r = 3.240_479 * xv - 1.537_150 * yv - 0.498_535 * zv;
        let g = -0.969_256 * xv + 1.875_991 * yv + 0.041_556 * zv;
        let bl = 0.055_648 * xv - 0.204_043 * yv + 1.057_311 * zv;

        *px = Rgb([r, g, bl].map(|c| to_u8(linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0)));
    }
    Ok(out)
}
