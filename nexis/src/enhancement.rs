//! Super-resolution followed by CLAHE on the Lab lightness channel.

use anyhow::Result;
use image::DynamicImage;
use ort::session::Session;

use crate::clahe::{enhance_luminance, ClaheConfig};
use crate::config::EnhanceConfig;
use crate::image_input::{ExtensionPolicy, ImageInput, Traversal};
use crate::model_processing::{run_model_processing, ModelProcessor, RunSummary};
use crate::super_resolution::SuperResolver;

pub fn run_enhancement(config: EnhanceConfig) -> Result<RunSummary> {
    if config.clahe.is_none() {
        log::info!("CLAHE disabled; images will only be upscaled");
    }
    run_model_processing::<EnhanceProcessor>(config)
}

pub struct EnhanceProcessor {
    resolver: SuperResolver,
    clahe: Option<ClaheConfig>,
}

/// Equalize lightness while keeping any alpha channel as it is
pub fn apply_contrast(image: DynamicImage, clahe: &ClaheConfig) -> Result<DynamicImage> {
    let equalized = enhance_luminance(&image.to_rgb8(), clahe)?;
    if !image.color().has_alpha() {
        return Ok(DynamicImage::ImageRgb8(equalized));
    }

    let mut rgba = image.to_rgba8();
    for (dst, src) in rgba.pixels_mut().zip(equalized.pixels()) {
        dst.0[..3].copy_from_slice(&src.0);
    }
    Ok(DynamicImage::ImageRgba8(rgba))
}

impl ModelProcessor for EnhanceProcessor {
    type Config = EnhanceConfig;
    const NAME: &'static str = "enhance";

    fn traversal() -> Traversal {
        Traversal::Flat
    }

    fn extension_policy() -> ExtensionPolicy {
        ExtensionPolicy::with_webp()
    }

    fn from_session(session: Session, config: &EnhanceConfig) -> Result<Self> {
        Ok(Self {
            resolver: SuperResolver::new(session, config.algorithm, config.scale)?,
            clahe: config.clahe.map(ClaheConfig::from),
        })
    }

    fn process_image(&mut self, image: &DynamicImage, _input: &ImageInput) -> Result<DynamicImage> {
        let upscaled = self.resolver.upsample(image)?;
        match &self.clahe {
            Some(clahe) => apply_contrast(upscaled, clahe),
            None => Ok(upscaled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_contrast_keeps_alpha() {
        let img = RgbaImage::from_fn(16, 16, |x, y| {
            let v = (100 + x + y) as u8;
            Rgba([v, v, v, (x * 16) as u8])
        });
        let out = apply_contrast(DynamicImage::ImageRgba8(img.clone()), &ClaheConfig::default())
            .unwrap()
            .to_rgba8();

        assert_eq!(out.dimensions(), img.dimensions());
        for (a, b) in out.pixels().zip(img.pixels()) {
            assert_eq!(a.0[3], b.0[3]);
        }
    }

    #[test]
    fn test_contrast_on_rgb_stays_rgb() {
        let img = DynamicImage::new_rgb8(10, 7);
        let out = apply_contrast(img, &ClaheConfig::default()).unwrap();
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!((out.width(), out.height()), (10, 7));
    }

    #[test]
    fn test_enhance_is_flat() {
        assert_eq!(EnhanceProcessor::traversal(), Traversal::Flat);
    }
}
