use anyhow::Result;
use image::DynamicImage;
use ort::session::Session;

use crate::config::UpscaleConfig;
use crate::image_input::{ExtensionPolicy, ImageInput, Traversal};
use crate::model_processing::{run_model_processing, ModelProcessor, RunSummary};
use crate::super_resolution::SuperResolver;

pub fn run_upscale(config: UpscaleConfig) -> Result<RunSummary> {
    run_model_processing::<UpscaleProcessor>(config)
}

/// Upscales every image of a directory tree, mirroring it into the output
pub struct UpscaleProcessor {
    resolver: SuperResolver,
}

impl ModelProcessor for UpscaleProcessor {
    type Config = UpscaleConfig;
    const NAME: &'static str = "upscale";

    fn traversal() -> Traversal {
        Traversal::Recursive
    }

    fn extension_policy() -> ExtensionPolicy {
        ExtensionPolicy::with_webp()
    }

    fn from_session(session: Session, config: &UpscaleConfig) -> Result<Self> {
        Ok(Self {
            resolver: SuperResolver::new(session, config.algorithm, config.scale)?,
        })
    }

    fn process_image(&mut self, image: &DynamicImage, _input: &ImageInput) -> Result<DynamicImage> {
        self.resolver.upsample(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upscale_walks_recursively_and_accepts_webp() {
        assert_eq!(UpscaleProcessor::traversal(), Traversal::Recursive);
        assert!(UpscaleProcessor::extension_policy().is_supported(std::path::Path::new("a.WEBP")));
    }
}
