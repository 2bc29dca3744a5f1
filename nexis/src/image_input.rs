use anyhow::{Context, Result};
use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::color_utils::symbols;

/// Extensions every command accepts (lowercase, without the dot).
pub const BASE_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// How far below the source root to look for images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Walk every subdirectory, keeping each file's relative location
    Recursive,
    /// Top-level entries only
    Flat,
}

/// Which file extensions count as images for a given command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionPolicy {
    pub include_webp: bool,
}

impl ExtensionPolicy {
    pub fn with_webp() -> Self {
        Self { include_webp: true }
    }

    pub fn without_webp() -> Self {
        Self {
            include_webp: false,
        }
    }

    /// Case-insensitive suffix match against the allow-list
    pub fn is_supported(&self, path: &Path) -> bool {
        let Some(ext) = path.extension() else {
            return false;
        };
        let ext_lower = ext.to_string_lossy().to_lowercase();
        BASE_IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
            || (self.include_webp && ext_lower == "webp")
    }
}

/// An accepted image and where it sits relative to the source root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub path: PathBuf,
    pub relative_path: PathBuf,
}

impl ImageInput {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Result of enumerating a source directory
#[derive(Debug, Default)]
pub struct DirectoryScan {
    pub images: Vec<ImageInput>,
    /// Files rejected by the extension allow-list; never opened
    pub skipped: Vec<PathBuf>,
}

/// Decode an image, sniffing the format from its contents rather than its
/// extension
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image)
}

/// Enumerate files under `root`, splitting them into images and skipped files.
///
/// Output is sorted by path so that reruns visit files in the same order.
/// Unreadable directory entries are logged and ignored. When `exclude` names
/// a directory inside `root` (an output directory, say), that subtree is not
/// entered.
pub fn scan_directory(
    root: &Path,
    traversal: Traversal,
    policy: ExtensionPolicy,
    exclude: Option<&Path>,
) -> Result<DirectoryScan> {
    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
    if traversal == Traversal::Flat {
        walker = walker.max_depth(1);
    }
    let excluded = exclude.and_then(|dir| dir.canonicalize().ok());

    let mut scan = DirectoryScan::default();

    let entries = walker.into_iter().filter_entry(|entry| match &excluded {
        Some(excluded) if entry.file_type().is_dir() => entry
            .path()
            .canonicalize()
            .map_or(true, |dir| &dir != excluded),
        _ => true,
    });

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!(
                    "{}Error reading directory entry under {}: {e}",
                    symbols::warning(),
                    root.display()
                );
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if !policy.is_supported(path) {
            log::info!(
                "{}Skipping non-image file: {}",
                symbols::skipped(),
                entry.file_name().to_string_lossy()
            );
            scan.skipped.push(path.to_path_buf());
            continue;
        }

        let relative_path = path
            .strip_prefix(root)
            .with_context(|| format!("{} is not under {}", path.display(), root.display()))?
            .to_path_buf();

        scan.images.push(ImageInput {
            path: path.to_path_buf(),
            relative_path,
        });
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_is_supported_image_file() {
        let policy = ExtensionPolicy::with_webp();
        for name in [
            "test.jpg",
            "test.jpeg",
            "test.png",
            "test.bmp",
            "test.tif",
            "test.tiff",
            "test.webp",
            "TEST.JPG",
            "Photo.TiFf",
        ] {
            assert!(policy.is_supported(Path::new(name)), "{name}");
        }

        assert!(!policy.is_supported(Path::new("test.txt")));
        assert!(!policy.is_supported(Path::new("test.gif")));
        assert!(!policy.is_supported(Path::new("test")));
        assert!(!policy.is_supported(Path::new("jpg")));
    }

    #[test]
    fn test_webp_only_when_enabled() {
        assert!(ExtensionPolicy::with_webp().is_supported(Path::new("a.WEBP")));
        assert!(!ExtensionPolicy::without_webp().is_supported(Path::new("a.webp")));
        assert!(ExtensionPolicy::without_webp().is_supported(Path::new("a.png")));
    }

    #[test]
    fn test_flat_scan_ignores_subdirectories() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("b.png"), b"fake image").unwrap();
        fs::write(root.join("a.jpg"), b"fake image").unwrap();
        fs::write(root.join("notes.txt"), b"text").unwrap();
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("c.png"), b"fake image").unwrap();

        let scan = scan_directory(root, Traversal::Flat, ExtensionPolicy::with_webp(), None).unwrap();

        let names: Vec<String> = scan.images.iter().map(|i| i.file_name()).collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
        assert_eq!(scan.skipped, vec![root.join("notes.txt")]);
    }

    #[test]
    fn test_recursive_scan_keeps_relative_paths() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("owls").join("night")).unwrap();
        fs::write(root.join("top.png"), b"fake image").unwrap();
        fs::write(root.join("owls").join("barn.jpg"), b"fake image").unwrap();
        fs::write(root.join("owls").join("night").join("tawny.tif"), b"fake").unwrap();
        fs::write(root.join("owls").join("readme.md"), b"text").unwrap();

        let scan =
            scan_directory(root, Traversal::Recursive, ExtensionPolicy::with_webp(), None)
                .unwrap();

        let relative: Vec<PathBuf> = scan
            .images
            .iter()
            .map(|i| i.relative_path.clone())
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("owls").join("barn.jpg"),
                PathBuf::from("owls").join("night").join("tawny.tif"),
                PathBuf::from("top.png"),
            ]
        );
        assert_eq!(scan.skipped, vec![root.join("owls").join("readme.md")]);
        for image in &scan.images {
            assert_eq!(root.join(&image.relative_path), image.path);
        }
    }

    #[test]
    fn test_empty_directory_scans_clean() {
        let temp_dir = tempdir().unwrap();
        let scan = scan_directory(
            temp_dir.path(),
            Traversal::Recursive,
            ExtensionPolicy::without_webp(),
            None,
        )
        .unwrap();
        assert!(scan.images.is_empty());
        assert!(scan.skipped.is_empty());
    }

    #[test]
    fn test_recursive_scan_skips_excluded_output_dir() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("out").join("owls")).unwrap();
        fs::create_dir(root.join("owls")).unwrap();
        fs::write(root.join("a.png"), b"fake image").unwrap();
        fs::write(root.join("owls").join("barn.jpg"), b"fake image").unwrap();
        fs::write(root.join("out").join("a.png"), b"fake image").unwrap();
        fs::write(root.join("out").join("owls").join("barn.jpg"), b"fake").unwrap();

        // relative spelling of the excluded dir still matches
        let exclude = root.join("owls").join("..").join("out");
        let scan = scan_directory(
            root,
            Traversal::Recursive,
            ExtensionPolicy::with_webp(),
            Some(&exclude),
        )
        .unwrap();

        let relative: Vec<PathBuf> = scan
            .images
            .iter()
            .map(|i| i.relative_path.clone())
            .collect();
        assert_eq!(
            relative,
            vec![PathBuf::from("a.png"), PathBuf::from("owls").join("barn.jpg")]
        );
    }

    #[test]
    fn test_missing_exclude_dir_is_ignored() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.png"), b"fake image").unwrap();
        let scan = scan_directory(
            root,
            Traversal::Recursive,
            ExtensionPolicy::with_webp(),
            Some(&root.join("not-created-yet")),
        )
        .unwrap();
        assert_eq!(scan.images.len(), 1);
    }

    #[test]
    fn test_open_image_ignores_misleading_extension() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("photo.jpg");
        image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        assert!(image::open(&path).is_err());
        let image = open_image(&path).unwrap();
        assert_eq!((image.width(), image.height()), (4, 4));
    }

    #[test]
    fn test_open_image_rejects_garbage() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("broken.png");
        fs::write(&path, b"not an image").unwrap();
        assert!(open_image(&path).is_err());
    }
}
