//! Review a directory of results: list what is readable and optionally
//! render a contact sheet.

use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;
use crate::config::ViewConfig;
use crate::image_input::open_image;
use crate::output_manager::save_image;
use crate::run_report::REPORT_FILE_NAME;
use crate::yolo_postprocessing::label_font;

const MARGIN: u32 = 12;
const CAPTION_HEIGHT: u32 = 22;
const TITLE_HEIGHT: u32 = 36;
const BACKGROUND: Rgba<u8> = Rgba([32, 32, 32, 255]);
const TEXT: Rgba<u8> = Rgba([235, 235, 235, 255]);

/// An image that decoded successfully
#[derive(Debug)]
pub struct ViewedImage {
    pub path: PathBuf,
    pub name: String,
    pub image: DynamicImage,
}

#[derive(Debug, Default)]
pub struct ViewSummary {
    pub shown: Vec<String>,
    pub unreadable: Vec<PathBuf>,
    pub sheet: Option<PathBuf>,
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let is_report = path.file_name().is_some_and(|n| n == REPORT_FILE_NAME);
        if path.is_file() && !is_report {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Decode every file in `dir` in name order, logging each one
pub fn load_images(dir: &Path) -> Result<(Vec<ViewedImage>, Vec<PathBuf>)> {
    let mut images = Vec::new();
    let mut unreadable = Vec::new();
    for path in list_files(dir)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match open_image(&path) {
            Ok(image) => {
                log::info!("{name}: {}x{}", image.width(), image.height());
                images.push(ViewedImage { path, name, image });
            }
            Err(e) => {
                log::warn!("{}Could not load image {name}: {e}", symbols::warning());
                unreadable.push(path);
            }
        }
    }
    Ok((images, unreadable))
}

fn fit_text(font: &FontRef, scale: PxScale, text: &str, max_width: u32) -> String {
    if text_size(scale, font, text).0 <= max_width {
        return text.to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    while !chars.is_empty() {
        chars.pop();
        let candidate = format!("{}…", chars.iter().collect::<String>());
        if text_size(scale, font, &candidate).0 <= max_width {
            return candidate;
        }
    }
    String::new()
}

/// Lay thumbnails out in a titled grid, each captioned with its file name
pub fn render_contact_sheet(
    images: &[ViewedImage],
    title: &str,
    columns: u32,
    thumb_size: u32,
) -> Result<RgbaImage> {
    anyhow::ensure!(columns > 0, "Contact sheet needs at least one column");
    let font = label_font()?;
    let count = images.len() as u32;
    let cols = columns.min(count.max(1));
    let rows = count.div_ceil(cols).max(1);

    let cell_w = thumb_size + MARGIN;
    let cell_h = thumb_size + CAPTION_HEIGHT + MARGIN;
    let width = MARGIN + cols * cell_w;
    let height = TITLE_HEIGHT + MARGIN + rows * cell_h;
    let mut sheet = RgbaImage::from_pixel(width, height, BACKGROUND);

    let title_scale = PxScale::from(22.0);
    let title = fit_text(&font, title_scale, title, width - 2 * MARGIN);
    draw_text_mut(&mut sheet, TEXT, MARGIN as i32, 8, title_scale, &font, &title);

    let caption_scale = PxScale::from(14.0);
    for (i, viewed) in images.iter().enumerate() {
        let (col, row) = (i as u32 % cols, i as u32 / cols);
        let x0 = MARGIN + col * cell_w;
        let y0 = TITLE_HEIGHT + MARGIN + row * cell_h;

        let thumb = viewed.image.thumbnail(thumb_size, thumb_size).to_rgba8();
        let dx = (thumb_size - thumb.width()) / 2;
        let dy = (thumb_size - thumb.height()) / 2;
        imageops::overlay(
            &mut sheet,
            &thumb,
            i64::from(x0 + dx),
            i64::from(y0 + dy),
        );

        let caption = fit_text(&font, caption_scale, &viewed.name, thumb_size);
        draw_text_mut(
            &mut sheet,
            TEXT,
            x0 as i32,
            (y0 + thumb_size + 4) as i32,
            caption_scale,
            &font,
            &caption,
        );
    }

    Ok(sheet)
}

pub fn run_view(config: &ViewConfig) -> Result<ViewSummary> {
    let mut summary = ViewSummary::default();
    if !config.dir.is_dir() {
        log::info!("No images found in the directory");
        return Ok(summary);
    }

    let (images, unreadable) = load_images(&config.dir)?;
    summary.unreadable = unreadable;
    if images.is_empty() {
        log::info!("No images found in the directory");
        return Ok(summary);
    }
    summary.shown = images.iter().map(|v| v.name.clone()).collect();

    if let Some(sheet_path) = &config.sheet {
        let title = format!("{} ({} images)", config.dir.display(), images.len());
        let sheet = render_contact_sheet(&images, &title, config.columns, config.thumb_size)?;
        if let Some(parent) = sheet_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        save_image(&DynamicImage::ImageRgba8(sheet), sheet_path)?;
        log::info!(
            "{}Contact sheet written to {}",
            symbols::save_file(),
            sheet_path.display()
        );
        summary.sheet = Some(sheet_path.clone());
    }

    Ok(summary)
}
