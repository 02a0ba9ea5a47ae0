//! Side-by-side diff visualizations.

use super::diff::{DiffKind, DifferenceRegion};
use crate::error::Result;
use image::{imageops, DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

/// Gap between the two halves, in pixels.
const GUTTER: u32 = 8;

const GUTTER_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

fn kind_color(kind: DiffKind) -> Rgb<u8> {
    match kind {
        DiffKind::Added => Rgb([0, 200, 0]),
        DiffKind::Removed => Rgb([220, 0, 0]),
        DiffKind::Changed => Rgb([230, 200, 0]),
    }
}

/// Source on the left, candidate on the right, regions outlined on both.
pub fn render_overlay(source: &GrayImage, candidate: &GrayImage, regions: &[DifferenceRegion]) -> RgbImage {
    let width = source.width() + GUTTER + candidate.width();
    let height = source.height().max(candidate.height());
    let mut canvas = RgbImage::from_pixel(width, height, GUTTER_COLOR);

    blit(&mut canvas, source, 0);
    let offset = source.width() + GUTTER;
    blit(&mut canvas, candidate, offset);

    for region in regions {
        let color = kind_color(region.kind);
        draw_rect(&mut canvas, region, 0, color);
        draw_rect(&mut canvas, region, offset, color);
    }
    canvas
}

/// Write the overlay for one page as `page-NNNN-diff.png` under `dir`.
pub fn save_overlay(
    dir: &Path,
    page: u32,
    source: &GrayImage,
    candidate: &GrayImage,
    regions: &[DifferenceRegion],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("page-{:04}-diff.png", page));
    render_overlay(source, candidate, regions).save(&path)?;
    Ok(path)
}

fn blit(canvas: &mut RgbImage, image: &GrayImage, x_offset: u32) {
    let rgb = DynamicImage::ImageLuma8(image.clone()).into_rgb8();
    imageops::replace(canvas, &rgb, i64::from(x_offset), 0);
}

fn draw_rect(canvas: &mut RgbImage, region: &DifferenceRegion, x_offset: u32, color: Rgb<u8>) {
    if region.width == 0 || region.height == 0 {
        return;
    }
    let rect = Rect::at((region.x + x_offset) as i32, region.y as i32).of_size(region.width, region.height);
    draw_hollow_rect_mut(canvas, rect, color);
}
