//! Localized difference regions between two page bitmaps.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};

/// How a region differs between source and candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Ink present in the candidate but not the source
    Added,
    /// Ink present in the source but missing from the candidate
    Removed,
    /// Ink present on both sides but different
    Changed,
}

/// Coarse severity bucket derived from the region's share of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityLevel {
    /// Bucket for a region covering `fraction` of the page area.
    pub fn from_area_fraction(fraction: f64) -> Self {
        if fraction > 0.10 {
            SeverityLevel::Critical
        } else if fraction > 0.05 {
            SeverityLevel::High
        } else if fraction > 0.01 {
            SeverityLevel::Medium
        } else {
            SeverityLevel::Low
        }
    }
}

/// A rectangular area where source and candidate pages differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferenceRegion {
    /// Page number (1-indexed)
    pub page: u32,
    /// Left edge in pixels
    pub x: u32,
    /// Top edge in pixels
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Classification
    pub kind: DiffKind,
    /// Mean absolute difference inside the box, scaled to [0, 1]
    pub severity: f64,
    /// Area-based bucket
    pub level: SeverityLevel,
}

impl DifferenceRegion {
    /// Bounding box area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Parameters for region extraction.
#[derive(Debug, Clone, Copy)]
pub struct DiffParams {
    /// Absolute difference (0-255) a pixel must exceed to count
    pub tolerance: u8,
    /// Components with fewer pixels are dropped
    pub min_area: u32,
    /// Ink-mass ratio that makes one side dominant
    pub dominance_ratio: f64,
}

impl Default for DiffParams {
    fn default() -> Self {
        Self {
            tolerance: 26,
            min_area: 100,
            dominance_ratio: 1.5,
        }
    }
}

/// Pixel count and bounding box of one labelled component.
#[derive(Debug, Clone, Copy)]
struct Component {
    /// Raster position of the first pixel, for ordering
    first: (u32, u32),
    pixels: u32,
    min: (u32, u32),
    max: (u32, u32),
}

/// Extract difference regions over the common area of two bitmaps.
///
/// The absolute difference image is binarized at `tolerance`, then split into
/// 8-connected components. Each surviving component is reported by its
/// bounding box, in raster order of its first pixel.
pub fn find_regions(page: u32, source: &GrayImage, candidate: &GrayImage, params: &DiffParams) -> Vec<DifferenceRegion> {
    let width = source.width().min(candidate.width());
    let height = source.height().min(candidate.height());
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mask = GrayImage::from_fn(width, height, |x, y| {
        let s = source.get_pixel(x, y)[0];
        let c = candidate.get_pixel(x, y)[0];
        Luma([if s.abs_diff(c) > params.tolerance { 255 } else { 0 }])
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let mut components: Vec<Option<Component>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if components.len() <= label {
            components.resize(label + 1, None);
        }
        let entry = components[label].get_or_insert(Component {
            first: (y, x),
            pixels: 0,
            min: (x, y),
            max: (x, y),
        });
        entry.pixels += 1;
        entry.min = (entry.min.0.min(x), entry.min.1.min(y));
        entry.max = (entry.max.0.max(x), entry.max.1.max(y));
    }

    let mut components: Vec<Component> = components
        .into_iter()
        .flatten()
        .filter(|c| c.pixels >= params.min_area)
        .collect();
    components.sort_by_key(|c| c.first);

    let page_area = width as f64 * height as f64;
    components
        .into_iter()
        .map(|c| {
            let bbox = (c.min.0, c.min.1, c.max.0 - c.min.0 + 1, c.max.1 - c.min.1 + 1);
            let (kind, severity) = classify(source, candidate, bbox, params.dominance_ratio);
            let fraction = (bbox.2 as f64 * bbox.3 as f64) / page_area;
            DifferenceRegion {
                page,
                x: bbox.0,
                y: bbox.1,
                width: bbox.2,
                height: bbox.3,
                kind,
                severity,
                level: SeverityLevel::from_area_fraction(fraction),
            }
        })
        .collect()
}

/// Classify a box by comparing dark-pixel mass on each side.
fn classify(source: &GrayImage, candidate: &GrayImage, bbox: (u32, u32, u32, u32), dominance: f64) -> (DiffKind, f64) {
    let (x0, y0, bw, bh) = bbox;
    let mut source_mass = 0u64;
    let mut candidate_mass = 0u64;
    let mut abs_diff = 0u64;

    for y in y0..y0 + bh {
        for x in x0..x0 + bw {
            let s = source.get_pixel(x, y)[0];
            let c = candidate.get_pixel(x, y)[0];
            source_mass += (255 - s) as u64;
            candidate_mass += (255 - c) as u64;
            abs_diff += s.abs_diff(c) as u64;
        }
    }

    let (sm, cm) = (source_mass as f64, candidate_mass as f64);
    let kind = if sm > cm * dominance {
        DiffKind::Removed
    } else if cm > sm * dominance {
        DiffKind::Added
    } else {
        DiffKind::Changed
    };

    let pixels = (bw as u64 * bh as u64).max(1) as f64;
    (kind, (abs_diff as f64 / pixels / 255.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([255]))
    }

    fn with_block(mut img: GrayImage, x0: u32, y0: u32, size: u32, value: u8) -> GrayImage {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                img.put_pixel(x, y, Luma([value]));
            }
        }
        img
    }

    #[test]
    fn test_identical_no_regions() {
        let img = with_block(blank(64, 64), 10, 10, 20, 0);
        assert!(find_regions(1, &img, &img, &DiffParams::default()).is_empty());
    }

    #[test]
    fn test_removed_block() {
        let source = with_block(blank(100, 100), 10, 20, 20, 0);
        let candidate = blank(100, 100);
        let regions = find_regions(3, &source, &candidate, &DiffParams::default());

        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!((r.x, r.y, r.width, r.height), (10, 20, 20, 20));
        assert_eq!(r.kind, DiffKind::Removed);
        assert_eq!(r.page, 3);
        assert_eq!(r.severity, 1.0);
        // 400 px of 10_000 is 4 %
        assert_eq!(r.level, SeverityLevel::Medium);
    }

    #[test]
    fn test_added_block() {
        let source = blank(100, 100);
        let candidate = with_block(blank(100, 100), 50, 50, 40, 0);
        let regions = find_regions(1, &source, &candidate, &DiffParams::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, DiffKind::Added);
        assert_eq!(regions[0].level, SeverityLevel::Critical);
    }

    #[test]
    fn test_changed_block() {
        let source = with_block(blank(100, 100), 10, 10, 20, 0);
        let candidate = with_block(blank(100, 100), 10, 10, 20, 60);
        let regions = find_regions(1, &source, &candidate, &DiffParams::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, DiffKind::Changed);
    }

    #[test]
    fn test_small_components_dropped() {
        let source = with_block(blank(100, 100), 10, 10, 5, 0);
        let candidate = blank(100, 100);
        assert!(find_regions(1, &source, &candidate, &DiffParams::default()).is_empty());
    }

    #[test]
    fn test_regions_in_raster_order() {
        let source = with_block(with_block(blank(100, 100), 60, 5, 12, 0), 5, 50, 12, 0);
        let candidate = with_block(blank(100, 100), 70, 80, 15, 0);
        let regions = find_regions(1, &source, &candidate, &DiffParams::default());

        let origins: Vec<(u32, u32)> = regions.iter().map(|r| (r.x, r.y)).collect();
        assert_eq!(origins, vec![(60, 5), (5, 50), (70, 80)]);
        assert_eq!(regions[2].kind, DiffKind::Added);
    }

    #[test]
    fn test_diagonal_pixels_connect() {
        let mut source = blank(200, 200);
        for i in 0..150 {
            source.put_pixel(i, i, Luma([0]));
        }
        let candidate = blank(200, 200);
        let regions = find_regions(1, &source, &candidate, &DiffParams::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].width, 150);
    }
}
