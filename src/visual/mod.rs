//! Visual fidelity comparison.
//!
//! Pages are matched by index. Each matched pair gets an SSIM score and a set
//! of [`DifferenceRegion`]s; pages present on only one side count as
//! unmatched and are penalized.

mod diff;
mod overlay;
mod ssim;

pub use diff::{find_regions, DiffKind, DiffParams, DifferenceRegion, SeverityLevel};
pub use overlay::{render_overlay, save_overlay};
pub use ssim::{ssim, DEFAULT_WINDOW};

use crate::error::{Error, Result};
use crate::model::{Document, Page};
use crate::score::{StageKind, ValidationScore};
use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Renders a page to a grayscale bitmap on demand.
pub trait PageRenderer: Send + Sync {
    /// Render one page.
    fn render(&self, page: &Page) -> Result<GrayImage>;
}

/// Options for the visual stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualOptions {
    /// Document score below which the stage fails
    pub threshold: f64,

    /// SSIM window edge in pixels
    pub window: u32,

    /// Pixel difference tolerance as a fraction of 255
    pub diff_tolerance: f64,

    /// Minimum connected-component size in pixels
    pub min_region_area: u32,

    /// Ink-mass ratio for added/removed classification
    pub dominance_ratio: f64,

    /// Score deducted per unmatched page
    pub unmatched_penalty: f64,

    /// Directory for diff visualizations (none = don't write)
    pub diff_dir: Option<PathBuf>,

    /// Compare pages in parallel
    pub parallel: bool,
}

impl VisualOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pass threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Write diff visualizations under `dir`.
    pub fn with_diff_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diff_dir = Some(dir.into());
        self
    }

    /// Set the minimum region area.
    pub fn with_min_region_area(mut self, area: u32) -> Self {
        self.min_region_area = area;
        self
    }

    /// Disable parallel comparison.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    fn diff_params(&self) -> DiffParams {
        DiffParams {
            tolerance: (self.diff_tolerance.clamp(0.0, 1.0) * 255.0).round() as u8,
            min_area: self.min_region_area,
            dominance_ratio: self.dominance_ratio,
        }
    }
}

impl Default for VisualOptions {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            window: DEFAULT_WINDOW,
            diff_tolerance: 0.1,
            min_region_area: 100,
            dominance_ratio: 1.5,
            unmatched_penalty: 0.05,
            diff_dir: None,
            parallel: true,
        }
    }
}

/// Comparison of one matched page pair.
#[derive(Debug, Clone)]
pub struct PageVisual {
    /// Page number (1-indexed)
    pub page: u32,

    /// SSIM of the pair
    pub ssim: f64,

    /// Localized differences
    pub regions: Vec<DifferenceRegion>,

    source_bitmap: Arc<GrayImage>,
    candidate_bitmap: Arc<GrayImage>,
}

/// Visual stage output.
#[derive(Debug, Clone)]
pub struct VisualReport {
    /// Stage score
    pub score: ValidationScore,

    /// Matched pages in order
    pub pages: Vec<PageVisual>,

    /// Pages present on only one side
    pub unmatched: usize,
}

impl VisualReport {
    /// All difference regions across pages.
    pub fn regions(&self) -> impl Iterator<Item = &DifferenceRegion> {
        self.pages.iter().flat_map(|p| p.regions.iter())
    }
}

/// Document score: matched SSIM mean over the longer document, minus a
/// penalty per unmatched page, clamped to [0, 1].
pub fn document_score(matched_ssim: &[f64], source_pages: usize, candidate_pages: usize, penalty: f64) -> f64 {
    let total = source_pages.max(candidate_pages);
    if total == 0 {
        return 1.0;
    }
    let unmatched = total - source_pages.min(candidate_pages);
    let sum: f64 = matched_ssim.iter().sum();
    (sum / total as f64 - penalty * unmatched as f64).clamp(0.0, 1.0)
}

/// Compares page bitmaps of source and candidate.
#[derive(Clone)]
pub struct VisualComparator {
    options: VisualOptions,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl VisualComparator {
    /// Create a comparator without a renderer.
    pub fn new(options: VisualOptions) -> Self {
        Self {
            options,
            renderer: None,
        }
    }

    /// Render pages that carry no bitmap.
    pub fn with_renderer<R: PageRenderer + 'static>(mut self, renderer: R) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Set a shared renderer.
    pub fn set_renderer(&mut self, renderer: Arc<dyn PageRenderer>) {
        self.renderer = Some(renderer);
    }

    /// The configured renderer, if any.
    pub fn renderer(&self) -> Option<&Arc<dyn PageRenderer>> {
        self.renderer.as_ref()
    }

    /// Stage options.
    pub fn options(&self) -> &VisualOptions {
        &self.options
    }

    /// Compare the two documents page by page.
    ///
    /// Fails with `StageUnavailable` when a matched page has no bitmap and no
    /// renderer can produce one, and with `InputMismatch` on zero-sized
    /// bitmaps.
    pub fn compare(&self, source: &Document, candidate: &Document) -> Result<VisualReport> {
        let n_src = source.page_count();
        let n_cand = candidate.page_count();
        let matched = n_src.min(n_cand);
        let unmatched = n_src.max(n_cand) - matched;
        let params = self.options.diff_params();

        let compare_pair = |i: usize| -> Result<PageVisual> {
            let src = self.bitmap_for(&source.pages[i])?;
            let cand = self.bitmap_for(&candidate.pages[i])?;
            let page = source.pages[i].number;
            Ok(PageVisual {
                page,
                ssim: ssim(&src, &cand, self.options.window),
                regions: find_regions(page, &src, &cand, &params),
                source_bitmap: src,
                candidate_bitmap: cand,
            })
        };

        let pages: Vec<PageVisual> = if self.options.parallel {
            (0..matched).into_par_iter().map(compare_pair).collect::<Result<_>>()?
        } else {
            (0..matched).map(compare_pair).collect::<Result<_>>()?
        };

        let ssims: Vec<f64> = pages.iter().map(|p| p.ssim).collect();
        let value = document_score(&ssims, n_src, n_cand, self.options.unmatched_penalty);
        let mut score = ValidationScore::new(StageKind::Visual, value, self.options.threshold);

        if unmatched > 0 {
            score.add_issue(format!(
                "{} unmatched page(s): source has {}, candidate has {}",
                unmatched, n_src, n_cand
            ));
        }
        for page in &pages {
            if page.ssim < self.options.threshold {
                score.add_issue(format!("Page {}: SSIM {:.3} below {:.2}", page.page, page.ssim, self.options.threshold));
            }
            let severe = page
                .regions
                .iter()
                .filter(|r| r.level >= SeverityLevel::High)
                .count();
            if severe > 0 {
                score.add_issue(format!("Page {}: {} severe difference region(s)", page.page, severe));
            }
        }

        log::debug!(
            "visual score {:.3} ({} matched, {} unmatched)",
            score.score,
            matched,
            unmatched
        );
        Ok(VisualReport {
            score,
            pages,
            unmatched,
        })
    }

    /// Write one overlay per page that has difference regions.
    ///
    /// Write failures are logged and skipped.
    pub fn write_diff_images(&self, report: &VisualReport, dir: &Path) -> Vec<PathBuf> {
        let mut written = Vec::new();
        for page in report.pages.iter().filter(|p| !p.regions.is_empty()) {
            match save_overlay(dir, page.page, &page.source_bitmap, &page.candidate_bitmap, &page.regions) {
                Ok(path) => written.push(path),
                Err(e) => log::warn!("failed to write diff image for page {}: {}", page.page, e),
            }
        }
        written
    }

    /// Render a page's bitmap if a renderer is configured.
    pub fn render(&self, page: &Page) -> Option<Result<GrayImage>> {
        self.renderer.as_ref().map(|r| r.render(page))
    }

    fn bitmap_for(&self, page: &Page) -> Result<Arc<GrayImage>> {
        let bitmap = match (&page.bitmap, &self.renderer) {
            (Some(bitmap), _) => Arc::clone(bitmap),
            (None, Some(renderer)) => Arc::new(renderer.render(page).map_err(|e| {
                Error::stage_unavailable(StageKind::Visual, format!("renderer failed on page {}: {}", page.number, e))
            })?),
            (None, None) => {
                return Err(Error::stage_unavailable(
                    StageKind::Visual,
                    format!("page {} has no bitmap and no renderer is configured", page.number),
                ))
            }
        };

        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(Error::InputMismatch(format!("page {} has a zero-sized bitmap", page.number)));
        }
        Ok(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn page_image(seed: u8) -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            if (x / 5 + y / 5 + seed as u32) % 2 == 0 {
                Luma([20])
            } else {
                Luma([240])
            }
        })
    }

    fn doc_with_bitmaps(count: usize) -> Document {
        Document::from_pages(
            (0..count)
                .map(|i| Page::new(i as u32 + 1, format!("page {}", i + 1)).with_bitmap(page_image(0)))
                .collect(),
        )
    }

    struct FlatRenderer;

    impl PageRenderer for FlatRenderer {
        fn render(&self, _page: &Page) -> Result<GrayImage> {
            Ok(page_image(0))
        }
    }

    #[test]
    fn test_document_score_scenario() {
        let score = document_score(&[0.97; 8], 10, 8, 0.05);
        assert!((score - 0.676).abs() < 1e-9);
    }

    #[test]
    fn test_document_score_edges() {
        assert_eq!(document_score(&[], 0, 0, 0.05), 1.0);
        assert_eq!(document_score(&[], 10, 0, 0.05), 0.0);
    }

    #[test]
    fn test_identical_documents() {
        let doc = doc_with_bitmaps(3);
        let report = VisualComparator::new(VisualOptions::default()).compare(&doc, &doc).unwrap();
        assert_eq!(report.score.score, 1.0);
        assert!(report.score.passed);
        assert_eq!(report.regions().count(), 0);
    }

    #[test]
    fn test_missing_candidate_pages() {
        let source = doc_with_bitmaps(4);
        let report = VisualComparator::new(VisualOptions::default())
            .compare(&source, &Document::new())
            .unwrap();
        assert_eq!(report.score.score, 0.0);
        assert_eq!(report.unmatched, 4);
        assert!(!report.score.passed);
    }

    #[test]
    fn test_missing_bitmap_unavailable() {
        let source = Document::from_markdown("text only");
        let err = VisualComparator::new(VisualOptions::default())
            .compare(&source, &source)
            .unwrap_err();
        assert!(matches!(err, Error::StageUnavailable { stage: StageKind::Visual, .. }));
    }

    #[test]
    fn test_renderer_fills_missing_bitmaps() {
        let source = doc_with_bitmaps(1);
        let candidate = Document::from_markdown("page 1");
        let report = VisualComparator::new(VisualOptions::default())
            .with_renderer(FlatRenderer)
            .compare(&source, &candidate)
            .unwrap();
        assert_eq!(report.score.score, 1.0);
    }

    #[test]
    fn test_zero_sized_bitmap_is_mismatch() {
        let source = Document::from_pages(vec![Page::new(1, "x").with_bitmap(GrayImage::new(0, 10))]);
        let err = VisualComparator::new(VisualOptions::default())
            .compare(&source, &source)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_shifted_page_reports_regions() {
        let source = doc_with_bitmaps(1);
        let candidate = Document::from_pages(vec![Page::new(1, "page 1").with_bitmap(page_image(1))]);
        let comparator = VisualComparator::new(VisualOptions::default());
        let report = comparator.compare(&source, &candidate).unwrap();

        assert!(report.score.score < 0.5);
        assert!(report.regions().count() > 0);

        let dir = tempfile::tempdir().unwrap();
        let written = comparator.write_diff_images(&report, dir.path());
        assert_eq!(written.len(), 1);
    }
}
