//! Windowed structural similarity (SSIM) on grayscale bitmaps.

use image::GrayImage;

const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DYNAMIC_RANGE: f64 = 255.0;

/// Default window edge in pixels.
pub const DEFAULT_WINDOW: u32 = 7;

/// Summed-area tables for the five SSIM moments.
struct Integrals {
    stride: usize,
    x: Vec<f64>,
    y: Vec<f64>,
    xx: Vec<f64>,
    yy: Vec<f64>,
    xy: Vec<f64>,
}

impl Integrals {
    fn build(a: &GrayImage, b: &GrayImage, width: u32, height: u32) -> Self {
        let stride = width as usize + 1;
        let size = stride * (height as usize + 1);
        let mut t = Self {
            stride,
            x: vec![0.0; size],
            y: vec![0.0; size],
            xx: vec![0.0; size],
            yy: vec![0.0; size],
            xy: vec![0.0; size],
        };

        for row in 0..height {
            let mut rx = 0.0;
            let mut ry = 0.0;
            let mut rxx = 0.0;
            let mut ryy = 0.0;
            let mut rxy = 0.0;
            for col in 0..width {
                let px = a.get_pixel(col, row)[0] as f64;
                let py = b.get_pixel(col, row)[0] as f64;
                rx += px;
                ry += py;
                rxx += px * px;
                ryy += py * py;
                rxy += px * py;

                let here = (row as usize + 1) * stride + col as usize + 1;
                let above = here - stride;
                t.x[here] = t.x[above] + rx;
                t.y[here] = t.y[above] + ry;
                t.xx[here] = t.xx[above] + rxx;
                t.yy[here] = t.yy[above] + ryy;
                t.xy[here] = t.xy[above] + rxy;
            }
        }
        t
    }

    fn window_sum(&self, table: &[f64], x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        table[y1 * self.stride + x1] - table[y0 * self.stride + x1] - table[y1 * self.stride + x0]
            + table[y0 * self.stride + x0]
    }
}

/// Mean SSIM over all `window`×`window` positions of the common area.
///
/// Bitmaps of different size are compared on their top-left common area.
/// Windows larger than the area shrink to fit. Returns 0.0 when the common
/// area is empty.
pub fn ssim(a: &GrayImage, b: &GrayImage, window: u32) -> f64 {
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    if width == 0 || height == 0 {
        return 0.0;
    }

    let win = window.max(1).min(width).min(height) as usize;
    let n = (win * win) as f64;
    let c1 = (K1 * DYNAMIC_RANGE).powi(2);
    let c2 = (K2 * DYNAMIC_RANGE).powi(2);

    let t = Integrals::build(a, b, width, height);
    let mut total = 0.0;
    let mut count = 0usize;

    for y0 in 0..=(height as usize - win) {
        for x0 in 0..=(width as usize - win) {
            let (x1, y1) = (x0 + win, y0 + win);
            let mu_x = t.window_sum(&t.x, x0, y0, x1, y1) / n;
            let mu_y = t.window_sum(&t.y, x0, y0, x1, y1) / n;
            let var_x = t.window_sum(&t.xx, x0, y0, x1, y1) / n - mu_x * mu_x;
            let var_y = t.window_sum(&t.yy, x0, y0, x1, y1) / n - mu_y * mu_y;
            let cov = t.window_sum(&t.xy, x0, y0, x1, y1) / n - mu_x * mu_y;

            let numerator = (2.0 * mu_x * mu_y + c1) * (2.0 * cov + c2);
            let denominator = (mu_x * mu_x + mu_y * mu_y + c1) * (var_x + var_y + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    (total / count as f64).clamp(0.0, 1.0)
}
