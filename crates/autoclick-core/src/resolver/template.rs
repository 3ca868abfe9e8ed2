//! Template matching by normalized cross-correlation
//!
//! Scores are the zero-mean normalized correlation coefficient in [-1, 1]
//! (the `TM_CCOEFF_NORMED` measure). Windows or templates without any
//! contrast have no defined score and are never candidates, so a flat
//! screen can't produce a match at any threshold.

use super::{search_area, Target, TargetQuery, TargetResolver, ResolutionResult};
use crate::config::DEFAULT_TEMPLATE_THRESHOLD;
use crate::error::{Error, Result};
use crate::geometry::NormalizedPoint;
use image::{imageops, GrayImage, RgbaImage};
use std::cell::Cell;

/// Template variance below this is treated as flat
const FLAT_EPSILON: f64 = 1e-6;
/// Windows whose summed squared deviation is below this are flat. Any
/// integer-valued window that isn't constant reaches at least 0.5.
const FLAT_WINDOW: f64 = 0.5;
/// Shrunk template side below which a coarse pass is not worth it
const MIN_COARSE_SIDE: usize = 8;
const MAX_SHRINK: usize = 8;
/// Coarse peaks re-scored at full resolution
const CANDIDATES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    /// Top-left corner of the best window in the searched image
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct TemplateResolver {
    threshold: f64,
    step: u32,
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_TEMPLATE_THRESHOLD,
            step: 1,
        }
    }

    /// Minimum similarity in [0, 1] for a match to count as found
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Search stride in pixels for templates too small for the coarse
    /// pass; 1 checks every position
    pub fn step(mut self, step: u32) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn get_threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetResolver for TemplateResolver {
    fn resolve(&self, capture: &RgbaImage, query: &TargetQuery) -> Result<ResolutionResult> {
        let Target::Template(template) = &query.target else {
            return Err(Error::invalid_query("Template resolver needs a template image query"));
        };
        if template.width() == 0 || template.height() == 0 {
            return Err(Error::invalid_query("Template image is empty"));
        }

        let area = search_area(capture, query.region)?;
        let haystack = imageops::grayscale(
            &imageops::crop_imm(capture, area.x, area.y, area.width, area.height).to_image(),
        );
        let needle = imageops::grayscale(template);

        let Some(best) = best_match(&haystack, &needle, self.step) else {
            tracing::debug!(query = %query.label(), "no match candidates");
            return Ok(ResolutionResult::not_found(
                0.0,
                Some("no position with contrast to compare".to_string()),
            ));
        };

        tracing::debug!(
            x = best.x,
            y = best.y,
            score = best.score,
            threshold = self.threshold,
            "best template match"
        );

        if best.score < self.threshold {
            return Ok(ResolutionResult::not_found(
                best.score,
                Some(format!(
                    "best match {:.3} below threshold {:.3}",
                    best.score, self.threshold
                )),
            ));
        }

        // centre of the window, back in full-capture coordinates
        let cx = area.x + best.x + needle.width() / 2;
        let cy = area.y + best.y + needle.height() / 2;
        let point = NormalizedPoint::new(
            cx as f64 / capture.width() as f64,
            cy as f64 / capture.height() as f64,
        )
        .ok_or_else(|| Error::resolution_failed("match position out of range"))?;

        Ok(ResolutionResult::found(
            point,
            best.score,
            Some(format!("template matched at ({}, {})", cx, cy)),
        ))
    }
}

/// Highest-scoring template position in `haystack`.
///
/// Ties keep the first position in raster order (top-to-bottom,
/// left-to-right). Returns `None` when the template doesn't fit or no
/// window has a defined score.
///
/// Templates at least `2 * MIN_COARSE_SIDE` pixels on each side are first
/// searched on block-averaged copies, then the best coarse peaks are scored
/// exactly at full resolution. Smaller templates are scored at every
/// `step`-th position.
pub fn best_match(haystack: &GrayImage, template: &GrayImage, step: u32) -> Option<MatchScore> {
    search(haystack, template, step).0
}

/// Best match and the number of pixel products spent finding it
fn search(haystack: &GrayImage, template: &GrayImage, step: u32) -> (Option<MatchScore>, u64) {
    let img = Plane::from_gray(haystack);
    let tpl = Plane::from_gray(template);
    let Some(fine) = Scorer::new(&img, &tpl) else {
        return (None, 0);
    };

    let factor = shrink_factor(tpl.width, tpl.height);
    if factor > 1 {
        let small_img = img.shrink(factor);
        let small_tpl = tpl.shrink(factor);
        if let Some(coarse) = Scorer::new(&small_img, &small_tpl) {
            let best = refine(&fine, &peaks(&coarse), factor);
            let products = coarse.products() + fine.products();
            tracing::trace!(factor, products, "coarse-to-fine search");
            return (best, products);
        }
    }

    let best = exhaustive(&fine, step.max(1) as usize);
    (best, fine.products())
}

/// Largest power of two, up to `MAX_SHRINK`, leaving the shrunk template
/// at least `MIN_COARSE_SIDE` on each side
fn shrink_factor(tw: usize, th: usize) -> usize {
    let mut factor = 1;
    while factor < MAX_SHRINK && tw.min(th) / (factor * 2) >= MIN_COARSE_SIDE {
        factor *= 2;
    }
    factor
}

fn exhaustive(scorer: &Scorer, step: usize) -> Option<MatchScore> {
    let mut best = None;
    for y in (0..=scorer.last_y()).step_by(step) {
        for x in (0..=scorer.last_x()).step_by(step) {
            consider(&mut best, scorer, x, y);
        }
    }
    best
}

/// Best coarse positions, at most `CANDIDATES`, none within two coarse
/// pixels of a better one
fn peaks(coarse: &Scorer) -> Vec<(usize, usize)> {
    let mut scored = Vec::new();
    for y in 0..=coarse.last_y() {
        for x in 0..=coarse.last_x() {
            if let Some(score) = coarse.score(x, y) {
                scored.push((score, x, y));
            }
        }
    }
    // stable: equal scores stay in raster order
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut picked: Vec<(usize, usize)> = Vec::with_capacity(CANDIDATES);
    for (_, x, y) in scored {
        if picked.len() == CANDIDATES {
            break;
        }
        if picked.iter().all(|&(px, py)| px.abs_diff(x) > 2 || py.abs_diff(y) > 2) {
            picked.push((x, y));
        }
    }
    picked
}

/// Exact scores within two coarse pixels of each peak
fn refine(fine: &Scorer, peaks: &[(usize, usize)], factor: usize) -> Option<MatchScore> {
    let reach = 2 * factor;
    let mut best = None;
    for &(cx, cy) in peaks {
        let (x0, y0) = (cx * factor, cy * factor);
        for y in y0.saturating_sub(reach)..=(y0 + reach).min(fine.last_y()) {
            for x in x0.saturating_sub(reach)..=(x0 + reach).min(fine.last_x()) {
                consider(&mut best, fine, x, y);
            }
        }
    }
    best
}

fn consider(best: &mut Option<MatchScore>, scorer: &Scorer, x: usize, y: usize) {
    let Some(score) = scorer.score(x, y) else {
        return;
    };
    let m = MatchScore {
        x: x as u32,
        y: y as u32,
        score,
    };
    let wins = best.map_or(true, |b| {
        m.score > b.score || (m.score == b.score && (m.y, m.x) < (b.y, b.x))
    });
    if wins {
        *best = Some(m);
    }
}

/// Grey levels as f64, row-major
struct Plane {
    width: usize,
    height: usize,
    px: Vec<f64>,
}

impl Plane {
    fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            px: img.as_raw().iter().map(|&v| v as f64).collect(),
        }
    }

    /// Mean of each `factor` x `factor` block; partial blocks at the edges are dropped
    fn shrink(&self, factor: usize) -> Self {
        let (w, h) = (self.width / factor, self.height / factor);
        let mut px = vec![0.0; w * h];
        for y in 0..h * factor {
            let row = &self.px[y * self.width..y * self.width + w * factor];
            let out = &mut px[(y / factor) * w..(y / factor + 1) * w];
            for (x, v) in row.iter().enumerate() {
                out[x / factor] += v;
            }
        }
        let area = (factor * factor) as f64;
        px.iter_mut().for_each(|v| *v /= area);
        Self {
            width: w,
            height: h,
            px,
        }
    }
}

/// Correlates one template against windows of one image
struct Scorer<'a> {
    img: &'a Plane,
    tw: usize,
    th: usize,
    n: f64,
    centered: Vec<f64>,
    t_norm2: f64,
    sum: Vec<f64>,
    sum2: Vec<f64>,
    products: Cell<u64>,
}

impl<'a> Scorer<'a> {
    /// `None` when the template is flat or doesn't fit in the image
    fn new(img: &'a Plane, tpl: &Plane) -> Option<Self> {
        let (tw, th) = (tpl.width, tpl.height);
        if tw == 0 || th == 0 || tw > img.width || th > img.height {
            return None;
        }
        let n = (tw * th) as f64;
        let mean = tpl.px.iter().sum::<f64>() / n;
        let centered: Vec<f64> = tpl.px.iter().map(|v| v - mean).collect();
        let t_norm2: f64 = centered.iter().map(|v| v * v).sum();
        if t_norm2 < FLAT_EPSILON {
            return None;
        }
        let (sum, sum2) = integral_images(&img.px, img.width, img.height);
        Some(Self {
            img,
            tw,
            th,
            n,
            centered,
            t_norm2,
            sum,
            sum2,
            products: Cell::new(0),
        })
    }

    fn last_x(&self) -> usize {
        self.img.width - self.tw
    }

    fn last_y(&self) -> usize {
        self.img.height - self.th
    }

    fn products(&self) -> u64 {
        self.products.get()
    }

    fn window_sum(&self, table: &[f64], x: usize, y: usize) -> f64 {
        let stride = self.img.width + 1;
        let (x1, y1) = (x + self.tw, y + self.th);
        table[y1 * stride + x1] - table[y * stride + x1] - table[y1 * stride + x]
            + table[y * stride + x]
    }

    /// Score of the window at (x, y); `None` for flat windows
    fn score(&self, x: usize, y: usize) -> Option<f64> {
        let s = self.window_sum(&self.sum, x, y);
        let s2 = self.window_sum(&self.sum2, x, y);
        let w_var = s2 - s * s / self.n;
        if w_var < FLAT_WINDOW {
            return None;
        }

        let w = self.img.width;
        let mut num = 0.0;
        for j in 0..self.th {
            let row = &self.img.px[(y + j) * w + x..(y + j) * w + x + self.tw];
            let trow = &self.centered[j * self.tw..(j + 1) * self.tw];
            num += row.iter().zip(trow).map(|(p, t)| p * t).sum::<f64>();
        }
        self.products.set(self.products.get() + (self.tw * self.th) as u64);
        Some((num / (self.t_norm2 * w_var).sqrt()).clamp(-1.0, 1.0))
    }
}

/// Summed-area tables of values and squared values, (w+1) x (h+1)
fn integral_images(px: &[f64], w: usize, h: usize) -> (Vec<f64>, Vec<f64>) {
    let stride = w + 1;
    let mut sum = vec![0.0; stride * (h + 1)];
    let mut sum2 = vec![0.0; stride * (h + 1)];
    for y in 0..h {
        let mut row = 0.0;
        let mut row2 = 0.0;
        for x in 0..w {
            let v = px[y * w + x];
            row += v;
            row2 += v * v;
            sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
            sum2[(y + 1) * stride + x + 1] = sum2[y * stride + x + 1] + row2;
        }
    }
    (sum, sum2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Region, ScreenSize};
    use image::Rgba;

    /// 12x12 patch with a diagonal gradient and a dark cross
    fn patch() -> RgbaImage {
        RgbaImage::from_fn(12, 12, |x, y| {
            let v = if x == 6 || y == 6 { 10 } else { (40 + x * 9 + y * 7) as u8 };
            Rgba([v, v / 2, 255 - v, 255])
        })
    }

    /// Grey screen with mild texture so windows are not flat
    fn screen(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            let v = 128 + ((x * 7 + y * 13) % 5) as u8;
            Rgba([v, v, v, 255])
        })
    }

    fn paste(screen: &mut RgbaImage, tpl: &RgbaImage, x: i64, y: i64) {
        imageops::replace(screen, tpl, x, y);
    }

    #[test]
    fn finds_inserted_template() {
        let mut cap = screen(120, 80);
        let tpl = patch();
        paste(&mut cap, &tpl, 70, 30);

        let r = TemplateResolver::new()
            .threshold(0.95)
            .resolve(&cap, &TargetQuery::template(tpl))
            .unwrap();
        assert!(r.found);
        assert!(r.confidence > 0.99);
        let p = r.point.unwrap().to_pixels(ScreenSize::new(120, 80));
        assert_eq!((p.x, p.y), (76, 36));
    }

    #[test]
    fn large_template_is_located_exactly() {
        // 20x20 goes through the coarse pass; offset is not block-aligned
        let blob = RgbaImage::from_fn(20, 20, |x, y| {
            let d2 = (x as f64 - 9.5).powi(2) + (y as f64 - 9.5).powi(2);
            let v = (20.0 + 200.0 * (-d2 / 30.0).exp()) as u8;
            Rgba([v, v, v, 255])
        });
        let mut cap = RgbaImage::from_fn(120, 80, |x, y| {
            let v = 20 + ((x * 7 + y * 13) % 5) as u8;
            Rgba([v, v, v, 255])
        });
        paste(&mut cap, &blob, 41, 23);

        let r = TemplateResolver::new()
            .threshold(0.9)
            .resolve(&cap, &TargetQuery::template(blob))
            .unwrap();
        assert!(r.found);
        let p = r.point.unwrap().to_pixels(ScreenSize::new(120, 80));
        assert_eq!((p.x, p.y), (51, 33));
    }

    #[test]
    fn step_stays_within_one_stride() {
        // smooth blob on a dark screen, so off-by-one windows still correlate
        let blob = RgbaImage::from_fn(14, 14, |x, y| {
            let d2 = (x as f64 - 6.5).powi(2) + (y as f64 - 6.5).powi(2);
            let v = (20.0 + 200.0 * (-d2 / 16.0).exp()) as u8;
            Rgba([v, v, v, 255])
        });
        let mut cap = RgbaImage::from_fn(120, 80, |x, y| {
            let v = 20 + ((x * 7 + y * 13) % 5) as u8;
            Rgba([v, v, v, 255])
        });
        paste(&mut cap, &blob, 41, 23);

        let r = TemplateResolver::new()
            .threshold(0.8)
            .step(2)
            .resolve(&cap, &TargetQuery::template(blob))
            .unwrap();
        assert!(r.found);
        let p = r.point.unwrap().to_pixels(ScreenSize::new(120, 80));
        assert!((p.x - 48).abs() <= 2 && (p.y - 30).abs() <= 2, "{:?}", p);
    }

    #[test]
    fn full_hd_search_stays_cheap() {
        let mut cap = GrayImage::from_fn(1920, 1080, |x, y| {
            image::Luma([100 + ((x * 7 + y * 13) % 11) as u8])
        });
        // disc on a ramp
        let tpl = GrayImage::from_fn(48, 48, |x, y| {
            let disc = if (x as i32 - 24).pow(2) + (y as i32 - 24).pow(2) < 144 { 100 } else { 0 };
            image::Luma([(40 + x * 3 + disc).min(255) as u8])
        });
        imageops::replace(&mut cap, &tpl, 1337, 611);

        let (best, products) = search(&cap, &tpl, 1);
        let best = best.unwrap();
        assert_eq!((best.x, best.y), (1337, 611));
        assert!(best.score > 0.999);

        let every_window = (1920 - 48 + 1) * (1080 - 48 + 1) * 48 * 48;
        assert!(products < 50_000_000, "{} products", products);
        assert!(products * 100 < every_window);
    }

    #[test]
    fn threshold_above_similarity_is_not_found() {
        let mut cap = screen(60, 60);
        let tpl = patch();
        // damaged copy: best similarity well below 1
        let mut damaged = tpl.clone();
        for x in 0..12 {
            damaged.put_pixel(x, 2, Rgba([250, 250, 250, 255]));
            damaged.put_pixel(x, 9, Rgba([0, 0, 0, 255]));
        }
        paste(&mut cap, &damaged, 10, 10);

        let resolver = TemplateResolver::new().threshold(1.0);
        let r = resolver.resolve(&cap, &TargetQuery::template(tpl.clone())).unwrap();
        assert!(!r.found);
        assert!(r.point.is_none());
        assert!(r.confidence < 1.0);

        let r = TemplateResolver::new()
            .threshold(r.confidence)
            .resolve(&cap, &TargetQuery::template(tpl))
            .unwrap();
        assert!(r.found);
    }

    #[test]
    fn blank_capture_never_matches() {
        let blank = RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]));
        for threshold in [0.0, 0.5, 1.0] {
            let r = TemplateResolver::new()
                .threshold(threshold)
                .resolve(&blank, &TargetQuery::template(patch()))
                .unwrap();
            assert!(!r.found, "threshold {}", threshold);
        }
    }

    #[test]
    fn region_excludes_better_match_outside() {
        let mut cap = screen(160, 80);
        let tpl = patch();
        // exact copy outside the region
        paste(&mut cap, &tpl, 10, 10);
        // weaker copy inside the region
        let mut weaker = tpl.clone();
        weaker.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        weaker.put_pixel(11, 11, Rgba([255, 255, 255, 255]));
        paste(&mut cap, &weaker, 120, 40);

        let region = Region::new(100, 20, 60, 60);
        let r = TemplateResolver::new()
            .threshold(0.5)
            .resolve(&cap, &TargetQuery::template(tpl).in_region(Some(region)))
            .unwrap();
        assert!(r.found);
        let p = r.point.unwrap().to_pixels(ScreenSize::new(160, 80));
        // full-screen coordinates, inside the region
        assert_eq!((p.x, p.y), (126, 46));
        assert!(region.contains(p.x as f64, p.y as f64));
    }

    #[test]
    fn region_without_target_is_not_found() {
        let mut cap = screen(160, 80);
        let tpl = patch();
        paste(&mut cap, &tpl, 10, 10);
        let r = TemplateResolver::new()
            .threshold(0.9)
            .resolve(
                &cap,
                &TargetQuery::template(tpl).in_region(Some(Region::new(100, 0, 60, 80))),
            )
            .unwrap();
        assert!(!r.found);
    }

    #[test]
    fn ties_take_first_in_raster_order() {
        let mut cap = screen(100, 100);
        let tpl = patch();
        paste(&mut cap, &tpl, 60, 20);
        paste(&mut cap, &tpl, 10, 70);
        paste(&mut cap, &tpl, 20, 20);

        let m = best_match(
            &imageops::grayscale(&cap),
            &imageops::grayscale(&tpl),
            1,
        )
        .unwrap();
        assert_eq!((m.x, m.y), (20, 20));
    }

    #[test]
    fn oversized_template_has_no_match() {
        let small = GrayImage::from_pixel(4, 4, image::Luma([3]));
        let big = GrayImage::from_fn(8, 8, |x, _| image::Luma([x as u8 * 20]));
        assert!(best_match(&small, &big, 1).is_none());
    }

    #[test]
    fn description_query_is_rejected() {
        let err = TemplateResolver::new()
            .resolve(&screen(10, 10), &TargetQuery::description("ok"))
            .unwrap_err();
        assert!(err.is(crate::ErrorCode::InvalidQuery));
    }
}
