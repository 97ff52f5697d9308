//! Normalized cross-correlation template matching on grayscale images

use super::{MatchingMethod, PreprocessingMethod, Template, TemplateConfig};
use crate::bbox::{BBox, BBoxCollection};
use crate::capture::CaptureError;
use crate::traits::TemplateMatchable;
use crate::utils::ImageUtils;
use image::GrayImage;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

/// Pixel sums of a preprocessed template, reused for every window
struct TemplateStats<'a> {
    image: &'a GrayImage,
    sum: u64,
    sum_sq: u64,
}

impl<'a> TemplateStats<'a> {
    fn new(image: &'a GrayImage) -> Self {
        let (sum, sum_sq) = image.as_raw().iter().fold((0u64, 0u64), |(s, sq), &p| {
            let p = u64::from(p);
            (s + p, sq + p * p)
        });
        Self { image, sum, sum_sq }
    }
}

/// Template matcher over `image::GrayImage`
pub struct TemplateMatcher {
    config: TemplateConfig,
}

impl TemplateMatcher {
    pub fn new(config: TemplateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Preprocess image based on configuration
    pub fn preprocess<'a>(&self, image: &'a GrayImage) -> Cow<'a, GrayImage> {
        match self.config.preprocessing {
            PreprocessingMethod::None => Cow::Borrowed(image),
            PreprocessingMethod::HistogramEqualization => {
                Cow::Owned(ImageUtils::equalize_histogram(image))
            }
            PreprocessingMethod::Laplacian => Cow::Owned(ImageUtils::laplacian(image)),
        }
    }

    /// Score `region` against `template`.
    ///
    /// A region whose size differs from the template is resampled to the
    /// template size first. Identical pixels always score 1.0.
    pub fn match_region(&self, region: &GrayImage, template: &Template) -> Result<f64, CaptureError> {
        check_frame(region)?;
        check_template(template)?;

        let (width, height) = template.image.dimensions();
        let region = if region.dimensions() == (width, height) {
            Cow::Borrowed(region)
        } else {
            Cow::Owned(ImageUtils::resize(region, width, height))
        };

        if region.as_raw() == template.image.as_raw() {
            return Ok(1.0);
        }

        let region = self.preprocess(&region);
        let processed = self.preprocess(&template.image);
        let stats = TemplateStats::new(&processed);
        Ok(score_window(self.config.matching_method, &region, 0, 0, &stats))
    }

    /// Best placement of `template` in `frame` across the configured scales
    pub fn locate(&self, frame: &GrayImage, template: &Template) -> Result<Option<BBox>, CaptureError> {
        check_frame(frame)?;
        check_template(template)?;

        let prepared = self.preprocess(frame);
        Ok(self.locate_prepared(&prepared, template, &AtomicBool::new(false)))
    }

    /// Positive detections of every template in one frame, strongest first.
    /// The frame is preprocessed once.
    ///
    /// Setting `cancel` abandons the templates still being searched; the
    /// result then holds only the ones already finished.
    pub fn detect(
        &self,
        frame: &GrayImage,
        templates: &[&Template],
        cancel: &AtomicBool,
    ) -> Result<BBoxCollection, CaptureError> {
        check_frame(frame)?;
        let prepared = self.preprocess(frame);

        #[cfg(feature = "parallel")]
        let found: Vec<BBox> = {
            use rayon::prelude::*;
            templates
                .par_iter()
                .filter(|t| !ImageUtils::is_empty(&t.image))
                .filter_map(|t| self.locate_prepared(&prepared, t, cancel))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let found: Vec<BBox> = templates
            .iter()
            .filter(|t| !ImageUtils::is_empty(&t.image))
            .filter_map(|t| self.locate_prepared(&prepared, t, cancel))
            .collect();

        let mut positives: BBoxCollection = found
            .into_iter()
            .filter(|bbox| {
                templates
                    .iter()
                    .any(|t| Some(t.monster) == bbox.monster && t.is_positive(bbox.confidence))
            })
            .collect();
        positives.sort_by_confidence();
        Ok(positives)
    }

    fn locate_prepared(&self, frame: &GrayImage, template: &Template, cancel: &AtomicBool) -> Option<BBox> {
        let mut best: Option<BBox> = None;

        for &scale in &self.config.scale_factors {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let native = (scale - 1.0).abs() < f64::EPSILON;
            let scaled = if native {
                Cow::Borrowed(&template.image)
            } else {
                Cow::Owned(ImageUtils::scale(&template.image, scale))
            };

            let (width, height) = scaled.dimensions();
            // The native size is always tried; rescaled icons this small are noise
            if !native && (width < self.config.min_template_size || height < self.config.min_template_size) {
                continue;
            }
            if width > frame.width() || height > frame.height() {
                continue;
            }

            let processed = self.preprocess(&scaled);
            let stats = TemplateStats::new(&processed);
            let (x, y, confidence) = self.search(frame, &stats, cancel);
            // An interrupted search has not seen the whole frame
            if cancel.load(Ordering::Relaxed) {
                return None;
            }

            if best.as_ref().is_none_or(|b| confidence > b.confidence) {
                best = Some(
                    BBox::new(x, y, width, height, confidence)
                        .with_monster(template.monster)
                        .with_scale(scale),
                );
            }
        }

        best
    }

    /// Coarse grid search at `stride`, then a step-1 refinement around the
    /// best coarse position.
    fn search(&self, frame: &GrayImage, stats: &TemplateStats<'_>, cancel: &AtomicBool) -> (u32, u32, f64) {
        let method = self.config.matching_method;
        let stride = self.config.stride.max(1);
        let max_x = frame.width() - stats.image.width();
        let max_y = frame.height() - stats.image.height();

        let mut best = (0, 0, f64::NEG_INFINITY);
        for y in (0..=max_y).step_by(stride as usize) {
            if cancel.load(Ordering::Relaxed) {
                return best;
            }
            for x in (0..=max_x).step_by(stride as usize) {
                let score = score_window(method, frame, x, y, stats);
                if score > best.2 {
                    best = (x, y, score);
                }
            }
        }

        if stride > 1 {
            let (cx, cy, _) = best;
            for y in cy.saturating_sub(stride - 1)..=(cy + stride - 1).min(max_y) {
                for x in cx.saturating_sub(stride - 1)..=(cx + stride - 1).min(max_x) {
                    let score = score_window(method, frame, x, y, stats);
                    if score > best.2 {
                        best = (x, y, score);
                    }
                }
            }
        }

        best
    }
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(TemplateConfig::default())
    }
}

impl TemplateMatchable for TemplateMatcher {
    fn match_region(&self, region: &GrayImage, template: &Template) -> Result<f64, CaptureError> {
        TemplateMatcher::match_region(self, region, template)
    }

    fn locate(&self, frame: &GrayImage, template: &Template) -> Result<Option<BBox>, CaptureError> {
        TemplateMatcher::locate(self, frame, template)
    }

    fn detect(
        &self,
        frame: &GrayImage,
        templates: &[&Template],
        cancel: &AtomicBool,
    ) -> Result<BBoxCollection, CaptureError> {
        TemplateMatcher::detect(self, frame, templates, cancel)
    }
}

fn check_frame(frame: &GrayImage) -> Result<(), CaptureError> {
    if ImageUtils::is_empty(frame) {
        return Err(CaptureError::Read("empty frame region".to_string()));
    }
    Ok(())
}

fn check_template(template: &Template) -> Result<(), CaptureError> {
    if ImageUtils::is_empty(&template.image) {
        return Err(CaptureError::Read(format!(
            "template for {} has no pixels",
            template.monster
        )));
    }
    Ok(())
}

/// Similarity in `[0, 1]` of the window at (`x`, `y`) with the template.
///
/// Sums are accumulated as integers so identical windows give an exact
/// correlation of one.
fn score_window(
    method: MatchingMethod,
    frame: &GrayImage,
    x: u32,
    y: u32,
    stats: &TemplateStats<'_>,
) -> f64 {
    let tw = stats.image.width() as usize;
    let th = stats.image.height() as usize;
    let fw = frame.width() as usize;
    let (x, y) = (x as usize, y as usize);
    let frame_raw = frame.as_raw();
    let template_raw = stats.image.as_raw();

    let (mut si, mut si2, mut sit) = (0u64, 0u64, 0u64);
    for row in 0..th {
        let start = (y + row) * fw + x;
        let window = &frame_raw[start..start + tw];
        let reference = &template_raw[row * tw..(row + 1) * tw];
        for (&i, &t) in window.iter().zip(reference) {
            let (i, t) = (u64::from(i), u64::from(t));
            si += i;
            si2 += i * i;
            sit += i * t;
        }
    }

    let n = (tw * th) as i128;
    let (si, si2, sit) = (si as i128, si2 as i128, sit as i128);
    let (st, st2) = (stats.sum as i128, stats.sum_sq as i128);

    let score = match method {
        MatchingMethod::CCoeffNormed => {
            let var_i = n * si2 - si * si;
            let var_t = n * st2 - st * st;
            match (var_i, var_t) {
                // Two flat patches: same gray level or not
                (0, 0) => {
                    if si == st { 1.0 } else { 0.0 }
                }
                (0, _) | (_, 0) => 0.0,
                _ => {
                    let cov = (n * sit - si * st) as f64;
                    cov / ((var_i as f64) * (var_t as f64)).sqrt()
                }
            }
        }
        MatchingMethod::CCorrNormed => match (si2, st2) {
            (0, 0) => 1.0,
            (0, _) | (_, 0) => 0.0,
            _ => sit as f64 / ((si2 as f64) * (st2 as f64)).sqrt(),
        },
        MatchingMethod::SqDiffNormed => {
            let sq_diff = si2 - 2 * sit + st2;
            match (si2, st2) {
                (0, 0) => 1.0,
                (0, _) | (_, 0) => 0.0,
                _ => 1.0 - sq_diff as f64 / ((si2 as f64) * (st2 as f64)).sqrt(),
            }
        }
    };

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use archi_core::MonsterId;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(width, height, |_, _| Luma([rng.gen_range(0..=255u8)]))
    }

    fn paste(frame: &mut GrayImage, icon: &GrayImage, x: u32, y: u32) {
        image::imageops::replace(frame, icon, i64::from(x), i64::from(y));
    }

    #[test]
    fn test_identical_region_scores_one_for_every_method() -> anyhow::Result<()> {
        let icon = noise(24, 24, 7);
        let template = Template::new(MonsterId(1), icon.clone(), 1.0);

        for method in [
            MatchingMethod::CCoeffNormed,
            MatchingMethod::CCorrNormed,
            MatchingMethod::SqDiffNormed,
        ] {
            let matcher = TemplateMatcher::new(TemplateConfig {
                matching_method: method,
                ..TemplateConfig::single_scale()
            });
            let score = matcher.match_region(&icon, &template)?;
            assert!(template.is_positive(score), "{:?} scored {}", method, score);
        }
        Ok(())
    }

    #[test]
    fn test_unrelated_region_scores_low() -> anyhow::Result<()> {
        let template = Template::new(MonsterId(1), noise(24, 24, 1), 0.88);
        let matcher = TemplateMatcher::default();

        let score = matcher.match_region(&noise(24, 24, 2), &template)?;
        assert!(score < 0.3, "unrelated noise scored {}", score);
        Ok(())
    }

    #[test]
    fn test_lighting_shift_survives_zero_mean_correlation() -> anyhow::Result<()> {
        let icon = GrayImage::from_fn(20, 20, |x, y| Luma([(x * 5 + y * 3) as u8]));
        let brighter = GrayImage::from_fn(20, 20, |x, y| Luma([(x * 5 + y * 3 + 40) as u8]));
        let template = Template::new(MonsterId(1), icon, 0.95);

        let score = TemplateMatcher::default().match_region(&brighter, &template)?;
        assert!(score > 0.99, "shifted gradient scored {}", score);
        Ok(())
    }

    #[test]
    fn test_region_of_other_size_is_resampled() -> anyhow::Result<()> {
        let icon = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 20 } else { 220 }]));
        let doubled = ImageUtils::resize(&icon, 32, 32);
        let template = Template::new(MonsterId(1), icon, 0.9);

        let score = TemplateMatcher::default().match_region(&doubled, &template)?;
        assert!(score > 0.9, "resampled region scored {}", score);
        Ok(())
    }

    #[test]
    fn test_empty_region_is_capture_read_error() {
        let template = Template::new(MonsterId(1), noise(8, 8, 3), 0.9);
        let err = TemplateMatcher::default()
            .match_region(&GrayImage::new(0, 0), &template)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Read(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_flat_patches() -> anyhow::Result<()> {
        let gray = GrayImage::from_pixel(12, 12, Luma([90]));
        let template = Template::new(MonsterId(1), gray.clone(), 0.9);
        let matcher = TemplateMatcher::default();

        let darker = GrayImage::from_pixel(12, 12, Luma([10]));
        assert_eq!(matcher.match_region(&darker, &template)?, 0.0);
        assert_eq!(matcher.match_region(&noise(12, 12, 5), &template)?, 0.0);
        Ok(())
    }

    #[test]
    fn test_locate_finds_icon_in_frame() -> anyhow::Result<()> {
        let icon = noise(20, 20, 11);
        let mut frame = GrayImage::from_pixel(120, 80, Luma([30]));
        paste(&mut frame, &icon, 63, 41);

        let matcher = TemplateMatcher::new(TemplateConfig {
            stride: 1,
            ..TemplateConfig::single_scale()
        });
        let template = Template::new(MonsterId(4), icon, 0.95);
        let found = matcher.locate(&frame, &template)?.expect("icon fits in frame");

        assert_eq!((found.x, found.y), (63, 41));
        assert_eq!(found.monster, Some(MonsterId(4)));
        assert!(found.confidence > 0.999);
        Ok(())
    }

    #[test]
    fn test_locate_coarse_to_fine_on_smooth_icon() -> anyhow::Result<()> {
        // Smooth blob: coarse grid lands next to the peak, refinement finds it
        let icon = GrayImage::from_fn(24, 24, |x, y| {
            let dx = x as f64 - 11.5;
            let dy = y as f64 - 11.5;
            Luma([(255.0 * (-(dx * dx + dy * dy) / 60.0).exp()) as u8])
        });
        let mut frame = GrayImage::from_pixel(100, 100, Luma([0]));
        paste(&mut frame, &icon, 37, 51);

        let matcher = TemplateMatcher::new(TemplateConfig {
            stride: 4,
            ..TemplateConfig::single_scale()
        });
        let template = Template::new(MonsterId(9), icon, 0.9);
        let found = matcher.locate(&frame, &template)?.expect("icon fits in frame");
        assert_eq!((found.x, found.y), (37, 51));
        Ok(())
    }

    #[test]
    fn test_locate_skips_oversized_and_tiny_scales() -> anyhow::Result<()> {
        let matcher = TemplateMatcher::new(TemplateConfig {
            scale_factors: vec![0.5, 1.0, 4.0],
            min_template_size: 12,
            ..TemplateConfig::default()
        });

        let template = Template::new(MonsterId(1), noise(16, 16, 4), 0.9);
        let found = matcher.locate(&noise(40, 40, 5), &template)?.expect("native scale fits");
        assert_eq!(found.scale, 1.0);

        let too_big = Template::new(MonsterId(1), noise(100, 100, 4), 0.9);
        assert!(matcher.locate(&noise(40, 40, 5), &too_big)?.is_none());
        Ok(())
    }

    #[test]
    fn test_detect_orders_positives_by_confidence() -> anyhow::Result<()> {
        let first = noise(16, 16, 21);
        let second = noise(16, 16, 22);
        let absent = noise(16, 16, 23);

        let mut frame = GrayImage::from_pixel(96, 48, Luma([128]));
        paste(&mut frame, &first, 8, 8);
        paste(&mut frame, &second, 60, 20);

        let templates = [
            Template::new(MonsterId(1), first, 0.9),
            Template::new(MonsterId(2), second, 0.9),
            Template::new(MonsterId(3), absent, 0.9),
        ];
        let refs: Vec<&Template> = templates.iter().collect();

        let matcher = TemplateMatcher::new(TemplateConfig {
            stride: 1,
            ..TemplateConfig::single_scale()
        });
        let found = matcher.detect(&frame, &refs, &AtomicBool::new(false))?;

        let ids: Vec<_> = found.iter().filter_map(|b| b.monster).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&MonsterId(1)) && ids.contains(&MonsterId(2)));
        Ok(())
    }

    #[test]
    fn test_detect_stops_when_cancelled() -> anyhow::Result<()> {
        let icon = noise(16, 16, 41);
        let mut frame = GrayImage::from_pixel(64, 64, Luma([128]));
        paste(&mut frame, &icon, 10, 10);
        let template = Template::new(MonsterId(1), icon, 0.9);

        let matcher = TemplateMatcher::new(TemplateConfig {
            stride: 1,
            ..TemplateConfig::single_scale()
        });
        let found = matcher.detect(&frame, &[&template], &AtomicBool::new(true))?;
        assert!(found.is_empty());

        let found = matcher.detect(&frame, &[&template], &AtomicBool::new(false))?;
        assert_eq!(found.len(), 1);
        Ok(())
    }

    #[test]
    fn test_laplacian_preprocessing_keeps_exact_match() -> anyhow::Result<()> {
        let icon = noise(20, 20, 31);
        let mut frame = GrayImage::from_pixel(60, 60, Luma([200]));
        paste(&mut frame, &icon, 20, 10);

        let matcher = TemplateMatcher::new(TemplateConfig {
            stride: 1,
            ..TemplateConfig::gradient_matching()
        });
        let template = Template::new(MonsterId(2), icon, 0.6);
        let found = matcher.locate(&frame, &template)?.expect("icon fits");
        assert_eq!((found.x, found.y), (20, 10));
        Ok(())
    }
}
