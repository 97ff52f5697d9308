//! Template matching module

pub mod loader;
pub mod matcher;

pub use loader::TemplateLoader;
pub use matcher::TemplateMatcher;

use archi_core::{MonsterId, ThresholdTable};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reference image of one monster's captured-state icon
#[derive(Debug, Clone)]
pub struct Template {
    pub monster: MonsterId,
    pub image: GrayImage,
    /// Minimum confidence for a positive detection
    pub threshold: f64,
}

impl Template {
    pub fn new(monster: MonsterId, image: GrayImage, threshold: f64) -> Self {
        Self {
            monster,
            image,
            threshold,
        }
    }

    pub fn is_positive(&self, confidence: f64) -> bool {
        confidence >= self.threshold
    }
}

/// Templates available for scanning, in catalog order
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
    default_threshold: f64,
}

impl TemplateSet {
    pub fn new(templates: Vec<Template>, default_threshold: f64) -> Self {
        Self {
            templates,
            default_threshold,
        }
    }

    pub fn get(&self, monster: MonsterId) -> Option<&Template> {
        self.templates.iter().find(|t| t.monster == monster)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Acceptance thresholds for the result aggregator
    pub fn thresholds(&self) -> ThresholdTable {
        self.templates.iter().fold(
            ThresholdTable::new(self.default_threshold),
            |table, template| table.with_override(template.monster, template.threshold),
        )
    }
}

/// Template matching method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMethod {
    /// Zero-mean normalized cross-correlation (robust to linear lighting changes)
    #[default]
    CCoeffNormed,
    /// Normalized cross-correlation
    CCorrNormed,
    /// Normalized squared difference (inverted: lower is better)
    SqDiffNormed,
}

impl MatchingMethod {
    pub fn is_inverted(&self) -> bool {
        matches!(self, MatchingMethod::SqDiffNormed)
    }
}

/// Preprocessing method for robust matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessingMethod {
    #[default]
    None,
    /// Histogram equalization (normalize brightness)
    HistogramEqualization,
    /// Laplacian gradient (edge-based matching, robust to lighting)
    Laplacian,
}

/// Template matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub default_threshold: f64,
    /// Stricter (or looser) thresholds for icons that are easy to confuse
    pub thresholds: HashMap<MonsterId, f64>,
    #[serde(alias = "method")]
    pub matching_method: MatchingMethod,
    pub preprocessing: PreprocessingMethod,
    /// Template scales tried when locating inside a frame
    pub scale_factors: Vec<f64>,
    /// Scaled templates smaller than this (either side) are skipped
    pub min_template_size: u32,
    /// Coarse search step in pixels; the best coarse hit is refined at step 1
    pub stride: u32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.88,
            thresholds: HashMap::new(),
            matching_method: MatchingMethod::CCoeffNormed,
            preprocessing: PreprocessingMethod::None,
            scale_factors: vec![0.75, 0.85, 1.0, 1.15, 1.3],
            min_template_size: 12,
            stride: 2,
        }
    }
}

impl TemplateConfig {
    pub fn threshold_for(&self, monster: MonsterId) -> f64 {
        self.thresholds
            .get(&monster)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Exact-size matching only, for frames already cropped to the icon
    pub fn single_scale() -> Self {
        Self {
            scale_factors: vec![1.0],
            ..Default::default()
        }
    }

    /// Configuration for gradient-based matching (robust to lighting)
    pub fn gradient_matching() -> Self {
        Self {
            default_threshold: 0.6,
            preprocessing: PreprocessingMethod::Laplacian,
            ..Default::default()
        }
    }
}
