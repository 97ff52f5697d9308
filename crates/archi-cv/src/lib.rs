//! Archimonster Computer Vision Library
//!
//! Template matching over grayscale screen captures, the capture process
//! boundary, and the controller that turns sampled frames into scan events.

pub mod bbox;
pub mod capture;
pub mod template;
pub mod utils;

// Re-export commonly used types
pub use bbox::{BBox, BBoxCollection};
pub use capture::{
    CaptureController, CaptureError, CaptureProcess, CommandCapture, ControllerConfig,
    ControllerError, ControllerStatus, IngestStats, ReplayCapture, run_aggregator,
};
pub use template::{Template, TemplateConfig, TemplateLoader, TemplateMatcher, TemplateSet};

// Error handling
pub type Result<T> = anyhow::Result<T>;

/// Core traits for the CV system
pub mod traits {
    use super::*;
    use image::GrayImage;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Something that can be looked up on screen through template files
    pub trait Detectable {
        /// File stems to try, in order of preference
        fn template_names(&self) -> Vec<String>;
        fn display_name(&self) -> &str;
    }

    /// Scoring of frames against templates.
    ///
    /// Failures are `CaptureError::Read`: the frame is unusable this tick,
    /// which callers treat as "no detection".
    pub trait TemplateMatchable: Send + Sync {
        /// Confidence in `[0, 1]` that `region` shows `template`
        fn match_region(
            &self,
            region: &GrayImage,
            template: &Template,
        ) -> std::result::Result<f64, CaptureError>;

        /// Best placement of `template` inside `frame`, if any fits
        fn locate(
            &self,
            frame: &GrayImage,
            template: &Template,
        ) -> std::result::Result<Option<BBox>, CaptureError>;

        /// Positive detections of `templates` in one frame, strongest first.
        ///
        /// Once `cancel` is set the search winds down and returns what it
        /// has found so far.
        fn detect(
            &self,
            frame: &GrayImage,
            templates: &[&Template],
            cancel: &AtomicBool,
        ) -> std::result::Result<BBoxCollection, CaptureError> {
            let mut found = BBoxCollection::new();
            for template in templates {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(bbox) = self.locate(frame, template)? {
                    if template.is_positive(bbox.confidence) {
                        found.push(bbox);
                    }
                }
            }
            found.sort_by_confidence();
            Ok(found)
        }
    }
}
