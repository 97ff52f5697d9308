//! Template loading utilities

use super::{Template, TemplateConfig, TemplateSet};
use crate::Result;
use crate::traits::Detectable;
use crate::utils::image::ImageUtils;
use anyhow::Context;
use archi_core::catalog::names::normalize_tokens;
use archi_core::{MonsterDescriptor, ZoneCatalog};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl Detectable for MonsterDescriptor {
    fn template_names(&self) -> Vec<String> {
        let mut names = vec![
            self.id.to_string(),
            normalize_tokens(&self.name).replace(' ', "_"),
            self.name.clone(),
            self.name.to_lowercase(),
        ];
        let mut seen = HashSet::new();
        names.retain(|name| seen.insert(name.clone()));
        names
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

/// Template loader searching several directories and extensions
pub struct TemplateLoader {
    template_dirs: Vec<PathBuf>,
    supported_extensions: Vec<String>,
}

impl TemplateLoader {
    pub fn new() -> Self {
        Self {
            template_dirs: Vec::new(),
            supported_extensions: vec![
                "png".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "bmp".to_string(),
            ],
        }
    }

    pub fn add_template_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.template_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    /// Find the template file of `subject`, trying each candidate name
    pub fn find_template<D: Detectable>(&self, subject: &D) -> Option<PathBuf> {
        subject
            .template_names()
            .iter()
            .flat_map(|stem| {
                self.supported_extensions
                    .iter()
                    .map(move |ext| format!("{}.{}", stem, ext))
            })
            .find_map(|candidate| self.find_template_file(&candidate))
    }

    /// Load one template image as grayscale
    pub fn load_image<D: Detectable>(&self, subject: &D) -> Result<Option<(PathBuf, image::GrayImage)>> {
        let Some(path) = self.find_template(subject) else {
            return Ok(None);
        };
        let image = ImageUtils::load_grayscale(&path)
            .with_context(|| format!("Failed to load template: {:?}", path))?;
        if ImageUtils::is_empty(&image) {
            anyhow::bail!("Template {:?} has no pixels", path);
        }
        Ok(Some((path, image)))
    }

    /// Load a template for every catalog monster.
    ///
    /// A missing or unreadable template only disables scanning for that
    /// monster.
    pub fn load_for_catalog(&self, catalog: &ZoneCatalog, config: &TemplateConfig) -> TemplateSet {
        let mut templates = Vec::new();

        for monster in catalog {
            match self.load_image(monster) {
                Ok(Some((path, image))) => {
                    let threshold = config.threshold_for(monster.id);
                    debug!(
                        "Template for {} ({}) from {:?}, threshold {:.2}",
                        monster.display_name(),
                        monster.id,
                        path,
                        threshold
                    );
                    templates.push(Template::new(monster.id, image, threshold));
                }
                Ok(None) => {
                    warn!(
                        "No template for {} ({}); scanning disabled for it",
                        monster.display_name(),
                        monster.id
                    );
                }
                Err(e) => {
                    warn!(
                        "Unusable template for {} ({}): {:#}; scanning disabled for it",
                        monster.display_name(),
                        monster.id,
                        e
                    );
                }
            }
        }

        info!(
            "Loaded {} of {} templates from {:?}",
            templates.len(),
            catalog.len(),
            self.template_dirs
        );
        TemplateSet::new(templates, config.default_threshold)
    }

    /// Find template file in directories
    fn find_template_file(&self, candidate: &str) -> Option<PathBuf> {
        for dir in &self.template_dirs {
            let path = dir.join(candidate);
            if path.is_file() {
                return Some(path);
            }

            // Case-insensitive search
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let file_name = entry.file_name();
                    if file_name.to_string_lossy().to_lowercase() == candidate.to_lowercase() {
                        return Some(entry.path());
                    }
                }
            }
        }

        None
    }
}

impl Default for TemplateLoader {
    fn default() -> Self {
        Self::new()
    }
}
