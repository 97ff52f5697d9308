//! Bounding boxes for template detections

use archi_core::{MonsterId, Region};
use serde::{Deserialize, Serialize};

/// Where a template was found in a frame, and how well it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f64,
    pub monster: Option<MonsterId>,
    /// Template scale that produced the match
    pub scale: f64,
}

impl BBox {
    /// Create a new bounding box
    pub fn new(x: u32, y: u32, width: u32, height: u32, confidence: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            monster: None,
            scale: 1.0,
        }
    }

    pub fn with_monster(mut self, monster: MonsterId) -> Self {
        self.monster = Some(monster);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn region(&self) -> Region {
        Region::new(self.x, self.y, self.width, self.height)
    }

    /// Calculate intersection over union (IoU) with another box
    pub fn iou(&self, other: &BBox) -> f64 {
        self.region().iou(&other.region())
    }
}

/// Collection of bounding boxes with batch operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BBoxCollection {
    boxes: Vec<BBox>,
}

impl BBoxCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(boxes: Vec<BBox>) -> Self {
        Self { boxes }
    }

    pub fn push(&mut self, bbox: BBox) {
        self.boxes.push(bbox);
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BBox> {
        self.boxes.iter()
    }

    /// Sort by confidence (descending), ties by monster id for stable output
    pub fn sort_by_confidence(&mut self) {
        self.boxes.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.monster.cmp(&b.monster))
        });
    }

    pub fn stats(&self) -> BBoxStats {
        let total_confidence: f64 = self.boxes.iter().map(|b| b.confidence).sum();
        let max_confidence = self
            .boxes
            .iter()
            .map(|b| b.confidence)
            .fold(0.0_f64, f64::max);

        let avg_confidence = if self.boxes.is_empty() {
            0.0
        } else {
            total_confidence / self.boxes.len() as f64
        };

        BBoxStats {
            total_boxes: self.boxes.len(),
            avg_confidence,
            max_confidence,
        }
    }
}

impl IntoIterator for BBoxCollection {
    type Item = BBox;
    type IntoIter = std::vec::IntoIter<BBox>;

    fn into_iter(self) -> Self::IntoIter {
        self.boxes.into_iter()
    }
}

impl FromIterator<BBox> for BBoxCollection {
    fn from_iter<T: IntoIterator<Item = BBox>>(iter: T) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// Statistics about a collection of bounding boxes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BBoxStats {
    pub total_boxes: usize,
    pub avg_confidence: f64,
    pub max_confidence: f64,
}
