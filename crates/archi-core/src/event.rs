//! Scan events emitted by the capture controller

use crate::catalog::MonsterId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Intersection over union with another region
    pub fn iou(&self, other: &Region) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = u64::from(x2 - x1) * u64::from(y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }
}

/// Which captured frame, and where in it, a detection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    /// Monotonic frame counter of the capture controller
    pub sequence: u64,
    pub region: Region,
}

/// One positive template match reported by the capture controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub timestamp: DateTime<Utc>,
    pub monster: MonsterId,
    pub confidence: f64,
    pub frame: FrameRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_iou() {
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(5, 5, 10, 10);
        let iou = a.iou(&b);
        assert!(iou > 0.14 && iou < 0.15);

        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&Region::new(20, 20, 5, 5)), 0.0);
        assert_eq!(Region::new(0, 0, 0, 0).iou(&Region::new(0, 0, 0, 0)), 0.0);
    }
}
