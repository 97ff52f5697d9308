//! Result aggregator: the only writer of a live collection
//!
//! Scan events are applied one at a time, in the order the controller
//! emitted them. A detection is added when it clears its template threshold,
//! names a catalog monster, is not outranked by a stronger detection of a
//! different monster over the same frame region, and is not already captured.

use super::{CollectionReader, CollectionState};
use crate::catalog::{MonsterId, ZoneCatalog};
use crate::event::{Region, ScanEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Regions overlapping more than this are the same on-screen icon
pub const DEFAULT_OVERLAP_IOU: f64 = 0.3;

/// Per-monster acceptance thresholds with a fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    pub default: f64,
    #[serde(default)]
    pub overrides: HashMap<MonsterId, f64>,
}

impl ThresholdTable {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, id: MonsterId, threshold: f64) -> Self {
        self.overrides.insert(id, threshold);
        self
    }

    pub fn get(&self, id: MonsterId) -> f64 {
        self.overrides.get(&id).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BelowThreshold,
    UnknownMonster,
    /// A stronger detection of another monster already claimed the region
    Superseded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RejectReason::BelowThreshold => "below threshold",
            RejectReason::UnknownMonster => "unknown monster",
            RejectReason::Superseded => "superseded by a stronger match",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationOutcome {
    Added,
    DuplicateIgnored,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    monster: MonsterId,
    region: Region,
    confidence: f64,
}

pub struct ResultAggregator {
    state: Arc<RwLock<CollectionState>>,
    catalog: Arc<ZoneCatalog>,
    thresholds: ThresholdTable,
    overlap_iou: f64,
    // Claims of the frame currently being applied
    frame: Option<(u64, Vec<Claim>)>,
}

impl ResultAggregator {
    /// Captures in `initial` that the catalog does not know are dropped
    pub fn new(
        mut initial: CollectionState,
        catalog: Arc<ZoneCatalog>,
        thresholds: ThresholdTable,
    ) -> Self {
        let unknown = initial.retain_known(&catalog);
        if !unknown.is_empty() {
            warn!(
                "Dropping {} stored captures of {} missing from the catalog: {:?}",
                unknown.len(),
                initial.character,
                unknown
            );
        }
        Self {
            state: Arc::new(RwLock::new(initial)),
            catalog,
            thresholds,
            overlap_iou: DEFAULT_OVERLAP_IOU,
            frame: None,
        }
    }

    /// Read handle for the UI, the trade engine and the capture controller
    pub fn reader(&self) -> CollectionReader {
        CollectionReader::new(Arc::clone(&self.state))
    }

    pub fn snapshot(&self) -> CollectionState {
        self.reader().snapshot()
    }

    pub fn apply(&mut self, event: ScanEvent) -> AggregationOutcome {
        if !self.catalog.contains(event.monster) {
            debug!("Rejecting detection of unknown monster {}", event.monster);
            return AggregationOutcome::Rejected(RejectReason::UnknownMonster);
        }

        let threshold = self.thresholds.get(event.monster);
        if event.confidence.is_nan() || event.confidence < threshold {
            debug!(
                "Rejecting {} at {:.3} (threshold {:.3})",
                event.monster, event.confidence, threshold
            );
            return AggregationOutcome::Rejected(RejectReason::BelowThreshold);
        }

        if self.is_superseded(&event) {
            debug!(
                "Rejecting {} at {:.3}: region already claimed in frame {}",
                event.monster, event.confidence, event.frame.sequence
            );
            return AggregationOutcome::Rejected(RejectReason::Superseded);
        }

        let added = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.monster, event.timestamp);

        if added {
            info!(
                "Captured {} ({}) at {:.3}",
                self.catalog.display_name(event.monster),
                event.monster,
                event.confidence
            );
            AggregationOutcome::Added
        } else {
            AggregationOutcome::DuplicateIgnored
        }
    }

    /// Checks the event against earlier claims in the same frame and records
    /// it as a claim when it is not outranked.
    fn is_superseded(&mut self, event: &ScanEvent) -> bool {
        let sequence = event.frame.sequence;
        if !matches!(&self.frame, Some((current, _)) if *current == sequence) {
            self.frame = Some((sequence, Vec::new()));
        }
        let overlap_iou = self.overlap_iou;
        let Some((_, claims)) = self.frame.as_mut() else {
            return false;
        };

        let region = event.frame.region;
        let outranked = claims.iter().any(|claim| {
            claim.monster != event.monster
                && claim.confidence >= event.confidence
                && claim.region.iou(&region) > overlap_iou
        });

        if !outranked {
            claims.push(Claim {
                monster: event.monster,
                region,
                confidence: event.confidence,
            });
        }
        outranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MonsterDescriptor, Rarity};
    use crate::collection::CharacterId;
    use crate::event::FrameRef;
    use chrono::Utc;

    fn catalog() -> Arc<ZoneCatalog> {
        Arc::new(ZoneCatalog::new(vec![
            MonsterDescriptor::new(1, "Alpha", "X", 0, Rarity::Rare),
            MonsterDescriptor::new(2, "Beta", "Y", 1, Rarity::Common),
            MonsterDescriptor::new(3, "Gamma", "X", 0, Rarity::Common),
        ]))
    }

    fn aggregator() -> ResultAggregator {
        ResultAggregator::new(
            CollectionState::new(CharacterId::sanitize("tester")),
            catalog(),
            ThresholdTable::new(0.8).with_override(MonsterId(1), 0.95),
        )
    }

    fn event(monster: u32, confidence: f64, sequence: u64, region: Region) -> ScanEvent {
        ScanEvent {
            timestamp: Utc::now(),
            monster: MonsterId(monster),
            confidence,
            frame: FrameRef { sequence, region },
        }
    }

    #[test]
    fn test_same_event_twice_adds_once() {
        let mut aggregator = aggregator();
        let positive = event(2, 0.9, 1, Region::new(0, 0, 10, 10));

        assert_eq!(aggregator.apply(positive.clone()), AggregationOutcome::Added);
        assert_eq!(aggregator.apply(positive), AggregationOutcome::DuplicateIgnored);
        assert_eq!(aggregator.snapshot().len(), 1);
    }

    #[test]
    fn test_below_threshold_leaves_state_untouched() {
        let mut aggregator = aggregator();
        let before = aggregator.snapshot();

        // default threshold 0.8 passes, but monster 1 needs 0.95
        let outcome = aggregator.apply(event(1, 0.9, 1, Region::new(0, 0, 10, 10)));
        assert_eq!(outcome, AggregationOutcome::Rejected(RejectReason::BelowThreshold));

        let outcome = aggregator.apply(event(2, f64::NAN, 1, Region::new(0, 0, 10, 10)));
        assert_eq!(outcome, AggregationOutcome::Rejected(RejectReason::BelowThreshold));

        assert_eq!(aggregator.snapshot(), before);
    }

    #[test]
    fn test_unknown_monster_rejected() {
        let mut aggregator = aggregator();
        let outcome = aggregator.apply(event(42, 1.0, 1, Region::new(0, 0, 10, 10)));
        assert_eq!(outcome, AggregationOutcome::Rejected(RejectReason::UnknownMonster));
        assert!(aggregator.snapshot().is_empty());
    }

    #[test]
    fn test_overlapping_detections_keep_strongest() {
        let mut aggregator = aggregator();

        let strong = event(3, 0.97, 7, Region::new(100, 100, 20, 20));
        let weak = event(2, 0.85, 7, Region::new(102, 101, 20, 20));
        let elsewhere = event(2, 0.85, 7, Region::new(300, 300, 20, 20));

        assert_eq!(aggregator.apply(strong), AggregationOutcome::Added);
        assert_eq!(
            aggregator.apply(weak.clone()),
            AggregationOutcome::Rejected(RejectReason::Superseded)
        );
        assert_eq!(aggregator.apply(elsewhere), AggregationOutcome::Added);

        // a new frame starts with no claims
        let mut fresh = weak;
        fresh.frame.sequence = 8;
        assert_eq!(aggregator.apply(fresh), AggregationOutcome::DuplicateIgnored);
    }

    #[test]
    fn test_initial_state_ignores_ids_outside_catalog() {
        let initial = CollectionState::from_parts(
            CharacterId::sanitize("tester"),
            [MonsterId(2), MonsterId(99)],
            None,
        );
        let mut aggregator = ResultAggregator::new(initial, catalog(), ThresholdTable::new(0.8));

        let reader = aggregator.reader();
        assert!(!reader.is_captured(MonsterId(99)));
        assert_eq!(reader.captured_ids().into_iter().collect::<Vec<_>>(), vec![MonsterId(2)]);

        assert_eq!(
            aggregator.apply(event(2, 0.9, 1, Region::new(0, 0, 10, 10))),
            AggregationOutcome::DuplicateIgnored
        );
        assert_eq!(aggregator.snapshot().len(), 1);
    }

    #[test]
    fn test_reader_sees_point_in_time_copy() {
        let mut aggregator = aggregator();
        let reader = aggregator.reader();

        let before = reader.snapshot();
        aggregator.apply(event(2, 0.9, 1, Region::new(0, 0, 10, 10)));

        assert!(before.is_empty());
        assert!(reader.is_captured(MonsterId(2)));
        assert_eq!(reader.captured_ids().len(), 1);
        assert!(reader.snapshot().last_updated().is_some());
    }
}
