use super::CollectionState;
use crate::catalog::ZoneCatalog;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneProgress {
    pub zone: String,
    pub captured: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SousZoneProgress {
    pub zone: String,
    pub souszone: String,
    pub captured: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProgress {
    pub step: u32,
    pub captured: usize,
    pub total: usize,
    pub validated: bool,
}

/// Capture totals of one collection against the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub total: usize,
    pub captured: usize,
    pub missing: usize,
    /// Missing monsters whose step is not validated yet
    pub needed: usize,
    pub zones: Vec<ZoneProgress>,
    /// Sub-zones in catalog order
    pub souszones: Vec<SousZoneProgress>,
    /// Quest steps in ascending order; monsters without a step are left out
    pub steps: Vec<StepProgress>,
}

impl CollectionSummary {
    pub fn compute(state: &CollectionState, catalog: &ZoneCatalog) -> Self {
        let mut zones: Vec<ZoneProgress> = catalog
            .zones()
            .into_iter()
            .map(|zone| ZoneProgress {
                zone: zone.to_string(),
                captured: 0,
                total: 0,
            })
            .collect();

        let mut souszones: Vec<SousZoneProgress> = Vec::new();
        let mut steps: BTreeMap<u32, StepProgress> = BTreeMap::new();
        let mut captured = 0;
        let mut needed = 0;
        for monster in catalog {
            let is_captured = state.is_captured(monster.id);
            if is_captured {
                captured += 1;
            } else if state.is_needed(monster) {
                needed += 1;
            }

            if let Some(progress) = zones.iter_mut().find(|z| z.zone == monster.zone) {
                progress.total += 1;
                progress.captured += usize::from(is_captured);
            }

            let index = match souszones
                .iter()
                .position(|s| s.zone == monster.zone && s.souszone == monster.souszone)
            {
                Some(index) => index,
                None => {
                    souszones.push(SousZoneProgress {
                        zone: monster.zone.clone(),
                        souszone: monster.souszone.clone(),
                        captured: 0,
                        total: 0,
                    });
                    souszones.len() - 1
                }
            };
            souszones[index].total += 1;
            souszones[index].captured += usize::from(is_captured);

            if monster.step > 0 {
                let progress = steps.entry(monster.step).or_insert_with(|| StepProgress {
                    step: monster.step,
                    captured: 0,
                    total: 0,
                    validated: state.is_step_validated(monster.step),
                });
                progress.total += 1;
                progress.captured += usize::from(is_captured);
            }
        }

        Self {
            total: catalog.len(),
            captured,
            missing: catalog.len() - captured,
            needed,
            zones,
            souszones,
            steps: steps.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MonsterDescriptor, MonsterId, Rarity};
    use crate::collection::CharacterId;

    #[test]
    fn test_summary_counts_per_zone() {
        let catalog = ZoneCatalog::new(vec![
            MonsterDescriptor::new(1, "A", "X", 0, Rarity::Rare),
            MonsterDescriptor::new(2, "B", "Y", 1, Rarity::Common),
            MonsterDescriptor::new(3, "C", "X", 0, Rarity::Common),
        ]);
        // id 99 is not in the catalog and must not be counted
        let state = CollectionState::from_parts(
            CharacterId::sanitize("me"),
            [MonsterId(1), MonsterId(2), MonsterId(99)],
            None,
        );

        let summary = CollectionSummary::compute(&state, &catalog);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.captured, 2);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.needed, 1);
        assert_eq!(
            summary.zones,
            vec![
                ZoneProgress { zone: "X".into(), captured: 1, total: 2 },
                ZoneProgress { zone: "Y".into(), captured: 1, total: 1 },
            ]
        );
    }

    fn monster(id: u32, zone: &str, souszone: &str, step: u32) -> MonsterDescriptor {
        let mut descriptor = MonsterDescriptor::new(id, format!("M{id}"), zone, 0, Rarity::Common);
        descriptor.souszone = souszone.to_string();
        descriptor.step = step;
        descriptor
    }

    #[test]
    fn test_summary_souszones_and_steps() {
        let catalog = ZoneCatalog::new(vec![
            monster(1, "Astrub", "Cité", 1),
            monster(2, "Astrub", "Champs", 1),
            monster(3, "Astrub", "Cité", 2),
            monster(4, "Amakna", "Cité", 2),
            monster(5, "Amakna", "Forêt", 0),
        ]);
        let mut state =
            CollectionState::from_parts(CharacterId::sanitize("me"), [MonsterId(1)], None);
        state.validate_step(2);

        let summary = CollectionSummary::compute(&state, &catalog);
        assert_eq!(summary.missing, 4);
        // 3 and 4 belong to a validated step, 5 has no step
        assert_eq!(summary.needed, 2);
        assert_eq!(
            summary
                .souszones
                .iter()
                .map(|s| (s.zone.as_str(), s.souszone.as_str(), s.captured, s.total))
                .collect::<Vec<_>>(),
            vec![
                ("Astrub", "Cité", 1, 2),
                ("Astrub", "Champs", 0, 1),
                ("Amakna", "Cité", 0, 1),
                ("Amakna", "Forêt", 0, 1),
            ]
        );
        assert_eq!(
            summary.steps,
            vec![
                StepProgress { step: 1, captured: 1, total: 2, validated: false },
                StepProgress { step: 2, captured: 0, total: 2, validated: true },
            ]
        );
    }
}
