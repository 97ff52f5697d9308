use super::CharacterId;
use crate::catalog::{MonsterDescriptor, MonsterId, ZoneCatalog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Captured monsters of one character, plus the quest steps the player has
/// already handed in.
///
/// Only the result aggregator adds captures during a session; everyone else
/// works on snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    pub character: CharacterId,
    captured: BTreeSet<MonsterId>,
    #[serde(default)]
    validated_steps: BTreeSet<u32>,
    last_updated: Option<DateTime<Utc>>,
}

impl CollectionState {
    pub fn new(character: CharacterId) -> Self {
        Self {
            character,
            captured: BTreeSet::new(),
            validated_steps: BTreeSet::new(),
            last_updated: None,
        }
    }

    /// Rebuild a state from persisted or imported parts
    pub fn from_parts(
        character: CharacterId,
        captured: impl IntoIterator<Item = MonsterId>,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            character,
            captured: captured.into_iter().collect(),
            validated_steps: BTreeSet::new(),
            last_updated,
        }
    }

    pub fn with_validated_steps(mut self, steps: impl IntoIterator<Item = u32>) -> Self {
        self.validated_steps = steps.into_iter().filter(|step| *step > 0).collect();
        self
    }

    pub fn captured(&self) -> &BTreeSet<MonsterId> {
        &self.captured
    }

    pub fn is_captured(&self, id: MonsterId) -> bool {
        self.captured.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.captured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn validated_steps(&self) -> &BTreeSet<u32> {
        &self.validated_steps
    }

    pub fn is_step_validated(&self, step: u32) -> bool {
        self.validated_steps.contains(&step)
    }

    /// Mark a quest step as handed in. Step 0 means "no step" and is refused.
    pub fn validate_step(&mut self, step: u32) -> bool {
        step > 0 && self.validated_steps.insert(step)
    }

    pub fn unvalidate_step(&mut self, step: u32) -> bool {
        self.validated_steps.remove(&step)
    }

    /// Still to be found: not captured and its step not handed in yet
    pub fn is_needed(&self, monster: &MonsterDescriptor) -> bool {
        !self.is_captured(monster.id) && !self.is_step_validated(monster.step)
    }

    /// Drop captures the catalog does not know; returns the dropped ids
    pub fn retain_known(&mut self, catalog: &ZoneCatalog) -> Vec<MonsterId> {
        let unknown: Vec<MonsterId> = self
            .captured
            .iter()
            .copied()
            .filter(|id| !catalog.contains(*id))
            .collect();
        for id in &unknown {
            self.captured.remove(id);
        }
        unknown
    }

    /// Returns false when `id` was already captured
    pub(crate) fn insert(&mut self, id: MonsterId, at: DateTime<Utc>) -> bool {
        if !self.captured.insert(id) {
            return false;
        }
        self.last_updated = Some(match self.last_updated {
            Some(previous) if previous > at => previous,
            _ => at,
        });
        true
    }
}

/// Read-only handle on a live collection; every read is a point-in-time copy
#[derive(Debug, Clone)]
pub struct CollectionReader {
    inner: Arc<RwLock<CollectionState>>,
}

impl CollectionReader {
    pub(crate) fn new(inner: Arc<RwLock<CollectionState>>) -> Self {
        Self { inner }
    }

    pub fn snapshot(&self) -> CollectionState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn captured_ids(&self) -> BTreeSet<MonsterId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .captured
            .clone()
    }

    pub fn is_captured(&self, id: MonsterId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_captured(id)
    }
}
