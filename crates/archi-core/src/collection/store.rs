//! Collection persistence keyed by character id (last write wins)

use super::{CharacterId, CollectionState};
use crate::catalog::{MonsterId, ZoneCatalog};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub trait CollectionStore {
    fn get(&self, character: &CharacterId) -> Result<Option<CollectionState>, CoreError>;

    /// Replace the stored collection of `state.character`
    fn put(&self, state: &CollectionState) -> Result<(), CoreError>;
}

/// Read interface offered to the external sync integration.
///
/// Only ids the catalog knows are handed out.
pub trait SyncSource {
    fn captured_ids(
        &self,
        character: &CharacterId,
        catalog: &ZoneCatalog,
    ) -> Result<BTreeSet<MonsterId>, CoreError>;
}

impl<S: CollectionStore + ?Sized> SyncSource for S {
    fn captured_ids(
        &self,
        character: &CharacterId,
        catalog: &ZoneCatalog,
    ) -> Result<BTreeSet<MonsterId>, CoreError> {
        Ok(self
            .get(character)?
            .map(|state| {
                state
                    .captured()
                    .iter()
                    .copied()
                    .filter(|id| catalog.contains(*id))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Volatile store, for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<CharacterId, CollectionState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CollectionStore for MemoryStore {
    fn get(&self, character: &CharacterId) -> Result<Option<CollectionState>, CoreError> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(character).cloned())
    }

    fn put(&self, state: &CollectionState) -> Result<(), CoreError> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.insert(state.character.clone(), state.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    profiles: BTreeMap<String, ProfileRecord>,
    #[serde(rename = "activeProfile", default, skip_serializing_if = "Option::is_none")]
    active_profile: Option<String>,
    // Fields written by other tools are carried through untouched
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileRecord {
    #[serde(default)]
    captured: Vec<MonsterId>,
    #[serde(rename = "validatedSteps", default)]
    validated_steps: Vec<u32>,
    #[serde(rename = "lastUpdated", default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// All profiles in one JSON document, replaced atomically on every write
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Character most recently written
    pub fn active_profile(&self) -> Result<Option<CharacterId>, CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .read_document()?
            .active_profile
            .map(|raw| CharacterId::sanitize(&raw)))
    }

    /// Every character with a stored collection
    pub fn characters(&self) -> Result<Vec<CharacterId>, CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .read_document()?
            .profiles
            .keys()
            .map(|raw| CharacterId::sanitize(raw))
            .collect())
    }

    fn read_document(&self) -> Result<StoreDocument, CoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn write_document(&self, document: &StoreDocument) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(document)?;
        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> CoreError {
        CoreError::StoreIo {
            path: self.path.clone(),
            source,
        }
    }
}

impl CollectionStore for JsonFileStore {
    fn get(&self, character: &CharacterId) -> Result<Option<CollectionState>, CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.read_document()?;

        Ok(document
            .profiles
            .remove(character.as_str())
            .map(|record| {
                CollectionState::from_parts(character.clone(), record.captured, record.last_updated)
                    .with_validated_steps(record.validated_steps)
            }))
    }

    fn put(&self, state: &CollectionState) -> Result<(), CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.read_document()?;

        let record = document
            .profiles
            .entry(state.character.as_str().to_string())
            .or_default();
        record.captured = state.captured().iter().copied().collect();
        record.validated_steps = state.validated_steps().iter().copied().collect();
        record.last_updated = state.last_updated();
        document.active_profile = Some(state.character.as_str().to_string());

        self.write_document(&document)?;
        debug!(
            "Stored {} captures for {} in {:?}",
            state.len(),
            state.character,
            self.path
        );
        Ok(())
    }
}
