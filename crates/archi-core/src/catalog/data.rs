//! Catalog file loading
//!
//! The catalog is a JSON document grouping archimonsters by zone and
//! sub-zone. Malformed entries are skipped and reported as warnings; only an
//! unreadable or structurally invalid file is fatal.

use super::{MonsterDescriptor, MonsterId, Rarity, ZoneCatalog};
use crate::error::CoreError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// A catalog entry that was skipped while loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogWarning {
    pub zone: String,
    pub souszone: String,
    /// Position of the entry inside its sub-zone
    pub index: usize,
    pub reason: String,
}

impl fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} entry #{}: {}",
            self.zone, self.souszone, self.index, self.reason
        )
    }
}

/// Loaded catalog plus the entries that were skipped
#[derive(Debug, Clone)]
pub struct CatalogLoad {
    pub catalog: ZoneCatalog,
    pub warnings: Vec<CatalogWarning>,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    zones: Vec<RawZone>,
}

#[derive(Debug, Deserialize)]
struct RawZone {
    #[serde(default)]
    zone: String,
    #[serde(default)]
    souszones: Vec<RawSousZone>,
}

#[derive(Debug, Deserialize)]
struct RawSousZone {
    #[serde(default)]
    souszone: String,
    // Kept as raw values so one bad entry does not reject the whole file
    #[serde(default)]
    archimonstres: Vec<Value>,
}

impl ZoneCatalog {
    /// Load the catalog file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CatalogLoad, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::CatalogLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let loaded = Self::from_json_str(&text).map_err(|e| CoreError::CatalogLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        info!(
            "Loaded {} archimonsters from {:?} ({} entries skipped)",
            loaded.catalog.len(),
            path,
            loaded.warnings.len()
        );
        Ok(loaded)
    }

    /// Parse a catalog document already in memory
    pub fn from_json_str(text: &str) -> Result<CatalogLoad, serde_json::Error> {
        let raw: RawCatalog = serde_json::from_str(text)?;

        let mut catalog = ZoneCatalog::default();
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for (zone_order, zone) in raw.zones.iter().enumerate() {
            for souszone in &zone.souszones {
                for (index, entry) in souszone.archimonstres.iter().enumerate() {
                    match parse_entry(entry, &zone.zone, zone_order, &souszone.souszone) {
                        Ok(descriptor) if !seen.insert(descriptor.id) => {
                            warnings.push(skip(
                                zone,
                                souszone,
                                index,
                                format!("duplicate id {}", descriptor.id),
                            ));
                        }
                        Ok(descriptor) => catalog.insert(descriptor),
                        Err(reason) => warnings.push(skip(zone, souszone, index, reason)),
                    }
                }
            }
        }

        for warning in &warnings {
            warn!("Skipping catalog entry {}", warning);
        }

        Ok(CatalogLoad { catalog, warnings })
    }
}

fn skip(zone: &RawZone, souszone: &RawSousZone, index: usize, reason: String) -> CatalogWarning {
    CatalogWarning {
        zone: zone.zone.clone(),
        souszone: souszone.souszone.clone(),
        index,
        reason,
    }
}

fn parse_entry(
    entry: &Value,
    zone: &str,
    zone_order: usize,
    souszone: &str,
) -> Result<MonsterDescriptor, String> {
    let object = entry
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;

    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .filter(|&id| id > 0)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| "missing or invalid id".to_string())?;

    let name = object
        .get("nom")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| format!("id {}: missing name", id))?;

    let step = match object.get("etape") {
        None | Some(Value::Null) => 0,
        Some(value) => value
            .as_u64()
            .and_then(|step| u32::try_from(step).ok())
            .ok_or_else(|| format!("id {}: invalid step {}", id, value))?,
    };

    let rarity = match object.get("rarity") {
        None | Some(Value::Null) => Rarity::default(),
        Some(Value::String(label)) => label
            .parse::<Rarity>()
            .map_err(|e| format!("id {}: {}", id, e))?,
        Some(other) => return Err(format!("id {}: invalid rarity {}", id, other)),
    };

    Ok(MonsterDescriptor {
        id: MonsterId(id),
        name: name.to_string(),
        zone: zone.to_string(),
        zone_order,
        souszone: souszone.to_string(),
        step,
        rarity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "zones": [
            {
                "zone": "Astrub",
                "souszones": [
                    {
                        "souszone": "Cite",
                        "archimonstres": [
                            {"id": 10, "nom": "Bouftonix", "etape": 1},
                            {"id": 11, "nom": "Pioufette", "etape": 1, "rarity": "rare"},
                            {"id": 0, "nom": "Ghost"},
                            {"nom": "NoId"},
                            {"id": 12, "nom": "   "},
                            {"id": 13, "nom": "Oddity", "rarity": "mythic"},
                            "not an object"
                        ]
                    }
                ]
            },
            {
                "zone": "Amakna",
                "souszones": [
                    {
                        "souszone": "Foret",
                        "archimonstres": [
                            {"id": 20, "nom": "Tofurapin", "etape": 2, "rarity": "Epic"},
                            {"id": 10, "nom": "Bouftonix bis"}
                        ]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_malformed_entries_are_skipped() -> Result<()> {
        let loaded = ZoneCatalog::from_json_str(SAMPLE)?;

        assert_eq!(loaded.catalog.len(), 3);
        assert_eq!(loaded.warnings.len(), 6);
        assert!(loaded.warnings.iter().any(|w| w.reason.contains("duplicate id 10")));
        assert!(loaded.warnings.iter().any(|w| w.reason.contains("mythic")));

        let tofu = loaded.catalog.get(MonsterId(20)).expect("tofurapin loaded");
        assert_eq!(tofu.zone, "Amakna");
        assert_eq!(tofu.zone_order, 1);
        assert_eq!(tofu.souszone, "Foret");
        assert_eq!(tofu.step, 2);
        assert_eq!(tofu.rarity, Rarity::Epic);

        let boufton = loaded.catalog.get(MonsterId(10)).expect("bouftonix loaded");
        assert_eq!(boufton.name, "Bouftonix");
        assert_eq!(boufton.rarity, Rarity::Common);
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(SAMPLE.as_bytes())?;

        let loaded = ZoneCatalog::load(file.path())?;
        assert_eq!(loaded.catalog.len(), 3);
        Ok(())
    }

    #[test]
    fn test_unreadable_file_is_fatal() {
        let err = ZoneCatalog::load("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.code(), "catalog_load");

        let err = ZoneCatalog::from_json_str("{ nope").unwrap_err();
        assert!(err.is_syntax());
    }
}
