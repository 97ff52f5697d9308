//! Zone catalog: every archimonster known to the game, loaded once per session

pub mod data;
pub mod monster;
pub mod names;

pub use data::{CatalogLoad, CatalogWarning};
pub use monster::{MonsterDescriptor, MonsterId, Rarity};

use std::collections::{BTreeSet, HashMap};

/// Immutable id -> descriptor mapping, in catalog file order
#[derive(Debug, Clone, Default)]
pub struct ZoneCatalog {
    monsters: Vec<MonsterDescriptor>,
    by_id: HashMap<MonsterId, usize>,
    by_name: HashMap<String, Vec<MonsterId>>,
}

impl ZoneCatalog {
    /// Build a catalog from descriptors. Later duplicates of an id are dropped.
    pub fn new(descriptors: impl IntoIterator<Item = MonsterDescriptor>) -> Self {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            if catalog.by_id.contains_key(&descriptor.id) {
                continue;
            }
            catalog.insert(descriptor);
        }
        catalog
    }

    fn insert(&mut self, descriptor: MonsterDescriptor) {
        let key = names::normalize_tokens(&descriptor.name);
        self.by_name.entry(key).or_default().push(descriptor.id);
        self.by_id.insert(descriptor.id, self.monsters.len());
        self.monsters.push(descriptor);
    }

    pub fn get(&self, id: MonsterId) -> Option<&MonsterDescriptor> {
        self.by_id.get(&id).map(|&index| &self.monsters[index])
    }

    pub fn contains(&self, id: MonsterId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.monsters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monsters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MonsterDescriptor> {
        self.monsters.iter()
    }

    /// Zone names in catalog order
    pub fn zones(&self) -> Vec<&str> {
        let mut zones: Vec<(usize, &str)> = self
            .monsters
            .iter()
            .map(|m| (m.zone_order, m.zone.as_str()))
            .collect();
        zones.sort();
        zones.dedup();
        zones.into_iter().map(|(_, zone)| zone).collect()
    }

    /// Display name for an id, falling back to the numeric id
    pub fn display_name(&self, id: MonsterId) -> String {
        self.get(id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Resolve a pasted list of monster names (comma, semicolon or newline
    /// separated) to catalog ids.
    ///
    /// Exact normalized names win. Tokens of four characters or more that
    /// match nothing exactly select every monster whose name contains them.
    pub fn resolve_names(&self, text: &str) -> BTreeSet<MonsterId> {
        let mut matched = BTreeSet::new();

        for token in names::split_list(text) {
            let key = names::normalize_tokens(token);
            if key.is_empty() {
                continue;
            }
            if let Some(ids) = self.by_name.get(&key) {
                matched.extend(ids.iter().copied());
                continue;
            }
            if key.chars().count() >= names::MIN_PARTIAL_LEN {
                for (name, ids) in &self.by_name {
                    if name.contains(&key) {
                        matched.extend(ids.iter().copied());
                    }
                }
            }
        }

        matched
    }
}

impl<'a> IntoIterator for &'a ZoneCatalog {
    type Item = &'a MonsterDescriptor;
    type IntoIter = std::slice::Iter<'a, MonsterDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.monsters.iter()
    }
}
