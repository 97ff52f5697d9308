use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalog identifier of an archimonster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonsterId(pub u32);

impl fmt::Display for MonsterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rarity tier, ordered from most to least common
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl FromStr for Rarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "common" => Ok(Rarity::Common),
            "uncommon" => Ok(Rarity::Uncommon),
            "rare" => Ok(Rarity::Rare),
            "epic" => Ok(Rarity::Epic),
            "legendary" => Ok(Rarity::Legendary),
            other => Err(format!("unknown rarity '{}'", other)),
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        };
        f.write_str(label)
    }
}

/// Static description of one archimonster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterDescriptor {
    pub id: MonsterId,
    pub name: String,
    pub zone: String,
    /// Position of `zone` in the catalog file, used as a stable sort key
    pub zone_order: usize,
    pub souszone: String,
    /// Quest step the monster belongs to
    pub step: u32,
    pub rarity: Rarity,
}

impl MonsterDescriptor {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        zone: impl Into<String>,
        zone_order: usize,
        rarity: Rarity,
    ) -> Self {
        Self {
            id: MonsterId(id),
            name: name.into(),
            zone: zone.into(),
            zone_order,
            souszone: String::new(),
            step: 0,
            rarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rarity_order_and_parse() {
        assert!(Rarity::Legendary > Rarity::Rare);
        assert!(Rarity::Rare > Rarity::Common);
        assert_eq!(" Rare ".parse::<Rarity>(), Ok(Rarity::Rare));
        assert!("mythic".parse::<Rarity>().is_err());
    }
}
