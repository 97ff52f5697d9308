use serde::{Deserialize, Serialize};
use std::fmt;

/// Character (profile) identifier used to key collections
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(String);

impl CharacterId {
    pub const DEFAULT: &'static str = "default";

    /// Lower-case, trim and keep only alphanumerics, `_` and `-`.
    /// An empty result becomes `default`.
    pub fn sanitize(raw: &str) -> Self {
        let cleaned: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();

        if cleaned.is_empty() {
            Self(Self::DEFAULT.to_string())
        } else {
            Self(cleaned)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CharacterId {
    fn from(raw: &str) -> Self {
        Self::sanitize(raw)
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
