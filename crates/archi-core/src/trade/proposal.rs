use crate::catalog::{MonsterId, ZoneCatalog};
use serde::{Deserialize, Serialize};

/// Ranked give/receive lists produced by the trade engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub give: Vec<MonsterId>,
    pub receive: Vec<MonsterId>,
    /// False when one side is empty (a gift or a plain request)
    pub balanced: bool,
}

impl TradeProposal {
    pub(crate) fn new(give: Vec<MonsterId>, receive: Vec<MonsterId>) -> Self {
        let balanced = !give.is_empty() && !receive.is_empty();
        Self {
            give,
            receive,
            balanced,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.give.is_empty() && self.receive.is_empty()
    }

    pub fn len(&self) -> usize {
        self.give.len() + self.receive.len()
    }

    /// Whisper-ready message listing both sides in proposal order
    pub fn message(&self, catalog: &ZoneCatalog, target: Option<&str>) -> String {
        let names = |ids: &[MonsterId]| {
            if ids.is_empty() {
                "nothing".to_string()
            } else {
                ids.iter()
                    .map(|&id| catalog.display_name(id))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        };

        let prefix = match target.map(str::trim).filter(|t| !t.is_empty()) {
            Some(target) => format!("/w {} ", target),
            None => String::new(),
        };

        format!(
            "{}Hi! I can give you: {}. In exchange for: {}. Deal?",
            prefix,
            names(&self.give),
            names(&self.receive)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MonsterDescriptor, Rarity};

    #[test]
    fn test_message_rendering() {
        let catalog = ZoneCatalog::new(vec![
            MonsterDescriptor::new(1, "Alpha", "X", 0, Rarity::Rare),
            MonsterDescriptor::new(2, "Beta", "X", 0, Rarity::Common),
        ]);
        let proposal = TradeProposal::new(vec![MonsterId(1), MonsterId(2)], vec![MonsterId(7)]);

        assert_eq!(
            proposal.message(&catalog, Some(" Bob ")),
            "/w Bob Hi! I can give you: Alpha, Beta. In exchange for: 7. Deal?"
        );

        let gift = TradeProposal::new(vec![MonsterId(2)], Vec::new());
        assert!(!gift.balanced);
        assert_eq!(
            gift.message(&catalog, None),
            "Hi! I can give you: Beta. In exchange for: nothing. Deal?"
        );
    }
}
