//! Give/receive selection under rarity ranking and a size limit

use super::TradeProposal;
use crate::catalog::{MonsterDescriptor, MonsterId, ZoneCatalog};
use crate::collection::CollectionState;
use crate::error::CoreError;
use std::cmp::Reverse;
use tracing::debug;

/// Compute a trade proposal between two collection snapshots.
///
/// `give` holds what `mine` has and `theirs` lacks, `receive` the reverse.
/// Both sides are ranked rarest first (then zone order, then id) and the
/// pair is cut down to at most `max_size` monsters in total.
pub fn propose_trade(
    mine: &CollectionState,
    theirs: &CollectionState,
    catalog: &ZoneCatalog,
    max_size: usize,
) -> Result<TradeProposal, CoreError> {
    if mine.character == theirs.character {
        return Err(CoreError::InvalidTradeRequest(format!(
            "cannot trade with the same character '{}'",
            mine.character
        )));
    }
    if max_size == 0 {
        return Err(CoreError::InvalidConfiguration(
            "trade size limit must be at least 1".to_string(),
        ));
    }

    let mut give = ranked(mine.captured().difference(theirs.captured()).copied(), catalog);
    let mut receive = ranked(theirs.captured().difference(mine.captured()).copied(), catalog);

    let (give_len, receive_len) = split_limit(give.len(), receive.len(), max_size);
    give.truncate(give_len);
    receive.truncate(receive_len);

    debug!(
        "Trade {} <-> {}: give {}, receive {} (limit {})",
        mine.character,
        theirs.character,
        give.len(),
        receive.len(),
        max_size
    );

    Ok(TradeProposal::new(give, receive))
}

/// Split `limit` between the give and receive sides.
///
/// Each side first gets half the limit, the odd unit going to give. A side
/// that needs less than its half hands the rest to the other side.
pub fn split_limit(give: usize, receive: usize, limit: usize) -> (usize, usize) {
    if give + receive <= limit {
        return (give, receive);
    }

    let give_quota = limit.div_ceil(2);
    let receive_quota = limit / 2;

    if give < give_quota {
        (give, limit - give)
    } else if receive < receive_quota {
        (limit - receive, receive)
    } else {
        (give_quota, receive_quota)
    }
}

fn ranked(ids: impl Iterator<Item = MonsterId>, catalog: &ZoneCatalog) -> Vec<MonsterId> {
    let mut known: Vec<&MonsterDescriptor> = ids
        .filter_map(|id| {
            let descriptor = catalog.get(id);
            if descriptor.is_none() {
                debug!("Ignoring monster {} missing from the catalog", id);
            }
            descriptor
        })
        .collect();

    known.sort_by_key(|m| (Reverse(m.rarity), m.zone_order, m.id));
    known.into_iter().map(|m| m.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Rarity;
    use crate::collection::CharacterId;

    fn collection(character: &str, ids: &[u32]) -> CollectionState {
        CollectionState::from_parts(
            CharacterId::sanitize(character),
            ids.iter().copied().map(MonsterId),
            None,
        )
    }

    fn ids(raw: &[u32]) -> Vec<MonsterId> {
        raw.iter().copied().map(MonsterId).collect()
    }

    #[test]
    fn test_split_limit() {
        assert_eq!(split_limit(2, 3, 5), (2, 3));
        assert_eq!(split_limit(10, 10, 5), (3, 2));
        assert_eq!(split_limit(10, 10, 4), (2, 2));
        assert_eq!(split_limit(1, 10, 5), (1, 4));
        assert_eq!(split_limit(10, 1, 5), (4, 1));
        assert_eq!(split_limit(0, 10, 3), (0, 3));
        assert_eq!(split_limit(10, 10, 1), (1, 0));
    }

    #[test]
    fn test_ranking_rarity_then_zone_then_id() {
        let catalog = ZoneCatalog::new(vec![
            MonsterDescriptor::new(5, "E", "Z1", 1, Rarity::Common),
            MonsterDescriptor::new(4, "D", "Z0", 0, Rarity::Common),
            MonsterDescriptor::new(3, "C", "Z1", 1, Rarity::Legendary),
            MonsterDescriptor::new(2, "B", "Z1", 1, Rarity::Common),
            MonsterDescriptor::new(1, "A", "Z0", 0, Rarity::Rare),
        ]);
        let mine = collection("me", &[1, 2, 3, 4, 5, 77]);
        let theirs = collection("you", &[]);

        let proposal = propose_trade(&mine, &theirs, &catalog, 10).unwrap();
        assert_eq!(proposal.give, ids(&[3, 1, 4, 2, 5]));
        assert!(proposal.receive.is_empty());
        assert!(!proposal.balanced);
    }

    #[test]
    fn test_limit_is_balanced_and_keeps_rarest() {
        let catalog = ZoneCatalog::new((1..=8).map(|id| {
            let rarity = if id % 2 == 0 { Rarity::Rare } else { Rarity::Common };
            MonsterDescriptor::new(id, format!("M{}", id), "Z", 0, rarity)
        }));
        let mine = collection("me", &[1, 2, 3, 4]);
        let theirs = collection("you", &[5, 6, 7, 8]);

        let proposal = propose_trade(&mine, &theirs, &catalog, 3).unwrap();
        assert_eq!(proposal.give, ids(&[2, 4]));
        assert_eq!(proposal.receive, ids(&[6]));
        assert!(proposal.balanced);
    }

    #[test]
    fn test_zero_limit_is_invalid_configuration() {
        let catalog = ZoneCatalog::default();
        let err = propose_trade(&collection("a", &[]), &collection("b", &[]), &catalog, 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }
}
