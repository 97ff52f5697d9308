//! Archimonster collection core
//!
//! Zone catalog, per-character collection state, the single-writer result
//! aggregator fed by scan events, and the trade matching engine.

pub mod catalog;
pub mod collection;
pub mod error;
pub mod event;
pub mod trade;

pub use catalog::{CatalogLoad, CatalogWarning, MonsterDescriptor, MonsterId, Rarity, ZoneCatalog};
pub use collection::{
    AggregationOutcome, CharacterId, CollectionReader, CollectionState, CollectionStore,
    CollectionSummary, JsonFileStore, MemoryStore, RejectReason, ResultAggregator, SyncSource,
    ThresholdTable,
};
pub use error::CoreError;
pub use event::{FrameRef, Region, ScanEvent};
pub use trade::{TradeProposal, propose_trade};
