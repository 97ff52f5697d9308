//! Per-character collection state and everything that reads or writes it

pub mod aggregator;
pub mod character;
pub mod state;
pub mod store;
pub mod summary;

pub use aggregator::{AggregationOutcome, RejectReason, ResultAggregator, ThresholdTable};
pub use character::CharacterId;
pub use state::{CollectionReader, CollectionState};
pub use store::{CollectionStore, JsonFileStore, MemoryStore, SyncSource};
pub use summary::{CollectionSummary, SousZoneProgress, StepProgress, ZoneProgress};
