//! Trade matching between two players' collections

pub mod engine;
pub mod proposal;

pub use engine::{propose_trade, split_limit};
pub use proposal::TradeProposal;
