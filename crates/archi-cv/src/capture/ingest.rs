//! Single consumer between the controller and the aggregator

use archi_core::{AggregationOutcome, ResultAggregator, ScanEvent};
use tokio::sync::mpsc;

/// What happened to the events of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub added: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

impl IngestStats {
    pub fn total(&self) -> usize {
        self.added + self.duplicates + self.rejected
    }

    fn record(&mut self, outcome: &AggregationOutcome) {
        match outcome {
            AggregationOutcome::Added => self.added += 1,
            AggregationOutcome::DuplicateIgnored => self.duplicates += 1,
            AggregationOutcome::Rejected(_) => self.rejected += 1,
        }
    }
}

/// Apply events in arrival order until every sender is gone, then hand the
/// aggregator back for persisting.
pub async fn run_aggregator(
    mut rx: mpsc::Receiver<ScanEvent>,
    mut aggregator: ResultAggregator,
) -> (ResultAggregator, IngestStats) {
    let mut stats = IngestStats::default();

    while let Some(event) = rx.recv().await {
        let monster = event.monster;
        let outcome = aggregator.apply(event);
        if let AggregationOutcome::Rejected(reason) = &outcome {
            tracing::debug!(%monster, %reason, "scan event rejected");
        }
        stats.record(&outcome);
    }

    tracing::info!(
        added = stats.added,
        duplicates = stats.duplicates,
        rejected = stats.rejected,
        "event ingestion finished"
    );
    (aggregator, stats)
}
