//! One scanning session: catalog, templates, controller and aggregator
//! wired together, with the collection persisted at the end.

use crate::config::AppConfig;
use anyhow::{Context, bail};
use archi_core::{
    CharacterId, CollectionState, CollectionStore, CollectionSummary, JsonFileStore,
    ResultAggregator, ZoneCatalog,
};
use archi_cv::{
    CaptureController, CaptureProcess, CommandCapture, IngestStats, ReplayCapture,
    TemplateLoader, TemplateMatcher, run_aggregator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct ScanOptions {
    pub character: CharacterId,
    /// Read frames from this directory instead of the capture helper
    pub replay: Option<PathBuf>,
    /// Stop on its own after this long
    pub duration: Option<Duration>,
}

#[derive(Debug)]
pub struct ScanReport {
    pub character: CharacterId,
    pub stats: IngestStats,
    pub summary: CollectionSummary,
    /// Set when the scan ended on a capture failure
    pub failure: Option<String>,
}

/// Load the catalog, logging how many entries were skipped
pub fn load_catalog(config: &AppConfig) -> anyhow::Result<Arc<ZoneCatalog>> {
    let load = ZoneCatalog::load(&config.catalog_path)
        .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?;
    if !load.warnings.is_empty() {
        tracing::warn!(skipped = load.warnings.len(), "catalog entries skipped");
    }
    Ok(Arc::new(load.catalog))
}

/// Stored collection of `character`, empty when never scanned.
///
/// Ids the catalog no longer lists are left out.
pub fn load_collection(
    store: &dyn CollectionStore,
    catalog: &ZoneCatalog,
    character: &CharacterId,
) -> anyhow::Result<CollectionState> {
    let mut state = store
        .get(character)
        .with_context(|| format!("reading collection of {}", character))?
        .unwrap_or_else(|| CollectionState::new(character.clone()));

    let unknown = state.retain_known(catalog);
    if !unknown.is_empty() {
        tracing::warn!(
            character = %character,
            ignored = ?unknown,
            "stored captures missing from the catalog"
        );
    }
    Ok(state)
}

fn capture_process(config: &AppConfig, options: &ScanOptions) -> anyhow::Result<Box<dyn CaptureProcess>> {
    if let Some(dir) = &options.replay {
        return Ok(Box::new(ReplayCapture::new(dir)));
    }
    let Some(command) = &config.scan.capture_command else {
        bail!("no scan.capture_command configured (or pass --replay DIR)");
    };
    let read_timeout = config.scan.controller().interval * 5;
    Ok(Box::new(
        CommandCapture::new(command.clone(), config.scan.capture_args.clone())
            .with_read_timeout(read_timeout),
    ))
}

pub async fn run_scan(config: &AppConfig, options: ScanOptions) -> anyhow::Result<ScanReport> {
    let catalog = load_catalog(config)?;

    let templates = TemplateLoader::new()
        .add_template_dir(&config.templates_dir)
        .load_for_catalog(&catalog, &config.matching);
    if templates.is_empty() {
        bail!("no templates found in {}", config.templates_dir.display());
    }
    tracing::info!(templates = templates.len(), monsters = catalog.len(), "templates loaded");

    let store = JsonFileStore::new(&config.store_path);
    let initial = load_collection(&store, &catalog, &options.character)?;
    tracing::info!(
        character = %options.character,
        captured = initial.len(),
        "collection loaded"
    );

    let aggregator = ResultAggregator::new(initial, catalog.clone(), templates.thresholds());
    let reader = aggregator.reader();

    let process = capture_process(config, &options)?;
    let matcher = Arc::new(TemplateMatcher::new(config.matching.clone()));
    let mut controller =
        CaptureController::new(config.scan.controller(), matcher, Arc::new(templates), process);

    let (events, rx) = mpsc::channel(config.scan.channel_capacity);
    let consumer = tokio::spawn(run_aggregator(rx, aggregator));

    controller.start(events, reader).await?;

    let mut status = controller.subscribe();
    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        _ = deadline => tracing::info!("scan duration elapsed"),
        _ = status.wait_for(|s| !s.is_active()) => {}
    }

    if let Err(err) = controller.stop().await {
        tracing::warn!(error = %err, "scan did not stop cleanly");
    }
    let failure = controller.last_error();
    drop(controller);

    let (aggregator, stats) = consumer.await.context("event consumer failed")?;
    let state = aggregator.snapshot();
    store
        .put(&state)
        .with_context(|| format!("saving collection to {}", store.path().display()))?;

    Ok(ScanReport {
        character: options.character,
        stats,
        summary: CollectionSummary::compute(&state, &catalog),
        failure,
    })
}
