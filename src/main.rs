//! archi - archimonster collection tracker
//!
//! Usage:
//!   archi scan [--character ID] [--replay DIR] [--duration-secs N]
//!   archi trade --mine ID (--theirs ID | --theirs-list TEXT) [--max-size N]
//!   archi summary [--character ID] [--detail]
//!   archi steps [--character ID] [--validate N,..] [--unvalidate N,..]
//!   archi export [--character ID]

use anyhow::{Context, bail};
use archi_core::{
    CharacterId, CollectionState, CollectionStore, CollectionSummary, JsonFileStore, SyncSource,
    propose_trade,
};
use clap::{Args, Parser, Subcommand};
use config::AppConfig;
use session::ScanOptions;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod session;

#[derive(Parser)]
#[command(name = "archi")]
#[command(about = "Archimonster collection tracker: screen scanning and trade matching")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "archi.json")]
    config: PathBuf,

    /// Debug logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the screen for captured monsters
    Scan(ScanArgs),
    /// Propose a trade between two collections
    Trade(TradeArgs),
    /// Show capture progress per zone
    Summary(SummaryArgs),
    /// Show or change the quest steps already handed in
    Steps(StepArgs),
    /// Print captured ids as JSON
    Export(CharacterArgs),
}

#[derive(Args)]
struct CharacterArgs {
    /// Character id (defaults to $ARCHI_PROFILE, then the last scanned one)
    #[arg(long)]
    character: Option<String>,
}

#[derive(Args)]
struct SummaryArgs {
    #[command(flatten)]
    character: CharacterArgs,

    /// Also list sub-zones and quest steps
    #[arg(long)]
    detail: bool,
}

#[derive(Args)]
struct StepArgs {
    #[command(flatten)]
    character: CharacterArgs,

    /// Mark steps as handed in
    #[arg(long, value_delimiter = ',')]
    validate: Vec<u32>,

    /// Take steps back
    #[arg(long, value_delimiter = ',')]
    unvalidate: Vec<u32>,
}

#[derive(Args)]
struct ScanArgs {
    #[command(flatten)]
    character: CharacterArgs,

    /// Replay saved screenshots from a directory
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[derive(Args)]
struct TradeArgs {
    /// My character id
    #[arg(long)]
    mine: String,

    /// Other character id, read from the store
    #[arg(long, conflicts_with = "theirs_list", required_unless_present = "theirs_list")]
    theirs: Option<String>,

    /// Other player's list of monster names (comma, semicolon or newline separated)
    #[arg(long)]
    theirs_list: Option<String>,

    /// Override trade.max_size
    #[arg(long)]
    max_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Scan(args) => scan(&config, args).await,
        Commands::Trade(args) => trade(&config, args),
        Commands::Summary(args) => summary(&config, args),
        Commands::Steps(args) => steps(&config, args),
        Commands::Export(args) => export(&config, args),
    }
}

/// Requested character, else the last one scanned, else `default`
fn resolve_character(explicit: Option<&str>, store: &JsonFileStore) -> anyhow::Result<CharacterId> {
    if let Some(character) = AppConfig::requested_character(explicit) {
        return Ok(character);
    }
    let active = store
        .active_profile()
        .with_context(|| format!("reading {}", store.path().display()))?;
    Ok(active.unwrap_or_else(|| CharacterId::sanitize(CharacterId::DEFAULT)))
}

async fn scan(config: &AppConfig, args: ScanArgs) -> anyhow::Result<()> {
    let store = JsonFileStore::new(&config.store_path);
    let options = ScanOptions {
        character: resolve_character(args.character.character.as_deref(), &store)?,
        replay: args.replay,
        duration: args.duration_secs.map(Duration::from_secs),
    };

    let report = session::run_scan(config, options).await?;
    println!(
        "{}: {} new, {} already known, {} rejected",
        report.character, report.stats.added, report.stats.duplicates, report.stats.rejected
    );
    print_summary(&report.summary);

    if let Some(failure) = report.failure {
        bail!("scan stopped on a capture failure: {}", failure);
    }
    Ok(())
}

fn trade(config: &AppConfig, args: TradeArgs) -> anyhow::Result<()> {
    let catalog = session::load_catalog(config)?;
    let store = JsonFileStore::new(&config.store_path);

    let mine = session::load_collection(&store, &catalog, &CharacterId::sanitize(&args.mine))?;
    let theirs = match (&args.theirs, &args.theirs_list) {
        (Some(id), _) => session::load_collection(&store, &catalog, &CharacterId::sanitize(id))?,
        (None, Some(list)) => {
            let ids = catalog.resolve_names(list);
            if ids.is_empty() {
                bail!("no monster names recognized in --theirs-list");
            }
            CollectionState::from_parts(CharacterId::from("pasted-list"), ids, None)
        }
        (None, None) => bail!("one of --theirs or --theirs-list is required"),
    };

    let max_size = args.max_size.unwrap_or(config.trade.max_size);
    let proposal = propose_trade(&mine, &theirs, &catalog, max_size)?;

    if proposal.is_empty() {
        println!("Nothing to trade: neither side has a monster the other lacks.");
        return Ok(());
    }
    println!(
        "{}",
        proposal.message(&catalog, config.trade.whisper_target.as_deref())
    );
    if !proposal.balanced {
        println!("Warning: one side of this trade is empty.");
    }
    Ok(())
}

fn summary(config: &AppConfig, args: SummaryArgs) -> anyhow::Result<()> {
    let catalog = session::load_catalog(config)?;
    let store = JsonFileStore::new(&config.store_path);
    let character = resolve_character(args.character.character.as_deref(), &store)?;
    let state = session::load_collection(&store, &catalog, &character)?;

    if state.is_empty() {
        let known = store.characters()?;
        if !known.is_empty() && !known.contains(&character) {
            let names: Vec<&str> = known.iter().map(CharacterId::as_str).collect();
            println!("No collection stored for {} (known: {})", character, names.join(", "));
        }
    }
    println!("{}", character);
    let summary = CollectionSummary::compute(&state, &catalog);
    print_summary(&summary);
    if args.detail {
        println!("sub-zones:");
        for souszone in &summary.souszones {
            let label = format!("{} / {}", souszone.zone, souszone.souszone);
            println!("  {:<40} {:>3}/{:<3}", label, souszone.captured, souszone.total);
        }
        print_steps(&summary);
    }
    Ok(())
}

fn steps(config: &AppConfig, args: StepArgs) -> anyhow::Result<()> {
    let catalog = session::load_catalog(config)?;
    let store = JsonFileStore::new(&config.store_path);
    let character = resolve_character(args.character.character.as_deref(), &store)?;
    let mut state = session::load_collection(&store, &catalog, &character)?;

    let known: BTreeSet<u32> = catalog.iter().map(|m| m.step).filter(|step| *step > 0).collect();
    let mut changed = false;
    for step in args.validate {
        if !known.contains(&step) {
            bail!("step {} does not appear in the catalog", step);
        }
        changed |= state.validate_step(step);
    }
    for step in args.unvalidate {
        changed |= state.unvalidate_step(step);
    }
    if changed {
        store
            .put(&state)
            .with_context(|| format!("saving collection to {}", store.path().display()))?;
    }

    println!("{}", character);
    print_steps(&CollectionSummary::compute(&state, &catalog));
    Ok(())
}

fn export(config: &AppConfig, args: CharacterArgs) -> anyhow::Result<()> {
    let catalog = session::load_catalog(config)?;
    let store = JsonFileStore::new(&config.store_path);
    let character = resolve_character(args.character.as_deref(), &store)?;
    let ids = store
        .captured_ids(&character, &catalog)
        .with_context(|| format!("reading collection of {}", character))?;
    println!("{}", serde_json::to_string(&ids)?);
    Ok(())
}

fn print_summary(summary: &CollectionSummary) {
    println!(
        "captured {}/{} ({} missing, {} still needed)",
        summary.captured, summary.total, summary.missing, summary.needed
    );
    for zone in &summary.zones {
        println!("  {:<32} {:>3}/{:<3}", zone.zone, zone.captured, zone.total);
    }
}

fn print_steps(summary: &CollectionSummary) {
    println!("steps:");
    for step in &summary.steps {
        let mark = if step.validated { "  validated" } else { "" };
        println!("  {:>3} {:>3}/{:<3}{}", step.step, step.captured, step.total, mark);
    }
}
