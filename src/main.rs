mod aggregator;
mod context;
mod diagnostics;
mod errors;
mod fetcher;
mod loader;
mod models;
mod normalizer;
mod pipeline;
mod refresh;
mod report;
mod resolver;
mod schedule;
mod scheduler;
mod server;
mod sessions;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Arg, ArgMatches, Command};
use context::AppContext;
use env_logger::Env;
use log::{info, warn};
use models::Config;
use normalizer::FacilityNameNormalizer;
use refresh::{GateOutcome, RefreshTrigger};
use report::SnapshotStore;
use std::path::{Path, PathBuf};

fn input_arg() -> Arg {
    Arg::new("input")
        .short('i')
        .long("input")
        .value_name("PATH")
        .help("Workbook file or directory of <sector>.csv files (defaults to data.local_workbook)")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = Command::new("outreach-dashboard")
        .version("1.0")
        .about("Aggregates outreach call-center exports into dashboard metrics")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml")
                .global(true),
        )
        .subcommand(
            Command::new("serve").about("Run the dashboard API server (default)").arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .value_name("PORT")
                    .value_parser(clap::value_parser!(u16))
                    .help("Port to listen on"),
            ),
        )
        .subcommand(
            Command::new("process")
                .about("Process a local export once and write the dashboard files")
                .arg(input_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Print row and national ID counts for each sector")
                .arg(input_arg()),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "config.toml".to_string());

    // Load or create configuration
    let mut config = if Path::new(&config_file).exists() {
        info!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(&config_file)
            .with_context(|| format!("Failed to load {}", config_file))?
    } else {
        info!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(&config_file)?;
        default_config
    };
    config.apply_environment();

    match matches.subcommand() {
        Some(("process", sub)) => process(&config, sub),
        Some(("verify", sub)) => verify(&config, sub),
        Some(("serve", sub)) => {
            if let Some(port) = sub.get_one::<u16>("port") {
                config.server.port = *port;
            }
            serve(config).await
        }
        _ => serve(config).await,
    }
}

fn input_path(config: &Config, matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<String>("input")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&config.data.local_workbook))
}

async fn serve(config: Config) -> Result<()> {
    // Step 1: Restore schedule and last snapshot
    let ctx = AppContext::new(config);

    // Step 2: Initial sync from the configured source
    info!("🔄 Syncing dashboard data on startup...");
    match ctx.refresh(RefreshTrigger::Startup, true).await {
        GateOutcome::Completed(report) => info!(
            "✅ Startup sync complete: {} people from {} sectors",
            report.total_population, report.loaded_sectors
        ),
        GateOutcome::Failed(e) if ctx.snapshot().is_some() => {
            warn!("⚠️  Startup sync failed, serving previous data: {}", e)
        }
        GateOutcome::Failed(e) => warn!("⚠️  Startup sync failed, no data to serve yet: {}", e),
        GateOutcome::InProgress | GateOutcome::CoolingDown { .. } => {}
    }

    // Step 3: Background refresh, then serve
    ctx.restart_scheduler();
    let result = server::serve(ctx.clone()).await;

    ctx.shutdown().await;
    info!("👋 Server stopped");
    result
}

fn process(config: &Config, matches: &ArgMatches) -> Result<()> {
    let input = input_path(config, matches);
    if !input.exists() {
        bail!("Input not found: {}", input.display());
    }

    let mut loader = loader::open_loader(&input)?;
    let normalizer = FacilityNameNormalizer::new(config.data.facility_prefixes.clone());
    let outcome = pipeline::run_pipeline(
        loader.as_mut(),
        &config.data.sectors,
        &normalizer,
        Utc::now(),
    );

    for skipped in &outcome.skipped_sectors {
        println!("⚠️  {} skipped: {}", skipped.sector, skipped.reason);
    }
    if outcome.loaded_sectors() == 0 {
        bail!("No sector could be loaded from {}", input.display());
    }

    let store = SnapshotStore::new(&config.data.snapshot_path, &config.data.summary_path);
    store.persist(&outcome.snapshot)?;
    let summary = store.write_summary(&outcome.snapshot)?;
    println!("{}", summary);
    println!(
        "✅ Processed {} sectors, {} rows skipped for empty facility name",
        outcome.loaded_sectors(),
        outcome.total_skipped_rows()
    );
    Ok(())
}

fn verify(config: &Config, matches: &ArgMatches) -> Result<()> {
    let input = input_path(config, matches);
    if !input.exists() {
        bail!("Input not found: {}", input.display());
    }

    let mut loader = loader::open_loader(&input)?;
    let normalizer = FacilityNameNormalizer::new(config.data.facility_prefixes.clone());
    let verification = diagnostics::verify_counts(loader.as_mut(), &config.data.sectors, &normalizer);
    println!("{}", verification.render());
    Ok(())
}
