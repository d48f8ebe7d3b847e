use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracker_core::{horizon_groups, league_table, status_summary, LeagueSort};
use tracker_sync::{EnrichmentHook, SourceMetadataEnrichment, TrackerConfig, TrackerPipeline};

#[derive(Debug, Parser)]
#[command(name = "tracker-cli")]
#[command(about = "AI action plan delivery tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load recommendations (cache, live sheet, then bundled data) and print them.
    Fetch,
    /// Drop the cached snapshot and load again.
    Refresh,
    /// Parse a local CSV export without touching the cache.
    Parse {
        file: PathBuf,
        /// Overlay action plan and government response citations.
        #[arg(long)]
        enrich: bool,
    },
    Summary,
    League {
        #[arg(long, default_value = "progress")]
        sort: String,
    },
    /// Group recommendations into short, medium and long delivery horizons.
    Timeline,
    Invalidate,
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => {
            let report = pipeline()?.load().await;
            info!(outcome = ?report.outcome, records = report.recommendations.len(), "load complete");
            print_json(&report.recommendations)?;
        }
        Commands::Refresh => {
            let report = pipeline()?.refresh().await;
            info!(outcome = ?report.outcome, records = report.recommendations.len(), "refresh complete");
            print_json(&report.recommendations)?;
        }
        Commands::Parse { file, enrich } => {
            let mut sheet = tracker_adapters::parse_csv_file(&file)?;
            if enrich {
                let hook = SourceMetadataEnrichment::bundled()
                    .context("loading bundled source citations")?;
                sheet.recommendations = hook.apply(sheet.recommendations);
            }
            info!(
                header_line = sheet.header_line,
                data_rows = sheet.data_rows,
                dropped_rows = sheet.dropped_rows,
                "parsed {}",
                file.display()
            );
            print_json(&sheet.recommendations)?;
        }
        Commands::Summary => {
            let records = pipeline()?.fetch_data().await;
            print_json(&status_summary(&records))?;
        }
        Commands::League { sort } => {
            let Some(sort) = LeagueSort::from_label(&sort) else {
                bail!("unknown sort {sort:?}; expected progress, completed or delayed");
            };
            let records = pipeline()?.fetch_data().await;
            print_json(&league_table(&records, sort))?;
        }
        Commands::Timeline => {
            let records = pipeline()?.fetch_data().await;
            print_json(&horizon_groups(&records))?;
        }
        Commands::Invalidate => {
            let pipeline = pipeline()?;
            pipeline.invalidate().await;
            println!("cache invalidated: key={}", pipeline.cache().key());
        }
        Commands::Serve => {
            tracker_web::serve_from_env().await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn pipeline() -> Result<TrackerPipeline> {
    TrackerPipeline::from_config(&TrackerConfig::from_env())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}
