use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use taxi_pipeline::config::PipelineConfig;
use taxi_pipeline::pipeline;
use taxi_pipeline::{CleaningTotals, IngestionSummary, MigrationReport};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taxi-pipeline")]
#[command(about = "Taxi trip ETL: Parquet files -> SQLite -> PostgreSQL -> MongoDB")]
struct Args {
    /// Print stage summaries as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Override DATA_DIR
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override ANALYTICAL_DB_PATH
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import new files from the data directory into the analytical store
    Ingest,
    /// Copy every analytical table into PostgreSQL
    Migrate {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Filter PostgreSQL trips into MongoDB
    Clean {
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Show analytical store statistics
    Stats,
    /// Run ingest, migrate and clean in order
    Run,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = args.db_path {
        config.analytical_db_path = path;
    }

    match args.command {
        Command::Ingest => {
            let summary = pipeline::run_ingestion_blocking(&config).await?;
            emit(args.json, &summary, print_ingestion)?;
        }
        Command::Migrate { batch_size } => {
            if let Some(size) = batch_size {
                config.migration_batch_size = size;
            }
            let report = pipeline::run_migration(&config).await?;
            emit(args.json, &report, print_migration)?;
        }
        Command::Clean { chunk_size } => {
            if let Some(size) = chunk_size {
                config.cleaning_chunk_size = size;
            }
            let totals = pipeline::run_cleaning(&config).await?;
            emit(args.json, &totals, print_cleaning)?;
        }
        Command::Stats => {
            let stats = pipeline::store_statistics(&config)?;
            emit(args.json, &stats, |s| {
                println!("Total trips:     {}", s.total_trips);
                println!("Files imported:  {}", s.files_imported);
                println!(
                    "Pickup range:    {} .. {}",
                    s.earliest_pickup.as_deref().unwrap_or("-"),
                    s.latest_dropoff.as_deref().unwrap_or("-")
                );
                println!("Database size:   {} bytes", s.database_size_bytes);
            })?;
        }
        Command::Run => {
            info!("Running all stages");
            let run = pipeline::run_all(&config).await?;
            emit(args.json, &run, |r| {
                print_ingestion(&r.ingestion);
                print_migration(&r.migration);
                print_cleaning(&r.cleaning);
            })?;
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_ingestion(summary: &IngestionSummary) {
    println!("\n=== Ingestion ===");
    println!(
        "imported: {}  skipped: {}  failed: {}  rows: {}",
        summary.imported_count(),
        summary.skipped_count(),
        summary.failed_count(),
        summary.rows_imported()
    );
    for file in &summary.files {
        println!("  {:<40} {:?}", file.file_id, file.status);
    }
}

fn print_migration(report: &MigrationReport) {
    println!("\n=== Migration ===");
    println!(
        "succeeded: {}  failed: {}  rows: {}",
        report.succeeded().count(),
        report.failed().count(),
        report.total_rows()
    );
    for table in &report.tables {
        println!("  {:<30} {:?}", table.table, table.status);
    }
}

fn print_cleaning(totals: &CleaningTotals) {
    println!("\n=== Cleaning ===");
    println!("batches:            {}", totals.batches);
    println!("rows read:          {}", totals.rows_read);
    println!("rows inserted:      {}", totals.rows_inserted);
    println!("null timestamps:    {}", totals.nulls_removed);
    println!("negative values:    {}", totals.negatives_removed);
    println!("outliers:           {}", totals.outliers_removed);
    println!("documents cleared:  {}", totals.documents_cleared);
}
