//! Ingest Service - Loads one entity's reporting workbook into the dashboard store
//!
//! Responsibilities:
//! - Check the filename really belongs to the selected entity before opening it
//! - Spool the upload into the uploads directory, removing it when done
//! - Extract KPI rows and chart datasets sheet by sheet
//! - Upsert everything under the reporting period, creating the period on demand
//!
//! Usage:
//!   cargo run --bin ingest -- --file janashakthi_limited_august.xlsx \
//!       --entity janashakthi-limited --month August --year 2025
//!
//!   # Parse and validate without writing:
//!   cargo run --bin ingest -- --file ... --entity ... --month August --year 2025 --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use dashboard::storage::{self, db::Db};
use dashboard::{check_filename, ingest_file, preview_workbook, Entity, SpooledUpload, Workbook};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Loads an entity reporting workbook into the dashboard store")]
struct Args {
    /// Path to the workbook (.xlsx, .xls or .csv)
    #[arg(long)]
    file: PathBuf,

    /// Entity id the upload belongs to (e.g. janashakthi-limited)
    #[arg(long)]
    entity: String,

    /// Reporting month name (e.g. August)
    #[arg(long)]
    month: String,

    /// Reporting year
    #[arg(long)]
    year: i32,

    /// Spool directory (overrides UPLOADS_DIR)
    #[arg(long)]
    uploads_dir: Option<PathBuf>,

    /// Dry run - parse and validate without touching the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

struct Config {
    database_url: String,
    uploads_dir: PathBuf,
}

impl Config {
    fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "./data/dashboard.db".to_string()),
            uploads_dir: PathBuf::from(
                std::env::var("UPLOADS_DIR").unwrap_or_else(|_| "./data/uploads".to_string()),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let args = Args::parse();
    let config = Config::from_env();

    println!("=== Dashboard Ingest ===");
    println!("File: {}", args.file.display());
    println!("Entity: {}", args.entity);
    println!("Period: {} {}", args.month, args.year);
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let entity: Entity = args.entity.parse().context("Unknown entity id")?;
    let filename = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .context("File path has no usable filename")?;

    if args.dry_run {
        check_filename(&filename, entity)?;
        println!("✓ Filename matches {}", entity.display_name());

        let mut workbook = Workbook::from_path(&args.file)?;
        let preview = preview_workbook(entity, &mut workbook)?;

        println!("\nRecognized sheets:");
        for item in &preview.items {
            let note = if item.storable { "" } else { ", empty - would be skipped" };
            println!("  ✓ '{}' -> {} ({} rows{})", item.sheet, item.data_key, item.rows, note);
        }
        for key in &preview.missing_sheets {
            println!("  ⚠ No sheet found for '{}'", key);
        }

        println!("\nDry run - nothing written to the database");
        println!("Would store {} KPI row(s) and {} chart dataset(s)", preview.kpi_count, preview.chart_count);
        return Ok(());
    }

    let db = Db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    storage::init_schema(&db).await?;
    println!("Database: {}", db.backend_name());

    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    println!("Read {} bytes", bytes.len());

    let uploads_dir = args.uploads_dir.unwrap_or(config.uploads_dir);
    let upload = SpooledUpload::create(&uploads_dir, &filename, &bytes)?;
    println!("Spooled to: {}", upload.path().display());

    let summary = ingest_file(&db, entity, &args.month, args.year, upload).await?;

    println!("\n=== Ingest Summary ===");
    println!("Period: {}", summary.period_key);
    println!("KPI rows upserted: {}", summary.kpi_count);
    println!("Chart datasets replaced: {}", summary.chart_count);
    for key in &summary.data_keys {
        println!("  ✓ {}", key);
    }

    Ok(())
}
