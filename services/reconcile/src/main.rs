//! Reconcile Service - Cleans up duplicate and legacy-keyed dashboard rows
//!
//! Responsibilities:
//! - Fold snake_case chart keys left behind by older uploaders into their
//!   canonical camelCase keys
//! - Collapse duplicated KPI rows and chart datasets down to the newest row
//! - Report remaining row counts so the run can be sanity checked
//!
//! Databases written under the current schema cannot accumulate duplicates,
//! so a second run over the same store reports nothing to do.
//!
//! Usage:
//!   cargo run --bin reconcile
//!
//!   # Count what would change without deleting anything:
//!   cargo run --bin reconcile -- --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use dashboard::reconcile::{reconcile, report};
use dashboard::storage::{self, db::Db};

#[derive(Parser, Debug)]
#[command(name = "reconcile", about = "Deduplicates dashboard rows and folds legacy chart keys")]
struct Args {
    /// Dry run - report duplicates without deleting anything
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let args = Args::parse();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "./data/dashboard.db".to_string());

    println!("=== Dashboard Reconcile ===");
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let db = Db::connect(&database_url)
        .await
        .context("Failed to connect to database")?;
    storage::init_schema(&db).await?;
    println!("Database: {}", db.backend_name());

    let found = report(&db).await?;
    println!("\nFound:");
    println!("  Duplicate KPI rows: {}", found.duplicate_kpis);
    println!("  Duplicate chart rows: {}", found.duplicate_charts);
    println!("  Legacy chart keys: {}", found.alias_rows);

    if args.dry_run {
        println!("\nDry run - nothing deleted");
        return Ok(());
    }

    if found.is_clean() {
        println!("\n✓ Store is already clean");
        return Ok(());
    }

    let summary = reconcile(&db).await?;

    println!("\n=== Reconcile Summary ===");
    println!("Legacy keys resolved: {}", summary.aliases_resolved);
    println!("KPI rows deleted: {}", summary.kpis_deleted);
    println!("Chart rows deleted: {}", summary.charts_deleted);
    println!("KPI rows remaining: {}", summary.kpis_remaining);
    println!("Chart rows remaining: {}", summary.charts_remaining);

    Ok(())
}
