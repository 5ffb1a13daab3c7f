//! Inspect Service - Prints what the dashboard store currently holds
//!
//! Walks every reporting period newest first and lists, per entity, the KPI
//! rows and chart datasets on record. Useful after an ingest run to confirm
//! the data landed where expected.
//!
//! Usage:
//!   cargo run --bin inspect

use anyhow::{Context, Result};
use dashboard::storage::{self, db::Db};
use dashboard::Entity;

fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "./data/dashboard.db".to_string());

    let db = Db::connect(&database_url)
        .await
        .context("Failed to connect to database")?;
    storage::init_schema(&db).await?;

    println!("=== Dashboard Inspect ===");
    println!("Database: {}", db.backend_name());

    println!("\nTables:");
    for (table, count) in storage::table_counts(&db).await? {
        println!("  {:<12} {}", table, count);
    }

    let periods = storage::list_periods(&db).await?;
    if periods.is_empty() {
        println!("\nNo reporting periods recorded yet");
        return Ok(());
    }

    println!("\nPeriods ({}):", periods.len());
    for period in &periods {
        println!("  {} (id {})", period.period_key, period.id);
    }

    let data = storage::snapshot(&db).await?;
    for period in &periods {
        let Some(per_entity) = data.get(&period.period_key) else {
            continue;
        };
        println!("\n{}", period.period_key);
        println!("{:-<60}", "");
        for entity in Entity::ALL {
            let Some(slice) = per_entity.get(entity.id()) else {
                continue;
            };
            println!("[{}] {}", entity.short_code(), entity.display_name());
            println!("  KPIs ({}):", slice.kpis.len());
            for kpi in slice.kpis.iter().take(5) {
                println!(
                    "    {} = {} / {} {}",
                    kpi.name,
                    fmt_value(kpi.actual),
                    fmt_value(kpi.budget),
                    kpi.unit
                );
            }
            if slice.kpis.len() > 5 {
                println!("    ... and {} more", slice.kpis.len() - 5);
            }
            let keys: Vec<&str> = slice.charts.keys().map(String::as_str).collect();
            println!("  Charts ({}): {}", keys.len(), keys.join(", "));
        }
    }

    Ok(())
}
