//! Storage gateway: schema, seeding and the typed operations the pipeline
//! and the service binaries use.
//!
//! All SQL here is dialect-portable and goes through the uniform query layer
//! in [`db`]; the only per-engine text is the DDL. Reads are deterministic:
//! every listing is explicitly ordered.

pub mod db;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::charts::ChartValue;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::extract::KpiRow;

use db::{Db, SqlValue};

// ============================================================================
// Schema
// ============================================================================

const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        short_name TEXT,
        description TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS periods (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        month TEXT NOT NULL,
        year INTEGER NOT NULL,
        period_key TEXT UNIQUE NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS kpis (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id TEXT NOT NULL,
        period_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        actual_value REAL,
        budget_value REAL,
        unit TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(entity_id, period_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS chart_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id TEXT NOT NULL,
        period_id INTEGER NOT NULL,
        chart_type TEXT NOT NULL,
        data_key TEXT NOT NULL,
        data_value TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(entity_id, period_id, data_key)
    )",
    "CREATE TABLE IF NOT EXISTS upload_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id TEXT,
        period_id INTEGER,
        filename TEXT,
        status TEXT,
        error_message TEXT,
        uploaded_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
];

const POSTGRES_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        short_name TEXT,
        description TEXT,
        created_at TIMESTAMPTZ DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS periods (
        id BIGSERIAL PRIMARY KEY,
        month TEXT NOT NULL,
        year INTEGER NOT NULL,
        period_key TEXT UNIQUE NOT NULL,
        created_at TIMESTAMPTZ DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS kpis (
        id BIGSERIAL PRIMARY KEY,
        entity_id TEXT NOT NULL,
        period_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        actual_value DOUBLE PRECISION,
        budget_value DOUBLE PRECISION,
        unit TEXT,
        created_at TIMESTAMPTZ DEFAULT now(),
        updated_at TIMESTAMPTZ DEFAULT now(),
        UNIQUE(entity_id, period_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS chart_data (
        id BIGSERIAL PRIMARY KEY,
        entity_id TEXT NOT NULL,
        period_id BIGINT NOT NULL,
        chart_type TEXT NOT NULL,
        data_key TEXT NOT NULL,
        data_value TEXT,
        created_at TIMESTAMPTZ DEFAULT now(),
        UNIQUE(entity_id, period_id, data_key)
    )",
    "CREATE TABLE IF NOT EXISTS upload_logs (
        id BIGSERIAL PRIMARY KEY,
        entity_id TEXT,
        period_id BIGINT,
        filename TEXT,
        status TEXT,
        error_message TEXT,
        uploaded_at TIMESTAMPTZ DEFAULT now()
    )",
];

/// Tables in creation order, shared with the inspection binary.
pub const TABLES: &[&str] = &["entities", "periods", "kpis", "chart_data", "upload_logs"];

/// Create the schema if absent and seed the entity reference set. Safe to
/// run on every startup; reruns change nothing.
pub async fn init_schema(db: &Db) -> Result<()> {
    let statements = match db {
        Db::Postgres(_) => POSTGRES_SCHEMA,
        Db::Sqlite(_) => SQLITE_SCHEMA,
    };
    for statement in statements {
        db.execute(statement, &[]).await?;
    }

    for entity in Entity::ALL {
        db.execute(
            "INSERT INTO entities (id, name, short_name, description) VALUES (?, ?, ?, ?) \
             ON CONFLICT (id) DO NOTHING",
            &[
                entity.id().into(),
                entity.display_name().into(),
                entity.short_code().into(),
                entity.description().into(),
            ],
        )
        .await?;
    }
    log::debug!("schema ready on {}", db.backend_name());
    Ok(())
}

// ============================================================================
// Periods
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub id: i64,
    pub month: String,
    pub year: i32,
    pub period_key: String,
}

/// Canonical month name, or None for anything that is not an English month
/// (full or three-letter, any case).
pub fn month_name(month: &str) -> Option<&'static str> {
    month.parse::<chrono::Month>().ok().map(|m| m.name())
}

fn month_number(month: &str) -> u32 {
    month
        .parse::<chrono::Month>()
        .map(|m| m.number_from_month())
        .unwrap_or(0)
}

pub fn period_key(month: &str, year: i32) -> String {
    format!("{month}-{year}")
}

async fn fetch_period(db: &Db, key: &str) -> Result<Option<Period>> {
    let row = db
        .fetch_optional(
            "SELECT id, month, year, period_key FROM periods WHERE period_key = ?",
            &[key.into()],
        )
        .await?;
    Ok(row.and_then(|row| {
        Some(Period {
            id: row.int("id")?,
            month: row.text("month")?.to_string(),
            year: row.int("year")? as i32,
            period_key: row.text("period_key")?.to_string(),
        })
    }))
}

/// Look up the period for (month, year), creating it on first sight. The
/// insert ignores conflicts and the row is re-read by key, so two racing
/// callers converge on the same id.
pub async fn create_or_get_period(db: &Db, month: &str, year: i32) -> Result<Period> {
    let canonical = month_name(month).ok_or_else(|| Error::InvalidPeriod(month.to_string()))?;
    let key = period_key(canonical, year);

    if let Some(period) = fetch_period(db, &key).await? {
        return Ok(period);
    }
    db.execute(
        "INSERT INTO periods (month, year, period_key) VALUES (?, ?, ?) \
         ON CONFLICT (period_key) DO NOTHING",
        &[canonical.into(), SqlValue::Int(year as i64), key.as_str().into()],
    )
    .await?;
    fetch_period(db, &key)
        .await?
        .ok_or(Error::Storage(sqlx::Error::RowNotFound))
}

/// All periods, newest first (year, then calendar month).
pub async fn list_periods(db: &Db) -> Result<Vec<Period>> {
    let rows = db
        .fetch_all("SELECT id, month, year, period_key FROM periods", &[])
        .await?;
    let mut periods: Vec<Period> = rows
        .into_iter()
        .filter_map(|row| {
            Some(Period {
                id: row.int("id")?,
                month: row.text("month")?.to_string(),
                year: row.int("year")? as i32,
                period_key: row.text("period_key")?.to_string(),
            })
        })
        .collect();
    periods.sort_by_key(|p| std::cmp::Reverse((p.year, month_number(&p.month))));
    Ok(periods)
}

// ============================================================================
// KPIs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiRecord {
    pub id: i64,
    pub name: String,
    pub actual: Option<f64>,
    pub budget: Option<f64>,
    pub unit: String,
}

/// Insert or refresh one KPI row. Identity fields never change on conflict;
/// values and the update timestamp do.
pub async fn upsert_kpi(db: &Db, entity: Entity, period_id: i64, row: &KpiRow) -> Result<()> {
    db.execute(
        "INSERT INTO kpis (entity_id, period_id, name, actual_value, budget_value, unit) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (entity_id, period_id, name) DO UPDATE SET \
         actual_value = excluded.actual_value, \
         budget_value = excluded.budget_value, \
         unit = excluded.unit, \
         updated_at = CURRENT_TIMESTAMP",
        &[
            entity.id().into(),
            SqlValue::Int(period_id),
            row.name.as_str().into(),
            row.actual.into(),
            row.budget.into(),
            row.unit.as_str().into(),
        ],
    )
    .await?;
    Ok(())
}

/// KPIs for one entity and period, ordered by name.
pub async fn get_kpis(db: &Db, entity: Entity, period_id: i64) -> Result<Vec<KpiRecord>> {
    let rows = db
        .fetch_all(
            "SELECT id, name, actual_value, budget_value, unit FROM kpis \
             WHERE entity_id = ? AND period_id = ? ORDER BY name",
            &[entity.id().into(), SqlValue::Int(period_id)],
        )
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            Some(KpiRecord {
                id: row.int("id")?,
                name: row.text("name")?.to_string(),
                actual: row.real("actual_value"),
                budget: row.real("budget_value"),
                unit: row.text("unit").unwrap_or_default().to_string(),
            })
        })
        .collect())
}

// ============================================================================
// Chart datasets
// ============================================================================

/// Replace the stored dataset under (entity, period, dataKey). Payloads with
/// nothing to show are skipped with a warning and leave storage untouched;
/// the return value says whether a row was written.
pub async fn save_chart_dataset(
    db: &Db,
    entity: Entity,
    period_id: i64,
    data_key: &str,
    value: &ChartValue,
) -> Result<bool> {
    let json = match value.validated_json(data_key) {
        Ok(json) => json,
        Err(Error::InvalidChartValue { .. }) => {
            log::warn!("skipping chart dataset {data_key}: no storable content");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    db.execute(
        "DELETE FROM chart_data WHERE entity_id = ? AND period_id = ? AND data_key = ?",
        &[entity.id().into(), SqlValue::Int(period_id), data_key.into()],
    )
    .await?;
    db.execute(
        "INSERT INTO chart_data (entity_id, period_id, chart_type, data_key, data_value) \
         VALUES (?, ?, ?, ?, ?)",
        &[
            entity.id().into(),
            SqlValue::Int(period_id),
            value.tag().into(),
            data_key.into(),
            json.into(),
        ],
    )
    .await?;
    Ok(true)
}

/// All chart datasets for one entity and period, keyed by dataKey. Rows that
/// fail to decode are skipped with a warning; one bad row never poisons the
/// rest.
pub async fn get_chart_datasets(
    db: &Db,
    entity: Entity,
    period_id: i64,
) -> Result<BTreeMap<String, ChartValue>> {
    let rows = db
        .fetch_all(
            "SELECT data_key, chart_type, data_value FROM chart_data \
             WHERE entity_id = ? AND period_id = ? \
             AND data_key IS NOT NULL \
             AND data_value IS NOT NULL AND data_value != '' \
             AND data_value != 'undefined' AND data_value != 'null' \
             ORDER BY data_key",
            &[entity.id().into(), SqlValue::Int(period_id)],
        )
        .await?;

    let mut datasets = BTreeMap::new();
    for row in rows {
        let (Some(key), Some(tag), Some(json)) = (
            row.text("data_key"),
            row.text("chart_type"),
            row.text("data_value"),
        ) else {
            continue;
        };
        match ChartValue::decode(tag, json) {
            Ok(value) if value.is_empty() => {
                log::warn!("stored chart dataset {key} is empty, skipping");
            }
            Ok(value) => {
                datasets.insert(key.to_string(), value);
            }
            Err(e) => {
                log::warn!("stored chart dataset {key} does not decode: {e}");
            }
        }
    }
    Ok(datasets)
}

// ============================================================================
// Read models
// ============================================================================

#[derive(Debug, Serialize)]
pub struct EntitySlice {
    pub kpis: Vec<KpiRecord>,
    pub charts: BTreeMap<String, serde_json::Value>,
}

/// Full dashboard read model, keyed by periodKey, then entityId. Entities
/// with nothing recorded for a period are left out.
pub async fn snapshot(
    db: &Db,
) -> Result<BTreeMap<String, BTreeMap<String, EntitySlice>>> {
    let mut out = BTreeMap::new();
    for period in list_periods(db).await? {
        let mut per_entity = BTreeMap::new();
        for entity in Entity::ALL {
            let kpis = get_kpis(db, entity, period.id).await?;
            let charts = get_chart_datasets(db, entity, period.id).await?;
            if kpis.is_empty() && charts.is_empty() {
                continue;
            }
            let mut chart_values = BTreeMap::new();
            for (key, value) in charts {
                match value.to_value() {
                    Ok(v) => {
                        chart_values.insert(key, v);
                    }
                    Err(e) => log::warn!("chart dataset {key} does not serialize: {e}"),
                }
            }
            per_entity.insert(entity.id().to_string(), EntitySlice { kpis, charts: chart_values });
        }
        if !per_entity.is_empty() {
            out.insert(period.period_key.clone(), per_entity);
        }
    }
    Ok(out)
}

/// Row counts per table, in creation order.
pub async fn table_counts(db: &Db) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let row = db
            .fetch_optional(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
            .await?;
        counts.push((*table, row.and_then(|r| r.int("n")).unwrap_or(0)));
    }
    Ok(counts)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::{LinePoint, PieSlice};

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        init_schema(&db).await.unwrap();
        db
    }

    fn kpi(name: &str, actual: Option<f64>, budget: Option<f64>, unit: &str) -> KpiRow {
        KpiRow {
            name: name.to_string(),
            actual,
            budget,
            unit: unit.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Schema and seeding
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_init_schema_is_idempotent_and_seeds_once() {
        let db = test_db().await;
        init_schema(&db).await.unwrap();
        init_schema(&db).await.unwrap();

        let rows = db
            .fetch_all("SELECT id, short_name FROM entities ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].text("id"), Some("first-capital"));
        assert_eq!(rows[0].text("short_name"), Some("FCH"));
    }

    // ------------------------------------------------------------------
    // Periods
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_or_get_period_converges_on_one_id() {
        let db = test_db().await;
        let first = create_or_get_period(&db, "June", 2025).await.unwrap();
        let second = create_or_get_period(&db, "June", 2025).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.period_key, "June-2025");

        let all = list_periods(&db).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_month_names_are_canonicalized() {
        let db = test_db().await;
        let lower = create_or_get_period(&db, "june", 2025).await.unwrap();
        let abbrev = create_or_get_period(&db, "Jun", 2025).await.unwrap();
        assert_eq!(lower.id, abbrev.id);
        assert_eq!(lower.month, "June");
    }

    #[tokio::test]
    async fn test_unknown_month_is_rejected() {
        let db = test_db().await;
        assert!(matches!(
            create_or_get_period(&db, "Junebruary", 2025).await,
            Err(Error::InvalidPeriod(_))
        ));
    }

    #[tokio::test]
    async fn test_periods_list_newest_first() {
        let db = test_db().await;
        create_or_get_period(&db, "May", 2025).await.unwrap();
        create_or_get_period(&db, "December", 2024).await.unwrap();
        create_or_get_period(&db, "June", 2025).await.unwrap();

        let keys: Vec<String> = list_periods(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.period_key)
            .collect();
        assert_eq!(keys, vec!["June-2025", "May-2025", "December-2024"]);
    }

    // ------------------------------------------------------------------
    // KPI upsert
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_upsert_kpi_replaces_values_not_identity() {
        let db = test_db().await;
        let period = create_or_get_period(&db, "June", 2025).await.unwrap();
        let entity = Entity::JanashakthiLimited;

        upsert_kpi(&db, entity, period.id, &kpi("GWP", Some(120.5), Some(110.0), "LKR Mn"))
            .await
            .unwrap();
        let before = get_kpis(&db, entity, period.id).await.unwrap();

        upsert_kpi(&db, entity, period.id, &kpi("GWP", Some(130.0), None, "LKR Mn"))
            .await
            .unwrap();
        let after = get_kpis(&db, entity, period.id).await.unwrap();

        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].actual, Some(130.0));
        assert_eq!(after[0].budget, None);
    }

    #[tokio::test]
    async fn test_get_kpis_orders_by_name_and_keeps_nulls() {
        let db = test_db().await;
        let period = create_or_get_period(&db, "June", 2025).await.unwrap();
        let entity = Entity::FirstCapital;

        upsert_kpi(&db, entity, period.id, &kpi("Trading Income", None, Some(90.0), ""))
            .await
            .unwrap();
        upsert_kpi(&db, entity, period.id, &kpi("AUM", Some(0.0), Some(12.0), "Bn"))
            .await
            .unwrap();

        let records = get_kpis(&db, entity, period.id).await.unwrap();
        assert_eq!(records[0].name, "AUM");
        assert_eq!(records[0].actual, Some(0.0));
        assert_eq!(records[1].name, "Trading Income");
        assert_eq!(records[1].actual, None);
    }

    // ------------------------------------------------------------------
    // Chart datasets
    // ------------------------------------------------------------------

    fn line_value(points: &[(&str, f64, f64)]) -> ChartValue {
        ChartValue::Line(
            points
                .iter()
                .map(|(m, a, b)| LinePoint {
                    month: m.to_string(),
                    actual: *a,
                    budget: *b,
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_save_chart_dataset_is_full_replace() {
        let db = test_db().await;
        let period = create_or_get_period(&db, "June", 2025).await.unwrap();
        let entity = Entity::JanashakthiLimited;

        let first = line_value(&[("Jun-25", 10.0, 12.0)]);
        let second = line_value(&[("Jun-25", 11.0, 12.0), ("Jul-25", 12.0, 12.0)]);
        assert!(save_chart_dataset(&db, entity, period.id, "wacdMovement", &first).await.unwrap());
        assert!(save_chart_dataset(&db, entity, period.id, "wacdMovement", &second).await.unwrap());

        let rows = db
            .fetch_all("SELECT id FROM chart_data WHERE data_key = ?", &["wacdMovement".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let datasets = get_chart_datasets(&db, entity, period.id).await.unwrap();
        assert_eq!(datasets.get("wacdMovement"), Some(&second));
    }

    #[tokio::test]
    async fn test_empty_payloads_are_never_persisted() {
        let db = test_db().await;
        let period = create_or_get_period(&db, "June", 2025).await.unwrap();
        let entity = Entity::FirstCapital;

        let stored =
            save_chart_dataset(&db, entity, period.id, "tradingComposition", &ChartValue::Pie(vec![]))
                .await
                .unwrap();
        assert!(!stored);

        let counts = table_counts(&db).await.unwrap();
        let charts = counts.iter().find(|(t, _)| *t == "chart_data").unwrap().1;
        assert_eq!(charts, 0);
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped_on_read() {
        let db = test_db().await;
        let period = create_or_get_period(&db, "June", 2025).await.unwrap();
        let entity = Entity::JanashakthiLimited;

        let good = ChartValue::Pie(vec![PieSlice {
            name: "Equities".into(),
            value: 60.0,
            color: "#8B5CF6".into(),
        }]);
        save_chart_dataset(&db, entity, period.id, "shareComposition", &good)
            .await
            .unwrap();
        // Legacy rows written by older code paths.
        for (key, tag, value) in [
            ("corrupt", "pie", "{not json"),
            ("mystery", "scatter", "[]"),
            ("sentinel", "pie", "undefined"),
            ("blank", "line", ""),
        ] {
            db.execute(
                "INSERT INTO chart_data (entity_id, period_id, chart_type, data_key, data_value) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    entity.id().into(),
                    SqlValue::Int(period.id),
                    tag.into(),
                    key.into(),
                    value.into(),
                ],
            )
            .await
            .unwrap();
        }

        let datasets = get_chart_datasets(&db, entity, period.id).await.unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets.get("shareComposition"), Some(&good));
    }

    // ------------------------------------------------------------------
    // Read models
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_snapshot_groups_by_period_then_entity() {
        let db = test_db().await;
        let june = create_or_get_period(&db, "June", 2025).await.unwrap();
        upsert_kpi(&db, Entity::JanashakthiFinance, june.id, &kpi("NII", Some(5.0), Some(6.0), ""))
            .await
            .unwrap();
        save_chart_dataset(
            &db,
            Entity::JanashakthiFinance,
            june.id,
            "loanComposition",
            &ChartValue::Pie(vec![PieSlice {
                name: "Gold".into(),
                value: 40.0,
                color: "#8B5CF6".into(),
            }]),
        )
        .await
        .unwrap();

        let snap = snapshot(&db).await.unwrap();
        let slice = &snap["June-2025"]["janashakthi-finance"];
        assert_eq!(slice.kpis.len(), 1);
        assert!(slice.charts.contains_key("loanComposition"));
        assert!(!snap["June-2025"].contains_key("first-capital"));
    }
}
