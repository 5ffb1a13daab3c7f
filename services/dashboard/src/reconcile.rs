//! Repair of accumulated storage rows.
//!
//! Older writer code keyed chart rows inconsistently and raced itself into
//! duplicates; the current schema prevents new ones, but databases carried
//! forward still hold them. Reconciliation resolves legacy dataset keys to
//! their canonical names and then keeps only the newest row (maximum id) per
//! logical key. Running it twice in a row finds nothing the second time.

use crate::entity::Entity;
use crate::error::Result;
use crate::extract;
use crate::storage::db::Db;

/// Legacy snake_case dataset keys superseded by the canonical camelCase
/// keys the registry writes.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("fce_market_turnover", "fceMarketTurnover"),
    ("wacd_movement", "wacdMovement"),
    ("share_composition", "shareComposition"),
    ("maturity_profile", "maturityProfile"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    /// Alias rows removed or renamed to their canonical key.
    pub aliases_resolved: u64,
    pub kpis_deleted: u64,
    pub charts_deleted: u64,
    pub kpis_remaining: i64,
    pub charts_remaining: i64,
}

impl ReconcileSummary {
    pub fn total_deleted(&self) -> u64 {
        self.aliases_resolved + self.kpis_deleted + self.charts_deleted
    }
}

/// Duplicate counts without touching anything; the dry-run view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DuplicateReport {
    pub duplicate_kpis: i64,
    pub duplicate_charts: i64,
    pub alias_rows: i64,
}

impl DuplicateReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_kpis == 0 && self.duplicate_charts == 0 && self.alias_rows == 0
    }
}

fn canonical_tag(key: &str) -> Option<&'static str> {
    Entity::ALL
        .into_iter()
        .flat_map(extract::rules_for)
        .find(|rule| rule.data_key == key)
        .and_then(|rule| extract::chart_tag(rule.kind))
}

/// Resolve key aliases, then delete all but the maximum-id row per logical
/// key, for KPIs and chart datasets alike.
pub async fn reconcile(db: &Db) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();

    for (legacy, canonical) in KEY_ALIASES {
        // The alias may itself be duplicated; thin it to one row per
        // (entity, period) before renaming anything.
        let thinned = db
            .execute(
                "DELETE FROM chart_data WHERE data_key = ? AND id NOT IN (\
                 SELECT MAX(id) FROM chart_data WHERE data_key = ? \
                 GROUP BY entity_id, period_id)",
                &[(*legacy).into(), (*legacy).into()],
            )
            .await?
            .rows_affected;

        // Where a canonical row already exists the alias is stale history.
        let discarded = db
            .execute(
                "DELETE FROM chart_data WHERE data_key = ? AND EXISTS (\
                 SELECT 1 FROM chart_data c2 WHERE c2.entity_id = chart_data.entity_id \
                 AND c2.period_id = chart_data.period_id AND c2.data_key = ?)",
                &[(*legacy).into(), (*canonical).into()],
            )
            .await?
            .rows_affected;

        // Whatever is left is the only copy: adopt it under the canonical
        // key and tag.
        let mut adopted = 0;
        if let Some(tag) = canonical_tag(canonical) {
            adopted = db
                .execute(
                    "UPDATE chart_data SET data_key = ?, chart_type = ? WHERE data_key = ?",
                    &[(*canonical).into(), tag.into(), (*legacy).into()],
                )
                .await?
                .rows_affected;
        }
        summary.aliases_resolved += thinned + discarded + adopted;
    }

    summary.kpis_deleted = db
        .execute(
            "DELETE FROM kpis WHERE id NOT IN (\
             SELECT MAX(id) FROM kpis GROUP BY entity_id, period_id, name)",
            &[],
        )
        .await?
        .rows_affected;

    summary.charts_deleted = db
        .execute(
            "DELETE FROM chart_data WHERE id NOT IN (\
             SELECT MAX(id) FROM chart_data GROUP BY entity_id, period_id, data_key)",
            &[],
        )
        .await?
        .rows_affected;

    summary.kpis_remaining = count_rows(db, "SELECT COUNT(*) AS n FROM kpis").await?;
    summary.charts_remaining = count_rows(db, "SELECT COUNT(*) AS n FROM chart_data").await?;
    Ok(summary)
}

pub async fn report(db: &Db) -> Result<DuplicateReport> {
    let mut report = DuplicateReport {
        duplicate_kpis: count_rows(
            db,
            "SELECT COUNT(*) AS n FROM kpis WHERE id NOT IN (\
             SELECT MAX(id) FROM kpis GROUP BY entity_id, period_id, name)",
        )
        .await?,
        duplicate_charts: count_rows(
            db,
            "SELECT COUNT(*) AS n FROM chart_data WHERE id NOT IN (\
             SELECT MAX(id) FROM chart_data GROUP BY entity_id, period_id, data_key)",
        )
        .await?,
        alias_rows: 0,
    };
    for (legacy, _) in KEY_ALIASES {
        report.alias_rows += count_alias_rows(db, legacy).await?;
    }
    Ok(report)
}

async fn count_rows(db: &Db, sql: &str) -> Result<i64> {
    Ok(db
        .fetch_optional(sql, &[])
        .await?
        .and_then(|row| row.int("n"))
        .unwrap_or(0))
}

async fn count_alias_rows(db: &Db, legacy: &str) -> Result<i64> {
    Ok(db
        .fetch_optional(
            "SELECT COUNT(*) AS n FROM chart_data WHERE data_key = ?",
            &[legacy.into()],
        )
        .await?
        .and_then(|row| row.int("n"))
        .unwrap_or(0))
}

// ============================================================================
// Tests
// ============================================================================
