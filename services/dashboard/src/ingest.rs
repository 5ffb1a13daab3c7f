//! The ingestion pipeline.
//!
//! One attempt runs: filename gate, workbook open, per-rule extraction,
//! persistence, in that order. Fatal conditions (mismatched file, malformed
//! workbook, storage failure) abort the attempt; sheet and dataset problems
//! are absorbed locally. Spooled upload files are scope guards and disappear
//! on every exit path.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use uuid::Uuid;

use crate::entity::{validate_filename, Entity};
use crate::error::{Error, Result};
use crate::extract::{self, Extraction};
use crate::storage::{self, db::Db};
use crate::workbook::Workbook;

/// What one ingestion attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    pub period_key: String,
    pub kpi_count: usize,
    pub chart_count: usize,
    /// Dataset keys actually stored, in rule order.
    pub data_keys: Vec<String>,
}

/// Run the filename gate for an upload submitted on behalf of `entity`.
pub fn check_filename(filename: &str, entity: Entity) -> Result<()> {
    let report = validate_filename(filename, entity);
    if report.is_valid {
        Ok(())
    } else {
        Err(Error::EntityMismatch {
            selected: entity.display_name(),
            detected: report.detected.map(|e| e.display_name()),
        })
    }
}

/// Ingest an already-open workbook into the period for (month, year).
pub async fn ingest_workbook(
    db: &Db,
    entity: Entity,
    month: &str,
    year: i32,
    workbook: &mut Workbook,
) -> Result<IngestSummary> {
    let period = storage::create_or_get_period(db, month, year).await?;
    let sheet_names = workbook.sheet_names();

    let mut kpi_count = 0;
    let mut chart_count = 0;
    let mut data_keys = Vec::new();

    for rule in extract::rules_for(entity) {
        let Some(sheet) = extract::find_sheet(rule, &sheet_names) else {
            log::debug!("{}: no sheet matches {}", entity.id(), rule.sheet);
            continue;
        };
        let grid = match workbook.read_sheet(&sheet) {
            Ok(grid) => grid,
            Err(e) => {
                log::warn!("sheet {sheet} could not be read, skipping: {e}");
                continue;
            }
        };
        match extract::run_strategy(rule.kind, &grid) {
            Extraction::Kpis(rows) => {
                for row in &rows {
                    storage::upsert_kpi(db, entity, period.id, row).await?;
                }
                kpi_count += rows.len();
            }
            Extraction::Chart(value) => {
                if storage::save_chart_dataset(db, entity, period.id, rule.data_key, &value).await? {
                    chart_count += 1;
                    data_keys.push(rule.data_key.to_string());
                }
            }
        }
    }

    log::debug!(
        "{} {}: {kpi_count} KPIs, {chart_count} chart datasets",
        entity.id(),
        period.period_key
    );
    Ok(IngestSummary {
        period_key: period.period_key,
        kpi_count,
        chart_count,
        data_keys,
    })
}

/// Gate the filename, open the bytes, ingest. The inbound shape used by the
/// upload layer.
pub async fn ingest_upload(
    db: &Db,
    entity: Entity,
    month: &str,
    year: i32,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<IngestSummary> {
    check_filename(filename, entity)?;
    let mut workbook = Workbook::from_bytes(filename, bytes)?;
    ingest_workbook(db, entity, month, year, &mut workbook).await
}

/// Ingest a spooled upload file. The guard travels by value, so the file is
/// deleted whether this returns a summary, a gate rejection, or a parse
/// failure.
pub async fn ingest_file(
    db: &Db,
    entity: Entity,
    month: &str,
    year: i32,
    upload: SpooledUpload,
) -> Result<IngestSummary> {
    check_filename(upload.original_name(), entity)?;
    let mut workbook = Workbook::from_path(upload.path())?;
    ingest_workbook(db, entity, month, year, &mut workbook).await
}

// ============================================================================
// Upload spool
// ============================================================================

/// An upload written to the spool directory. Dropping the guard removes the
/// file.
pub struct SpooledUpload {
    path: TempPath,
    original_name: String,
}

impl SpooledUpload {
    /// Spool uploaded bytes under `dir` as `{uuid}-{sanitized name}`.
    pub fn create(dir: &Path, original_name: &str, bytes: &[u8]) -> Result<SpooledUpload> {
        fs::create_dir_all(dir)?;
        let spooled = dir.join(format!("{}-{}", Uuid::new_v4(), sanitize_filename(original_name)));
        fs::write(&spooled, bytes)?;
        Ok(SpooledUpload {
            path: TempPath::from_path(spooled),
            original_name: original_name.to_string(),
        })
    }

    /// Take ownership of a file some other layer already wrote. It will be
    /// deleted like any spooled upload.
    pub fn adopt(path: PathBuf, original_name: &str) -> SpooledUpload {
        SpooledUpload {
            path: TempPath::from_path(path),
            original_name: original_name.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The name the file was uploaded under; the gate runs against this,
    /// not the uuid-prefixed spool name.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Dry run
// ============================================================================

#[derive(Debug, Clone)]
pub struct PreviewItem {
    pub data_key: &'static str,
    pub sheet: String,
    pub rows: usize,
    /// Whether the dataset would survive the empty-payload screen.
    pub storable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PreviewSummary {
    pub items: Vec<PreviewItem>,
    pub kpi_count: usize,
    pub chart_count: usize,
    pub missing_sheets: Vec<&'static str>,
}

/// Parse everything and report what an ingest would store, without touching
/// storage.
pub fn preview_workbook(entity: Entity, workbook: &mut Workbook) -> Result<PreviewSummary> {
    let sheet_names = workbook.sheet_names();
    let mut summary = PreviewSummary::default();

    for rule in extract::rules_for(entity) {
        let Some(sheet) = extract::find_sheet(rule, &sheet_names) else {
            summary.missing_sheets.push(rule.sheet);
            continue;
        };
        let grid = match workbook.read_sheet(&sheet) {
            Ok(grid) => grid,
            Err(e) => {
                log::warn!("sheet {sheet} could not be read, skipping: {e}");
                continue;
            }
        };
        match extract::run_strategy(rule.kind, &grid) {
            Extraction::Kpis(rows) => {
                summary.kpi_count += rows.len();
                summary.items.push(PreviewItem {
                    data_key: rule.data_key,
                    sheet,
                    rows: rows.len(),
                    storable: !rows.is_empty(),
                });
            }
            Extraction::Chart(value) => {
                let storable = value.validated_json(rule.data_key).is_ok();
                if storable {
                    summary.chart_count += 1;
                }
                summary.items.push(PreviewItem {
                    data_key: rule.data_key,
                    sheet,
                    rows: chart_rows(&value),
                    storable,
                });
            }
        }
    }
    Ok(summary)
}

fn chart_rows(value: &crate::charts::ChartValue) -> usize {
    use crate::charts::ChartValue;
    match value {
        ChartValue::Line(points) => points.len(),
        ChartValue::Pie(slices) => slices.len(),
        ChartValue::Matrix(matrix) => matrix.rows.len(),
        ChartValue::Composite(_) => 3,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::ChartValue;
    use rust_xlsxwriter::Workbook as XlsxBuilder;

    /// Build workbook bytes; numeric-looking cells become numbers.
    fn book(sheets: &[(&str, &[&[&str]])]) -> Vec<u8> {
        let mut builder = XlsxBuilder::new();
        for (name, rows) in sheets {
            let ws = builder.add_worksheet();
            ws.set_name(*name).unwrap();
            for (r, row) in rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    if value.is_empty() {
                        continue;
                    }
                    if let Ok(n) = value.parse::<f64>() {
                        ws.write_number(r as u32, c as u16, n).unwrap();
                    } else {
                        ws.write_string(r as u32, c as u16, *value).unwrap();
                    }
                }
            }
        }
        builder.save_to_buffer().unwrap()
    }

    fn limited_book() -> Vec<u8> {
        book(&[
            ("KPIs", &[
                &["Metric", "Actual", "Budget", "Unit"][..],
                &["GWP", "120.5", "110", "LKR Mn"][..],
                &["PAT", "notyet", "30", "LKR Mn"][..],
                &["Gearing", "0", "1", "x"][..],
            ]),
            ("Share Composition", &[
                &["Holder", "Share"][..],
                &["Institutional", "62.5"][..],
                &["Retail", "37.5"][..],
            ]),
            // Alias lookup target for the WACD rule.
            ("WACD vs AWPLR", &[
                &["Month", "WACD", "AWPLR"][..],
                &["Jun-25", "10.2", "11.1"][..],
                &["Jul-25", "10.4", "11.0"][..],
            ]),
            // Header only: extracts to an empty payload and must be skipped.
            ("Maturity Profile", &[&["Bucket", "Amount"][..]]),
            ("Notes", &[&["free text nobody parses"][..]]),
        ])
    }

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        storage::init_schema(&db).await.unwrap();
        db
    }

    // ------------------------------------------------------------------
    // End-to-end ingestion
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_ingest_counts_kpis_and_datasets() {
        let db = test_db().await;
        let summary = ingest_upload(
            &db,
            Entity::JanashakthiLimited,
            "August",
            2025,
            "JXG_August.xlsx",
            limited_book(),
        )
        .await
        .unwrap();

        assert_eq!(summary.period_key, "August-2025");
        assert_eq!(summary.kpi_count, 3);
        assert_eq!(summary.chart_count, 2);
        assert_eq!(summary.data_keys, vec!["shareComposition", "wacdMovement"]);

        let period = storage::create_or_get_period(&db, "August", 2025).await.unwrap();
        let kpis = storage::get_kpis(&db, Entity::JanashakthiLimited, period.id).await.unwrap();
        assert_eq!(kpis.len(), 3);
        let pat = kpis.iter().find(|k| k.name == "PAT").unwrap();
        assert_eq!(pat.actual, None);
        assert_eq!(pat.budget, Some(30.0));
        let gearing = kpis.iter().find(|k| k.name == "Gearing").unwrap();
        assert_eq!(gearing.actual, Some(0.0));

        let charts = storage::get_chart_datasets(&db, Entity::JanashakthiLimited, period.id)
            .await
            .unwrap();
        match charts.get("wacdMovement").unwrap() {
            ChartValue::Line(points) => {
                assert_eq!(points.len(), 2);
                assert_eq!(points[0].month, "Jun-25");
            }
            other => panic!("expected line series, got {other:?}"),
        }
        // The header-only pie sheet produced nothing storable.
        assert!(!charts.contains_key("maturityProfile"));
    }

    #[tokio::test]
    async fn test_reingesting_replaces_instead_of_duplicating() {
        let db = test_db().await;
        for _ in 0..2 {
            ingest_upload(
                &db,
                Entity::JanashakthiLimited,
                "August",
                2025,
                "JXG_August.xlsx",
                limited_book(),
            )
            .await
            .unwrap();
        }
        let counts = storage::table_counts(&db).await.unwrap();
        let by_name: std::collections::HashMap<_, _> = counts.into_iter().collect();
        assert_eq!(by_name["kpis"], 3);
        assert_eq!(by_name["chart_data"], 2);
        assert_eq!(by_name["periods"], 1);
    }

    #[tokio::test]
    async fn test_csv_upload_ingests_kpi_table_only() {
        let db = test_db().await;
        let csv = b"Metric,Actual,Budget,Unit\nNII,45.2,44,LKR Mn\nCost Ratio,,60,%\n".to_vec();
        let summary = ingest_upload(
            &db,
            Entity::JanashakthiFinance,
            "June",
            2025,
            "janashakthi_finance_june.csv",
            csv,
        )
        .await
        .unwrap();
        assert_eq!(summary.kpi_count, 2);
        assert_eq!(summary.chart_count, 0);
    }

    #[tokio::test]
    async fn test_mismatched_filename_is_rejected_before_parsing() {
        let db = test_db().await;
        let err = ingest_upload(
            &db,
            Entity::JanashakthiLimited,
            "August",
            2025,
            "JINS_August.xlsx",
            limited_book(),
        )
        .await
        .unwrap_err();
        match err {
            Error::EntityMismatch { selected, detected } => {
                assert_eq!(selected, "Janashakthi Limited");
                assert_eq!(detected, Some("Janashakthi Insurance PLC"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        let counts = storage::table_counts(&db).await.unwrap();
        assert!(counts.iter().all(|(t, n)| *t == "entities" || *n == 0));
    }

    // ------------------------------------------------------------------
    // Spooled files
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_spooled_file_is_deleted_on_success() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let upload =
            SpooledUpload::create(dir.path(), "JXG_August.xlsx", &limited_book()).unwrap();
        let spooled_path = upload.path().to_path_buf();
        assert!(spooled_path.exists());

        ingest_file(&db, Entity::JanashakthiLimited, "August", 2025, upload)
            .await
            .unwrap();
        assert!(!spooled_path.exists());
    }

    #[tokio::test]
    async fn test_spooled_file_is_deleted_on_gate_rejection() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let upload =
            SpooledUpload::create(dir.path(), "FCH_August.xlsx", &limited_book()).unwrap();
        let spooled_path = upload.path().to_path_buf();

        let result = ingest_file(&db, Entity::JanashakthiLimited, "August", 2025, upload).await;
        assert!(matches!(result, Err(Error::EntityMismatch { .. })));
        assert!(!spooled_path.exists());
    }

    #[tokio::test]
    async fn test_spooled_file_is_deleted_on_malformed_workbook() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let upload =
            SpooledUpload::create(dir.path(), "JXG_August.xlsx", b"PK\x03\x04nope").unwrap();
        let spooled_path = upload.path().to_path_buf();

        let result = ingest_file(&db, Entity::JanashakthiLimited, "August", 2025, upload).await;
        assert!(matches!(result, Err(Error::MalformedWorkbook { .. })));
        assert!(!spooled_path.exists());
    }

    #[tokio::test]
    async fn test_adopted_file_is_gated_by_original_name_and_deleted() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let written = dir.path().join("1755000000-upload.xlsx");
        fs::write(&written, limited_book()).unwrap();

        let upload = SpooledUpload::adopt(written.clone(), "JXG_August.xlsx");
        assert_eq!(upload.original_name(), "JXG_August.xlsx");

        ingest_file(&db, Entity::JanashakthiLimited, "August", 2025, upload)
            .await
            .unwrap();
        assert!(!written.exists());
    }

    #[test]
    fn test_spool_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let upload = SpooledUpload::create(dir.path(), "../evil name?.xlsx", b"x").unwrap();
        let name = upload.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.contains('/'));
        assert!(!name.contains('?'));
        assert!(name.ends_with(".xlsx"));
        assert_eq!(upload.original_name(), "../evil name?.xlsx");
    }

    // ------------------------------------------------------------------
    // Dry run
    // ------------------------------------------------------------------

    #[test]
    fn test_preview_reports_counts_without_storage() {
        let mut workbook =
            Workbook::from_bytes("JXG_August.xlsx", limited_book()).unwrap();
        let summary = preview_workbook(Entity::JanashakthiLimited, &mut workbook).unwrap();

        assert_eq!(summary.kpi_count, 3);
        assert_eq!(summary.chart_count, 2);
        assert!(summary.missing_sheets.contains(&"Overheads vs Budget"));

        let maturity = summary
            .items
            .iter()
            .find(|i| i.data_key == "maturityProfile")
            .unwrap();
        assert!(!maturity.storable);
        assert_eq!(maturity.rows, 0);
    }
}
