//! Sheet extraction strategies and the per-entity registry.
//!
//! Each entity's workbook template is described by a fixed table of sheet
//! rules. A rule names the sheet (plus lookup aliases), the dataset key the
//! result is stored under, and which of the five strategy shapes parses it:
//!
//! - KPI table: name/actual/budget/unit rows
//! - line: month (or category) with actual/budget
//! - pie: category/value with a fixed color palette
//! - matrix: dynamic header labels, one numeric series per row
//! - composite: bucketed market turnover percentages
//!
//! Sheets not named by any rule are ignored.

use crate::charts::{
    Bucket, BucketMetrics, ChartValue, CompositeBuckets, LinePoint, MatrixRow, MultiMetricMatrix,
    PieSlice,
};
use crate::entity::Entity;
use crate::workbook::{cell_at, Cell, Grid};

/// Slice colors, assigned by data-row position and wrapping around when a
/// sheet carries more rows than the palette.
pub const PIE_PALETTE: [&str; 5] = ["#8B5CF6", "#06B6D4", "#10B981", "#F59E0B", "#EF4444"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    KpiTable,
    Line,
    Pie,
    Matrix,
    Composite,
}

/// One sheet the registry knows how to extract.
#[derive(Debug, Clone, Copy)]
pub struct SheetRule {
    pub sheet: &'static str,
    /// Lowercase substrings tried against sheet names when the exact name
    /// is absent.
    pub aliases: &'static [&'static str],
    pub data_key: &'static str,
    pub kind: StrategyKind,
}

pub const KPI_DATA_KEY: &str = "kpis";

const KPI_RULE: SheetRule = SheetRule {
    sheet: "KPIs",
    aliases: &[],
    data_key: KPI_DATA_KEY,
    kind: StrategyKind::KpiTable,
};

const JANASHAKTHI_LIMITED_RULES: &[SheetRule] = &[
    KPI_RULE,
    SheetRule { sheet: "Share Composition", aliases: &[], data_key: "shareComposition", kind: StrategyKind::Pie },
    SheetRule { sheet: "Overheads vs Budget", aliases: &[], data_key: "overheads", kind: StrategyKind::Line },
    SheetRule { sheet: "WACD Movement", aliases: &["wacd", "awplr"], data_key: "wacdMovement", kind: StrategyKind::Line },
    SheetRule { sheet: "Maturity Profile", aliases: &[], data_key: "maturityProfile", kind: StrategyKind::Pie },
];

const JANASHAKTHI_INSURANCE_RULES: &[SheetRule] = &[
    KPI_RULE,
    SheetRule { sheet: "Retail Business FYP", aliases: &[], data_key: "retailBusinessFYP", kind: StrategyKind::Line },
    SheetRule { sheet: "JSV FYP", aliases: &[], data_key: "jsvFYP", kind: StrategyKind::Line },
    SheetRule { sheet: "DTA FYP", aliases: &[], data_key: "dtaFYP", kind: StrategyKind::Line },
    SheetRule { sheet: "Renewal Premium", aliases: &[], data_key: "renewalPremium", kind: StrategyKind::Line },
    SheetRule { sheet: "UL CR vs UL FY", aliases: &[], data_key: "ulCreditRating", kind: StrategyKind::Line },
    SheetRule { sheet: "Surplus Actual vs Budget", aliases: &[], data_key: "surplusActual", kind: StrategyKind::Line },
];

const FIRST_CAPITAL_RULES: &[SheetRule] = &[
    KPI_RULE,
    SheetRule { sheet: "Net Income vs Budget", aliases: &[], data_key: "netIncomeAgainstBudget", kind: StrategyKind::Line },
    SheetRule { sheet: "Trading Composition", aliases: &[], data_key: "tradingComposition", kind: StrategyKind::Pie },
    SheetRule { sheet: "Overheads vs Budget", aliases: &[], data_key: "overheadsAgainstBudget", kind: StrategyKind::Line },
    SheetRule { sheet: "Unit Trust AUM", aliases: &[], data_key: "unitTrustAUM", kind: StrategyKind::Line },
    SheetRule { sheet: "WM AUM", aliases: &[], data_key: "wmAUM", kind: StrategyKind::Line },
    SheetRule { sheet: "Portfolio Management", aliases: &[], data_key: "portfolioManagement", kind: StrategyKind::Line },
    SheetRule { sheet: "Treasuries Data", aliases: &[], data_key: "treasuriesData", kind: StrategyKind::Matrix },
    SheetRule { sheet: "Dealing Securities", aliases: &[], data_key: "dealingSecurities", kind: StrategyKind::Matrix },
    SheetRule { sheet: "FCE Market Turnover", aliases: &["turnover"], data_key: "fceMarketTurnover", kind: StrategyKind::Composite },
];

const JANASHAKTHI_FINANCE_RULES: &[SheetRule] = &[
    KPI_RULE,
    SheetRule { sheet: "Net Interest Income vs Budget", aliases: &[], data_key: "netInterestIncomeAgainstBudget", kind: StrategyKind::Line },
    SheetRule { sheet: "Loan Composition", aliases: &[], data_key: "loanComposition", kind: StrategyKind::Pie },
    SheetRule { sheet: "Overheads vs Budget", aliases: &[], data_key: "overheadsAgainstBudget", kind: StrategyKind::Line },
    SheetRule { sheet: "Business Activity", aliases: &[], data_key: "businessActivity", kind: StrategyKind::Matrix },
];

pub fn rules_for(entity: Entity) -> &'static [SheetRule] {
    match entity {
        Entity::JanashakthiLimited => JANASHAKTHI_LIMITED_RULES,
        Entity::JanashakthiInsurance => JANASHAKTHI_INSURANCE_RULES,
        Entity::FirstCapital => FIRST_CAPITAL_RULES,
        Entity::JanashakthiFinance => JANASHAKTHI_FINANCE_RULES,
    }
}

/// Variant tag a strategy stores its datasets under. The KPI table is not a
/// chart and has none.
pub fn chart_tag(kind: StrategyKind) -> Option<&'static str> {
    match kind {
        StrategyKind::KpiTable => None,
        StrategyKind::Line => Some(crate::charts::TAG_LINE),
        StrategyKind::Pie => Some(crate::charts::TAG_PIE),
        StrategyKind::Matrix => Some(crate::charts::TAG_MATRIX),
        StrategyKind::Composite => Some(crate::charts::TAG_COMPOSITE),
    }
}

/// Locate the sheet a rule applies to: exact name first, then a
/// case-insensitive substring scan with the rule's aliases. Returns the
/// actual sheet name so the caller can read it.
pub fn find_sheet(rule: &SheetRule, sheet_names: &[String]) -> Option<String> {
    if sheet_names.iter().any(|name| name == rule.sheet) {
        return Some(rule.sheet.to_string());
    }
    for alias in rule.aliases {
        if let Some(name) = sheet_names
            .iter()
            .find(|name| name.to_lowercase().contains(alias))
        {
            return Some(name.clone());
        }
    }
    None
}

/// One parsed KPI row. `actual`/`budget` stay None when the cell is blank
/// or unparsable; a parsed zero stays zero.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiRow {
    pub name: String,
    pub actual: Option<f64>,
    pub budget: Option<f64>,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Kpis(Vec<KpiRow>),
    Chart(ChartValue),
}

pub fn run_strategy(kind: StrategyKind, grid: &Grid) -> Extraction {
    match kind {
        StrategyKind::KpiTable => Extraction::Kpis(extract_kpi_table(grid)),
        StrategyKind::Line => Extraction::Chart(ChartValue::Line(extract_line(grid))),
        StrategyKind::Pie => Extraction::Chart(ChartValue::Pie(extract_pie(grid))),
        StrategyKind::Matrix => Extraction::Chart(ChartValue::Matrix(extract_matrix(grid))),
        StrategyKind::Composite => {
            Extraction::Chart(ChartValue::Composite(extract_composite(grid)))
        }
    }
}

/// A data row must carry a name and at least one of the two value columns.
fn row_has_values(row: &[Cell]) -> bool {
    cell_at(row, 0).is_truthy()
        && (!cell_at(row, 1).is_empty() || !cell_at(row, 2).is_empty())
}

fn extract_kpi_table(grid: &Grid) -> Vec<KpiRow> {
    grid.iter()
        .skip(1)
        .filter(|row| row_has_values(row))
        .map(|row| KpiRow {
            name: cell_at(row, 0).text().trim().to_string(),
            actual: cell_at(row, 1).number(),
            budget: cell_at(row, 2).number(),
            unit: cell_at(row, 3).text().trim().to_string(),
        })
        .collect()
}

fn extract_line(grid: &Grid) -> Vec<LinePoint> {
    grid.iter()
        .skip(1)
        .filter(|row| row_has_values(row))
        .map(|row| LinePoint {
            month: cell_at(row, 0).text().trim().to_string(),
            actual: cell_at(row, 1).number().unwrap_or(0.0),
            budget: cell_at(row, 2).number().unwrap_or(0.0),
        })
        .collect()
}

fn extract_pie(grid: &Grid) -> Vec<PieSlice> {
    grid.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, row)| cell_at(row, 0).is_truthy() && cell_at(row, 1).is_truthy())
        .map(|(i, row)| PieSlice {
            name: cell_at(row, 0).text().trim().to_string(),
            value: cell_at(row, 1).number().unwrap_or(0.0),
            // Color follows the sheet position, so a skipped row still
            // consumes its palette slot.
            color: PIE_PALETTE[(i - 1) % PIE_PALETTE.len()].to_string(),
        })
        .collect()
}

fn extract_matrix(grid: &Grid) -> MultiMetricMatrix {
    let header = match grid.first() {
        Some(row) => row,
        None => return MultiMetricMatrix { labels: Vec::new(), rows: Vec::new() },
    };

    // Labeled columns keep their header text verbatim; values align with
    // them positionally.
    let columns: Vec<(usize, String)> = header
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, cell)| cell.is_truthy())
        .map(|(i, cell)| (i, cell.text()))
        .collect();

    let rows = grid
        .iter()
        .skip(1)
        .filter(|row| cell_at(row, 0).is_truthy())
        .map(|row| MatrixRow {
            label: cell_at(row, 0).text().trim().to_string(),
            values: columns
                .iter()
                .map(|(i, _)| cell_at(row, *i).number().unwrap_or(0.0))
                .collect(),
        })
        .collect();

    MultiMetricMatrix {
        labels: columns.into_iter().map(|(_, label)| label).collect(),
        rows,
    }
}

fn bucket_for_label(label: &str) -> Option<Bucket> {
    let lowered = label.to_lowercase();
    if lowered.contains("jun") {
        Some(Bucket::Jun)
    } else if lowered.contains("jul") {
        Some(Bucket::Jul)
    } else if lowered.contains("aug") || lowered.contains("sep") || lowered.contains("oct") {
        // Historical templates fold the third column into one bucket.
        Some(Bucket::Aug)
    } else {
        None
    }
}

fn extract_composite(grid: &Grid) -> CompositeBuckets {
    let mut buckets = CompositeBuckets::default();
    let header = match grid.first() {
        Some(row) => row,
        None => return buckets,
    };

    let columns: Vec<(usize, Bucket)> = header
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, cell)| bucket_for_label(&cell.text()).map(|b| (i, b)))
        .collect();
    buckets.labels = header
        .iter()
        .skip(1)
        .filter(|cell| cell.is_truthy())
        .map(|cell| cell.text())
        .collect();

    for row in grid.iter().skip(1) {
        let metric = cell_at(row, 0).text().to_lowercase();
        for (i, bucket) in &columns {
            let cell = cell_at(row, *i);
            let value = if cell.is_truthy() {
                format!("{}%", cell.text().trim())
            } else {
                "0%".to_string()
            };
            let slot: &mut BucketMetrics = buckets.bucket_mut(*bucket);
            if metric.contains("volume") {
                slot.volume = value;
            } else if metric.contains("commission") {
                slot.commission = value;
            }
        }
    }
    buckets
}

// ============================================================================
// Tests
// ============================================================================
