//! Workbook access: open uploaded bytes as a spreadsheet and expose each
//! sheet as a row-major grid of normalized cells.
//!
//! Excel files (xlsx/xls, auto-detected by signature) are read with calamine.
//! CSV uploads are admitted as a degenerate workbook with a single sheet
//! named `KPIs`, since a bare CSV can only carry the KPI table.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader, Sheets};

use crate::error::{Error, Result};

/// xlsx and friends are zip archives; legacy xls is an OLE compound file.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// One spreadsheet cell, normalized to the three shapes the extraction
/// strategies care about. Booleans render as text, date cells as ISO dates,
/// error cells as empty.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

pub type Grid = Vec<Vec<Cell>>;

impl Cell {
    fn from_data(data: &Data) -> Cell {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(naive) => Cell::Text(naive.format("%Y-%m-%d").to_string()),
                None => Cell::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) => Cell::Text(s.clone()),
            Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) => Cell::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Truthiness in the sense the row predicates use it: non-blank text or
    /// a number other than zero.
    pub fn is_truthy(&self) -> bool {
        match self {
            Cell::Empty => false,
            Cell::Text(s) => !s.trim().is_empty(),
            Cell::Number(n) => *n != 0.0,
        }
    }

    /// Render the cell as display text. Whole numbers drop the trailing
    /// `.0` so numeric labels read naturally.
    pub fn text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }

    /// Parse the cell as a float. Text is trimmed and thousands separators
    /// are stripped first. Blank or unparsable cells yield None.
    pub fn number(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        }
    }
}

/// Grid accessor that treats everything past the end of a row as empty.
pub fn cell_at(row: &[Cell], index: usize) -> &Cell {
    static EMPTY: Cell = Cell::Empty;
    row.get(index).unwrap_or(&EMPTY)
}

/// An opened upload. Excel workbooks keep the calamine reader alive and pull
/// each sheet's range on demand; CSV degenerates to one pre-parsed grid.
pub enum Workbook {
    Excel(Sheets<Cursor<Vec<u8>>>),
    Csv(Grid),
}

pub const CSV_SHEET_NAME: &str = "KPIs";

impl Workbook {
    /// Open uploaded bytes. `filename` only steers the CSV decision; the
    /// spreadsheet format itself is detected from content.
    pub fn from_bytes(filename: &str, bytes: Vec<u8>) -> Result<Workbook> {
        let lowered = filename.to_lowercase();
        if lowered.ends_with(".csv") {
            return Ok(Workbook::Csv(parse_csv(&bytes)?));
        }
        if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
            let sheets = open_workbook_auto_from_rs(Cursor::new(bytes))
                .map_err(|e| Error::malformed(format!("{filename}: {e}")))?;
            return Ok(Workbook::Excel(sheets));
        }
        // No spreadsheet signature: last chance as CSV.
        parse_csv(&bytes).map(Workbook::Csv)
    }

    pub fn from_path(path: &Path) -> Result<Workbook> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = fs::read(path)
            .map_err(|e| Error::malformed(format!("{}: {e}", path.display())))?;
        Workbook::from_bytes(&filename, bytes)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        match self {
            Workbook::Excel(sheets) => sheets.sheet_names().to_vec(),
            Workbook::Csv(_) => vec![CSV_SHEET_NAME.to_string()],
        }
    }

    /// Read one sheet into a grid anchored at A1. Missing or unreadable
    /// sheets are errors; callers decide whether that aborts the attempt.
    pub fn read_sheet(&mut self, name: &str) -> Result<Grid> {
        match self {
            Workbook::Excel(sheets) => {
                let range = sheets
                    .worksheet_range(name)
                    .map_err(|e| Error::malformed(format!("sheet {name}: {e}")))?;
                Ok(grid_from_range(&range))
            }
            Workbook::Csv(rows) => {
                if name == CSV_SHEET_NAME {
                    Ok(rows.clone())
                } else {
                    Err(Error::malformed(format!("sheet {name}: not present in CSV upload")))
                }
            }
        }
    }
}

/// Realize a calamine range as a grid, padding back to the sheet origin so
/// column indices line up with the template layout.
fn grid_from_range(range: &Range<Data>) -> Grid {
    let (start_row, start_col) = match range.start() {
        Some((r, c)) => (r as usize, c as usize),
        None => return Vec::new(),
    };
    let mut grid: Grid = Vec::with_capacity(start_row + range.height());
    grid.resize(start_row, Vec::new());
    for row in range.rows() {
        let mut cells = Vec::with_capacity(start_col + row.len());
        cells.resize(start_col, Cell::Empty);
        cells.extend(row.iter().map(Cell::from_data));
        grid.push(cells);
    }
    grid
}

/// Decode and parse CSV bytes. UTF-8 (with or without BOM) is tried first;
/// Windows-1252 is the fallback for legacy exports.
fn parse_csv(bytes: &[u8]) -> Result<Grid> {
    let (decoded, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    let text = if had_errors {
        encoding_rs::WINDOWS_1252.decode(bytes).0
    } else {
        decoded
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut grid = Grid::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::malformed(format!("csv: {e}")))?;
        let cells = record
            .iter()
            .map(|field| {
                if field.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(field.to_string())
                }
            })
            .collect();
        grid.push(cells);
    }
    Ok(grid)
}

// ============================================================================
// Tests
// ============================================================================
