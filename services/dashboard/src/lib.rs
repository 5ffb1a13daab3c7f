//! Ingestion core for the group financial dashboard.
//!
//! Four entities each upload one workbook per reporting period. This crate
//! owns everything between the upload and the database:
//! - filename ownership gate (is this file really that entity's?)
//! - workbook reading (xlsx/xls, CSV fallback)
//! - per-entity sheet extraction into KPI rows and typed chart datasets
//! - a storage gateway speaking both SQLite and Postgres
//! - reconciliation of duplicate and legacy-keyed rows
//!
//! The HTTP surface that feeds it lives elsewhere and talks to this crate
//! through [`ingest`] and [`storage`].

pub mod charts;
pub mod entity;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod reconcile;
pub mod storage;
pub mod workbook;

pub use entity::{validate_filename, Entity, ValidationReport};
pub use error::{Error, Result};
pub use ingest::{
    check_filename, ingest_file, ingest_upload, ingest_workbook, preview_workbook, IngestSummary,
    PreviewSummary, SpooledUpload,
};
pub use workbook::Workbook;
