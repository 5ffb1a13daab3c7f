//! Typed chart payloads.
//!
//! Every dataset a strategy can produce is one of a closed set of variants.
//! The variant tag is stored alongside the serialized payload and selects
//! the decoder on the way back out, so a stored row can always be read back
//! into the same shape that was saved.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};

pub const TAG_LINE: &str = "line";
pub const TAG_PIE: &str = "pie";
pub const TAG_MATRIX: &str = "matrix";
pub const TAG_COMPOSITE: &str = "composite";

/// Month-by-month actual/budget series. Category sheets (overheads) reuse
/// the shape with the category label in `month`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePoint {
    pub month: String,
    pub actual: f64,
    pub budget: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieSlice {
    pub name: String,
    pub value: f64,
    pub color: String,
}

/// Header labels plus one row per series, values aligned positionally with
/// the labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiMetricMatrix {
    pub labels: Vec<String>,
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub label: String,
    pub values: Vec<f64>,
}

/// Fixed three-bucket market turnover payload. Values are percent strings
/// exactly as displayed. Legacy stored rows predate `labels`, hence the
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeBuckets {
    pub jun: BucketMetrics,
    pub jul: BucketMetrics,
    pub aug: BucketMetrics,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketMetrics {
    #[serde(default = "zero_percent")]
    pub volume: String,
    #[serde(default = "zero_percent")]
    pub commission: String,
}

fn zero_percent() -> String {
    "0%".to_string()
}

impl Default for BucketMetrics {
    fn default() -> Self {
        BucketMetrics {
            volume: zero_percent(),
            commission: zero_percent(),
        }
    }
}

impl Default for CompositeBuckets {
    fn default() -> Self {
        CompositeBuckets {
            jun: BucketMetrics::default(),
            jul: BucketMetrics::default(),
            aug: BucketMetrics::default(),
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Jun,
    Jul,
    Aug,
}

impl CompositeBuckets {
    pub fn bucket_mut(&mut self, bucket: Bucket) -> &mut BucketMetrics {
        match bucket {
            Bucket::Jun => &mut self.jun,
            Bucket::Jul => &mut self.jul,
            Bucket::Aug => &mut self.aug,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartValue {
    Line(Vec<LinePoint>),
    Pie(Vec<PieSlice>),
    Matrix(MultiMetricMatrix),
    Composite(CompositeBuckets),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown chart type tag: {0}")]
    UnknownTag(String),
    #[error("payload does not match its tag: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChartValue {
    /// Variant tag stored next to the payload.
    pub fn tag(&self) -> &'static str {
        match self {
            ChartValue::Line(_) => TAG_LINE,
            ChartValue::Pie(_) => TAG_PIE,
            ChartValue::Matrix(_) => TAG_MATRIX,
            ChartValue::Composite(_) => TAG_COMPOSITE,
        }
    }

    /// A payload with nothing to show. The composite shape is fixed and
    /// never counts as empty once produced.
    pub fn is_empty(&self) -> bool {
        match self {
            ChartValue::Line(points) => points.is_empty(),
            ChartValue::Pie(slices) => slices.is_empty(),
            ChartValue::Matrix(matrix) => matrix.rows.is_empty(),
            ChartValue::Composite(_) => false,
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        match self {
            ChartValue::Line(points) => serde_json::to_string(points),
            ChartValue::Pie(slices) => serde_json::to_string(slices),
            ChartValue::Matrix(matrix) => serde_json::to_string(matrix),
            ChartValue::Composite(buckets) => serde_json::to_string(buckets),
        }
    }

    pub fn to_value(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        match self {
            ChartValue::Line(points) => serde_json::to_value(points),
            ChartValue::Pie(slices) => serde_json::to_value(slices),
            ChartValue::Matrix(matrix) => serde_json::to_value(matrix),
            ChartValue::Composite(buckets) => serde_json::to_value(buckets),
        }
    }

    /// Serialize for persistence, refusing anything that would store an
    /// empty dataset ("null", "[]" and "{}" are never written).
    pub fn validated_json(&self, data_key: &str) -> Result<String> {
        let reject = || Error::InvalidChartValue {
            data_key: data_key.to_string(),
        };
        if self.is_empty() {
            return Err(reject());
        }
        let json = self.to_json().map_err(|_| reject())?;
        if json.is_empty() || json == "null" || json == "[]" || json == "{}" {
            return Err(reject());
        }
        Ok(json)
    }

    /// Decode a stored payload through its variant tag.
    pub fn decode(tag: &str, json: &str) -> std::result::Result<ChartValue, DecodeError> {
        match tag {
            TAG_LINE => Ok(ChartValue::Line(serde_json::from_str(json)?)),
            TAG_PIE => Ok(ChartValue::Pie(serde_json::from_str(json)?)),
            TAG_MATRIX => Ok(ChartValue::Matrix(serde_json::from_str(json)?)),
            TAG_COMPOSITE => Ok(ChartValue::Composite(serde_json::from_str(json)?)),
            other => Err(DecodeError::UnknownTag(other.to_string())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
