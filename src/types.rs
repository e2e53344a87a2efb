use crate::coords::{FractionalBBox, PageDimensions, VisionBBox};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Baptism,
    Marriage,
    Funeral,
    #[serde(other)]
    Unknown,
}

impl Default for RecordType {
    fn default() -> Self {
        RecordType::Unknown
    }
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Baptism => "baptism",
            RecordType::Marriage => "marriage",
            RecordType::Funeral => "funeral",
            RecordType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> RecordType {
        match s.trim().to_ascii_lowercase().as_str() {
            "baptism" => RecordType::Baptism,
            "marriage" => RecordType::Marriage,
            "funeral" => RecordType::Funeral,
            _ => RecordType::Unknown,
        }
    }
}

/// Cell boxes travel as `[x_min, y_min, x_max, y_max]` arrays on the wire.
mod array_bbox {
    use super::*;

    pub fn serialize<S: Serializer>(bbox: &Option<FractionalBBox>, s: S) -> Result<S::Ok, S::Error> {
        bbox.map(|b| b.to_array()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<FractionalBBox>, D::Error> {
        let raw: Option<Vec<f64>> = Option::deserialize(d)?;
        Ok(raw.and_then(|v| {
            if v.len() == 4 && v.iter().all(|c| c.is_finite()) {
                Some(FractionalBBox::new(v[0], v[1], v[2], v[3]))
            } else {
                None
            }
        }))
    }
}

/// Field maps from the extractor may carry numbers or nulls; keep strings,
/// stringify scalars, drop the rest.
pub(crate) mod lenient_fields {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::collections::BTreeMap;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
        let raw: Option<BTreeMap<String, Value>> = Option::deserialize(d)?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                Value::Number(n) => Some((k, n.to_string())),
                Value::Bool(b) => Some((k, b.to_string())),
                _ => None,
            })
            .collect())
    }
}

/// One OCR table cell. Read-only to the review core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub column_key: Option<String>,
    #[serde(default)]
    pub column_index: usize,
    #[serde(default, with = "array_bbox")]
    pub bbox: Option<FractionalBBox>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl TableCell {
    /// Column key, falling back to `col_<n>` (1-based) when OCR left it blank.
    pub fn column_key(&self) -> String {
        match &self.column_key {
            Some(k) if !k.trim().is_empty() => k.clone(),
            _ => format!("col_{}", self.column_index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub row_index: i64,
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

/// Table-structured OCR output for one page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableExtraction {
    #[serde(default)]
    pub page_dimensions: Option<PageDimensions>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub column_bands: BTreeMap<String, [f64; 2]>,
    /// Backend-specific keys, passed back untouched on `rejectRow`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TableExtraction {
    /// Page size when the backend reported a usable one.
    pub fn page(&self) -> Option<PageDimensions> {
        self.page_dimensions.filter(|p| p.is_valid())
    }

    pub fn rows(&self) -> impl Iterator<Item = &TableRow> {
        self.tables.iter().flat_map(|t| t.rows.iter())
    }

    /// Cells of every listed source row, in table order.
    pub fn cells_for_rows(&self, row_indices: &[i64]) -> Vec<TableCell> {
        self.rows()
            .filter(|r| row_indices.contains(&r.row_index))
            .flat_map(|r| r.cells.iter().cloned())
            .map(|mut c| {
                c.column_key = Some(c.column_key());
                c
            })
            .collect()
    }

    /// Union of the row's cell boxes, or `None` when no cell carries one.
    pub fn row_bbox(&self, row_index: i64) -> Option<FractionalBBox> {
        self.rows()
            .filter(|r| r.row_index == row_index)
            .flat_map(|r| r.cells.iter())
            .filter_map(|c| c.bbox)
            .map(|b| b.normalized())
            .reduce(|acc, b| acc.union(&b))
    }

    /// Widest row, in cells.
    pub fn column_count(&self) -> usize {
        self.rows().map(|r| r.cells.len()).max().unwrap_or(0)
    }
}

/// Placeholder box for a record whose row has no cell geometry.
pub fn fallback_row_bbox(position: usize) -> FractionalBBox {
    let offset = 0.04 * position as f64;
    FractionalBBox::new(0.05, 0.10 + offset, 0.95, 0.14 + offset).normalized()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCandidate {
    #[serde(default)]
    pub record_type: RecordType,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient_fields::deserialize")]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub source_row_index: i64,
    #[serde(default)]
    pub needs_review: bool,
}

/// Candidate records for a page plus the column mapping that produced them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSet {
    #[serde(default)]
    pub candidates: Vec<RecordCandidate>,
    #[serde(default)]
    pub detected_type: Option<RecordType>,
    #[serde(default)]
    pub type_confidence: Option<f64>,
    /// Column key to field key.
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub unmapped_columns: Vec<String>,
    #[serde(default)]
    pub parsed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Rejected,
    AutoConfirmed,
}

impl RecordStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RecordStatus::Confirmed | RecordStatus::AutoConfirmed)
    }
}

/// A candidate under review.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewableRecord {
    pub index: usize,
    pub candidate: RecordCandidate,
    pub vision_bbox: VisionBBox,
    pub fractional_bbox: FractionalBBox,
    pub status: RecordStatus,
    pub was_adjusted: bool,
    /// Set once the operator confirmed or rejected the record in guided review.
    pub locked: bool,
}
