use crate::coords::Orientation;
use crate::types::RecordType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row/column geometry learned from operator-confirmed record boxes.
/// All lengths are page fractions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedLayoutParams {
    pub avg_row_height: f64,
    pub avg_row_spacing: f64,
    /// Rows starting above this are header, never candidates.
    pub header_y_threshold: f64,
    pub merge_threshold: f64,
    /// Column key to `[start, end]`.
    #[serde(default)]
    pub column_bands: BTreeMap<String, [f64; 2]>,
    pub confidence: f64,
}

/// Pages sharing a key share a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateKey {
    pub record_type: RecordType,
    pub column_count: usize,
    pub orientation: Orientation,
}

impl TemplateKey {
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.record_type.as_str(),
            self.column_count,
            self.orientation.as_str()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutTemplate {
    pub id: i64,
    pub name: String,
    pub key: TemplateKey,
    pub params: LearnedLayoutParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub saved_at: String,
}
