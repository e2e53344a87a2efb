use crate::coords::FractionalBBox;
use crate::entities::{EntityDetector, EntityKind};
use crate::fields::{expected_kind, position_hint, single_name_fields};
use crate::types::{RecordType, TableCell};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

pub const MAX_SUGGESTIONS: usize = 8;

const BASE_SCORE: f64 = 0.1;
const TYPE_MATCH_BONUS: f64 = 0.5;
const MAPPED_COLUMN_BONUS: f64 = 0.3;
const UNMAPPED_COLUMN_BONUS: f64 = 0.1;
const LEADING_BONUS: f64 = 0.05;
const POSITION_BONUS: f64 = 0.15;
const FREE_TEXT_SCORE: f64 = 0.3;
const UNMATCHED_CELL_SCORE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSuggestion {
    pub text: String,
    pub entity_type: EntityKind,
    pub score: f64,
    pub bbox: Option<FractionalBBox>,
    pub column_key: String,
    pub column_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResult {
    pub suggestions: Vec<CellSuggestion>,
    /// More distinct names than the record type has name fields: the row
    /// probably merged two physical records.
    pub split_warning: bool,
    pub name_count: usize,
    pub expected_name_fields: usize,
    pub field_key: String,
}

pub struct SuggestionScorer<'a> {
    detector: &'a EntityDetector,
}

impl Default for SuggestionScorer<'static> {
    fn default() -> Self {
        Self {
            detector: EntityDetector::shared(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl<'a> SuggestionScorer<'a> {
    pub fn with_detector(detector: &'a EntityDetector) -> Self {
        Self { detector }
    }

    pub fn compute(
        &self,
        field_key: &str,
        record_type: RecordType,
        cells: &[TableCell],
        column_mapping: &BTreeMap<String, String>,
        used_values: &[String],
    ) -> SuggestionResult {
        let expected = expected_kind(field_key);
        let hint = position_hint(field_key);
        let mut suggestions = Vec::new();

        for cell in cells {
            let content = cell.content.trim();
            if content.is_empty() {
                continue;
            }
            let column_key = cell.column_key();
            let suggestion = |text: String, entity_type: EntityKind, score: f64| CellSuggestion {
                text,
                entity_type,
                score,
                bbox: cell.bbox,
                column_key: column_key.clone(),
                column_index: cell.column_index,
            };

            if expected == EntityKind::Text {
                suggestions.push(suggestion(content.to_string(), EntityKind::Text, FREE_TEXT_SCORE));
                continue;
            }

            let entities = self.detector.detect(content);
            if entities.is_empty() {
                // A lone character is ruling or OCR noise.
                if content.chars().count() > 1 {
                    suggestions.push(suggestion(content.to_string(), EntityKind::Text, UNMATCHED_CELL_SCORE));
                }
                continue;
            }

            let column_bonus = match column_mapping.get(&column_key) {
                Some(mapped) if mapped == field_key => MAPPED_COLUMN_BONUS,
                Some(mapped) if !mapped.is_empty() => 0.0,
                _ => UNMAPPED_COLUMN_BONUS,
            };
            let position_bonus = match (hint, cell.bbox) {
                (Some(h), Some(b)) if h.matches(b.center_x()) => POSITION_BONUS,
                _ => 0.0,
            };

            for entity in entities {
                let mut score = BASE_SCORE + column_bonus + position_bonus;
                if entity.kind == expected {
                    score += TYPE_MATCH_BONUS;
                }
                if entity.start_index == 0 {
                    score += LEADING_BONUS;
                }
                suggestions.push(suggestion(entity.text, entity.kind, round2(score.min(1.0))));
            }
        }

        // Stable: equal keys keep cell iteration order.
        suggestions.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| (b.entity_type == expected).cmp(&(a.entity_type == expected)))
                .then_with(|| a.column_index.cmp(&b.column_index))
        });

        let used: HashSet<String> = used_values
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        let mut seen = HashSet::new();
        let filtered: Vec<CellSuggestion> = suggestions
            .into_iter()
            .filter(|s| seen.insert(s.text.to_lowercase()))
            .filter(|s| !used.contains(&s.text.trim().to_lowercase()))
            .collect();

        let expected_name_fields = single_name_fields(record_type).len();
        let name_count = filtered
            .iter()
            .filter(|s| s.entity_type == EntityKind::Name)
            .count();
        let split_warning = expected_name_fields > 0 && name_count > expected_name_fields;
        if split_warning {
            tracing::debug!(field_key, name_count, expected_name_fields, "row may hold merged records");
        }

        let mut suggestions = filtered;
        suggestions.truncate(MAX_SUGGESTIONS);
        SuggestionResult {
            suggestions,
            split_warning,
            name_count,
            expected_name_fields,
            field_key: field_key.to_string(),
        }
    }
}

/// Rank suggestions for `field_key` using the shared detector.
pub fn compute_field_suggestions(
    field_key: &str,
    record_type: RecordType,
    cells: &[TableCell],
    column_mapping: &BTreeMap<String, String>,
    used_values: &[String],
) -> SuggestionResult {
    SuggestionScorer::default().compute(field_key, record_type, cells, column_mapping, used_values)
}
