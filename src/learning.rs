use crate::coords::FractionalBBox;
use crate::models::LearnedLayoutParams;
use crate::types::TableCell;
use std::collections::BTreeMap;

pub const DEFAULT_LEARNING_THRESHOLD: usize = 3;

/// Rows closer than this many row heights are merged by the extractor.
const MERGE_FACTOR: f64 = 1.2;

/// Slack when checking a cell centre against its band.
const BAND_TOLERANCE: f64 = 0.01;

/// One confirmed record: its final box and the cells of its source row.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedBoundary {
    pub bbox: FractionalBBox,
    pub cells: Vec<TableCell>,
}

/// Derive layout parameters. `None` when nothing is confirmed.
pub fn derive_layout(
    confirmed: &[ConfirmedBoundary],
    prior_bands: &BTreeMap<String, [f64; 2]>,
    learning_threshold: usize,
) -> Option<LearnedLayoutParams> {
    if confirmed.is_empty() {
        return None;
    }
    let n = confirmed.len() as f64;
    let avg_row_height = confirmed.iter().map(|c| c.bbox.height()).sum::<f64>() / n;

    let mut boxes: Vec<FractionalBBox> = confirmed.iter().map(|c| c.bbox).collect();
    boxes.sort_by(|a, b| a.y_min.total_cmp(&b.y_min));
    let avg_row_spacing = if boxes.len() > 1 {
        let gaps: Vec<f64> = boxes
            .windows(2)
            .map(|w| w[1].center_y() - w[0].center_y())
            .collect();
        gaps.iter().sum::<f64>() / gaps.len() as f64
    } else {
        avg_row_height
    };
    let header_y_threshold = (boxes[0].y_min - avg_row_spacing).clamp(0.0, 1.0);

    let column_bands = if bands_consistent(confirmed, prior_bands) {
        prior_bands.clone()
    } else {
        let recomputed = bands_from_cells(confirmed);
        if recomputed.is_empty() {
            prior_bands.clone()
        } else {
            tracing::debug!(columns = recomputed.len(), "column bands recomputed from confirmed rows");
            recomputed
        }
    };

    let threshold = learning_threshold.max(1) as f64;
    Some(LearnedLayoutParams {
        avg_row_height,
        avg_row_spacing,
        header_y_threshold,
        merge_threshold: MERGE_FACTOR * avg_row_height,
        column_bands,
        confidence: (n / (2.0 * threshold)).min(1.0),
    })
}

/// Every positioned cell's centre sits inside its column's band.
fn bands_consistent(confirmed: &[ConfirmedBoundary], bands: &BTreeMap<String, [f64; 2]>) -> bool {
    confirmed
        .iter()
        .flat_map(|c| c.cells.iter())
        .filter_map(|cell| cell.bbox.map(|b| (cell.column_key(), b.center_x())))
        .all(|(key, x)| match bands.get(&key) {
            Some([start, end]) => x >= start - BAND_TOLERANCE && x <= end + BAND_TOLERANCE,
            None => false,
        })
}

fn bands_from_cells(confirmed: &[ConfirmedBoundary]) -> BTreeMap<String, [f64; 2]> {
    let mut bands: BTreeMap<String, [f64; 2]> = BTreeMap::new();
    for cell in confirmed.iter().flat_map(|c| c.cells.iter()) {
        let Some(b) = cell.bbox.map(|b| b.normalized()) else {
            continue;
        };
        bands
            .entry(cell.column_key())
            .and_modify(|band| {
                band[0] = band[0].min(b.x_min);
                band[1] = band[1].max(b.x_max);
            })
            .or_insert([b.x_min, b.x_max]);
    }
    bands
}
