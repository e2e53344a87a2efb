//! The review-pass state machine.
//!
//! `ReviewSession::reduce` is the only way state changes. Operator actions and
//! remote completions both arrive as [`Event`]s; remote calls leave as
//! [`Effect`]s tagged with a request id so a late or superseded completion
//! can be recognised and dropped.

use super::claims::ClaimMap;
use crate::backend::{
    AutoExtractResponse, ConfirmedRecordPayload, FinalizeRequest, FinalizeResponse, LearnRequest, LearnResponse,
    ReextractRequest, ReextractResponse, RejectRowRequest, RejectRowResponse,
};
use crate::coords::{fractional_to_vision, vision_to_fractional, PageDimensions, VisionBBox};
use crate::error::ReviewResult;
use crate::learning::{derive_layout, ConfirmedBoundary, DEFAULT_LEARNING_THRESHOLD};
use crate::models::{LearnedLayoutParams, TemplateKey};
use crate::suggestions::{compute_field_suggestions, SuggestionResult};
use crate::types::{
    fallback_row_bbox, CandidateSet, RecordCandidate, RecordStatus, RecordType, ReviewableRecord, TableCell,
    TableExtraction,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    AutoDetect,
    GuidedReview,
    Learning,
    BulkConfirm,
    Closed,
}

#[derive(Debug)]
pub enum Event {
    StartReview,
    /// Confirm the current record.
    Confirm,
    /// Reject the current record.
    Reject,
    StartAdjust,
    BboxChangeEnd { index: usize, bbox: VisionBBox },
    Toggle(usize),
    Finalize { save_as_template: bool, template_name: Option<String> },
    /// Drop a record's source row before review starts.
    DiscardRow(usize),
    Cancel,
    SelectRecord(usize),
    FocusField(String),
    AssignField { field_key: String, value: String },

    Seeded { request: RequestId, result: ReviewResult<AutoExtractResponse> },
    Reextracted { request: RequestId, index: usize, result: ReviewResult<ReextractResponse> },
    Learned { request: RequestId, result: ReviewResult<LearnResponse> },
    RowDiscarded { request: RequestId, result: ReviewResult<RejectRowResponse> },
    Finalized { request: RequestId, result: ReviewResult<FinalizeResponse> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AutoExtract { request: RequestId },
    Reextract { request: RequestId, index: usize, body: ReextractRequest },
    Learn { request: RequestId, body: LearnRequest },
    RejectRow { request: RequestId, body: RejectRowRequest },
    Finalize { request: RequestId, body: FinalizeRequest },
}

impl Effect {
    pub fn request(&self) -> RequestId {
        match self {
            Effect::AutoExtract { request }
            | Effect::Reextract { request, .. }
            | Effect::Learn { request, .. }
            | Effect::RejectRow { request, .. }
            | Effect::Finalize { request, .. } => *request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notice {
    PhaseChanged { from: Phase, to: Phase },
    RemoteFailed { operation: &'static str, message: String },
    ActionUnavailable { action: &'static str, reason: String },
    NoRecordsDetected,
    /// The value moved to another field; this one was cleared.
    FieldReleased { field_key: String },
}

/// What one `reduce` call asks of the host.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    pub effects: Vec<Effect>,
    pub notices: Vec<Notice>,
}

impl Step {
    fn unavailable(action: &'static str, reason: impl Into<String>) -> Self {
        Step {
            effects: Vec::new(),
            notices: vec![Notice::ActionUnavailable {
                action,
                reason: reason.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordTone {
    Current,
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub auto_confirmed: usize,
    pub rejected: usize,
    /// 1-based position of the current record in guided review.
    pub current_position: Option<usize>,
}

/// Result of a successful finalize.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub accepted_indices: Vec<usize>,
    pub rejected_indices: Vec<usize>,
    pub learned_params: Option<LearnedLayoutParams>,
    pub save_as_template: bool,
    pub template_name: Option<String>,
    pub template_id: Option<String>,
    pub record_candidates: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub learning_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            learning_threshold: DEFAULT_LEARNING_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct InFlight {
    seed: Option<RequestId>,
    discard: Option<RequestId>,
    learn: Option<RequestId>,
    finalize: Option<RequestId>,
    /// Latest re-extraction per record index.
    reextract: BTreeMap<usize, RequestId>,
    /// Finalize arguments, kept for the outcome.
    finalize_body: Option<FinalizeRequest>,
}

#[derive(Debug, Clone)]
pub struct ReviewSession {
    job_id: i64,
    config: SessionConfig,
    phase: Phase,
    records: Vec<ReviewableRecord>,
    table: TableExtraction,
    candidates: CandidateSet,
    page: PageDimensions,
    learning_started: bool,
    learned: Option<LearnedLayoutParams>,
    prior_bands: Option<BTreeMap<String, [f64; 2]>>,
    next_request: RequestId,
    in_flight: InFlight,
    selected: Option<usize>,
    adjusting: Option<usize>,
    focused_field: Option<String>,
    claims: ClaimMap,
    outcome: Option<ReviewOutcome>,
}

impl ReviewSession {
    /// Session over candidates the extractor already produced.
    pub fn new(job_id: i64, table: TableExtraction, candidates: CandidateSet, config: SessionConfig) -> Self {
        let mut session = Self::empty(job_id, config);
        session.seed(table, candidates);
        session
    }

    /// Session with no candidates yet; the returned step asks for auto-extraction.
    pub fn awaiting_extraction(job_id: i64, config: SessionConfig) -> (Self, Step) {
        let mut session = Self::empty(job_id, config);
        let request = session.issue();
        session.in_flight.seed = Some(request);
        (
            session,
            Step {
                effects: vec![Effect::AutoExtract { request }],
                notices: Vec::new(),
            },
        )
    }

    fn empty(job_id: i64, config: SessionConfig) -> Self {
        Self {
            job_id,
            config,
            phase: Phase::AutoDetect,
            records: Vec::new(),
            table: TableExtraction::default(),
            candidates: CandidateSet::default(),
            page: PageDimensions::UNIT,
            learning_started: false,
            learned: None,
            prior_bands: None,
            next_request: 1,
            in_flight: InFlight::default(),
            selected: None,
            adjusting: None,
            focused_field: None,
            claims: ClaimMap::new(),
            outcome: None,
        }
    }

    /// Column bands from a saved layout, preferred over the extractor's own.
    pub fn with_prior_layout(mut self, params: &LearnedLayoutParams) -> Self {
        if !params.column_bands.is_empty() {
            self.prior_bands = Some(params.column_bands.clone());
        }
        self
    }

    // ---- queries ----

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn records(&self) -> &[ReviewableRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&ReviewableRecord> {
        self.records.iter().find(|r| r.index == index)
    }

    pub fn table(&self) -> &TableExtraction {
        &self.table
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    /// Page size used for box conversion; the unit page when the extractor gave none.
    pub fn page(&self) -> PageDimensions {
        self.page
    }

    pub fn has_page_dimensions(&self) -> bool {
        self.table.page().is_some()
    }

    pub fn learned_params(&self) -> Option<&LearnedLayoutParams> {
        self.learned.as_ref()
    }

    pub fn outcome(&self) -> Option<&ReviewOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn is_learning(&self) -> bool {
        self.in_flight.learn.is_some()
    }

    /// First pending record by index, while in guided review.
    pub fn current(&self) -> Option<&ReviewableRecord> {
        if self.phase != Phase::GuidedReview {
            return None;
        }
        self.first_pending()
    }

    fn first_pending(&self) -> Option<&ReviewableRecord> {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Pending)
            .min_by_key(|r| r.index)
    }

    pub fn selected(&self) -> Option<&ReviewableRecord> {
        self.selected.and_then(|i| self.record(i))
    }

    pub fn adjusting(&self) -> Option<usize> {
        self.adjusting
    }

    pub fn focused_field(&self) -> Option<&str> {
        self.focused_field.as_deref()
    }

    pub fn claims(&self) -> &ClaimMap {
        &self.claims
    }

    pub fn record_type(&self) -> RecordType {
        self.candidates
            .detected_type
            .filter(|t| *t != RecordType::Unknown)
            .or_else(|| self.records.first().map(|r| r.candidate.record_type))
            .unwrap_or(RecordType::Unknown)
    }

    pub fn template_key(&self) -> TemplateKey {
        TemplateKey {
            record_type: self.record_type(),
            column_count: self.table.column_count(),
            orientation: self.page.orientation(),
        }
    }

    pub fn progress(&self) -> Progress {
        let count = |s: RecordStatus| self.records.iter().filter(|r| r.status == s).count();
        let current_position = self
            .current()
            .and_then(|c| self.records.iter().position(|r| r.index == c.index))
            .map(|p| p + 1);
        Progress {
            total: self.records.len(),
            pending: count(RecordStatus::Pending),
            confirmed: count(RecordStatus::Confirmed),
            auto_confirmed: count(RecordStatus::AutoConfirmed),
            rejected: count(RecordStatus::Rejected),
            current_position,
        }
    }

    pub fn record_tone(&self, index: usize) -> Option<RecordTone> {
        let record = self.record(index)?;
        if self.current().map(|c| c.index) == Some(index) {
            return Some(RecordTone::Current);
        }
        Some(match record.status {
            RecordStatus::Pending => RecordTone::Pending,
            RecordStatus::Confirmed | RecordStatus::AutoConfirmed => RecordTone::Accepted,
            RecordStatus::Rejected => RecordTone::Rejected,
        })
    }

    pub fn can_start_review(&self) -> bool {
        self.phase == Phase::AutoDetect
            && !self.records.is_empty()
            && self.in_flight.seed.is_none()
            && self.in_flight.discard.is_none()
    }

    pub fn can_finalize(&self) -> bool {
        self.phase == Phase::BulkConfirm
            && self.in_flight.finalize.is_none()
            && self.records.iter().any(|r| r.status.is_accepted())
    }

    pub fn can_toggle(&self, index: usize) -> bool {
        self.phase == Phase::BulkConfirm
            && self.in_flight.finalize.is_none()
            && self.record(index).map(|r| !r.locked).unwrap_or(false)
    }

    /// Cells of a record's source row.
    pub fn cells_for(&self, index: usize) -> Vec<TableCell> {
        match self.record(index) {
            Some(r) => self.table.cells_for_rows(&[r.candidate.source_row_index]),
            None => Vec::new(),
        }
    }

    /// Ranked values for `field_key` in the selected record, excluding values
    /// other fields already hold.
    pub fn suggestions(&self, field_key: &str) -> Option<SuggestionResult> {
        let record = self.selected()?;
        let cells = self.table.cells_for_rows(&[record.candidate.source_row_index]);
        let used = self.claims.used_values_excluding(field_key);
        Some(compute_field_suggestions(
            field_key,
            record.candidate.record_type,
            &cells,
            &self.candidates.column_mapping,
            &used,
        ))
    }

    // ---- reducer ----

    pub fn reduce(mut self, event: Event) -> (Self, Step) {
        let step = self.apply(event);
        (self, step)
    }

    fn apply(&mut self, event: Event) -> Step {
        if self.phase == Phase::Closed {
            if is_completion(&event) {
                tracing::debug!(job_id = self.job_id, "dropping completion for closed session");
                return Step::default();
            }
            return Step::unavailable("any", "review session is closed");
        }
        match event {
            Event::StartReview => self.start_review(),
            Event::Confirm => self.decide(RecordStatus::Confirmed),
            Event::Reject => self.decide(RecordStatus::Rejected),
            Event::StartAdjust => self.start_adjust(),
            Event::BboxChangeEnd { index, bbox } => self.bbox_change_end(index, bbox),
            Event::Toggle(index) => self.toggle(index),
            Event::Finalize {
                save_as_template,
                template_name,
            } => self.finalize(save_as_template, template_name),
            Event::DiscardRow(index) => self.discard_row(index),
            Event::Cancel => {
                let mut step = Step::default();
                self.in_flight = InFlight::default();
                self.set_phase(Phase::Closed, &mut step);
                step
            }
            Event::SelectRecord(index) => self.select_record(index),
            Event::FocusField(field_key) => self.focus_field(field_key),
            Event::AssignField { field_key, value } => self.assign_field(field_key, value),
            Event::Seeded { request, result } => self.on_seeded(request, result),
            Event::Reextracted { request, index, result } => self.on_reextracted(request, index, result),
            Event::Learned { request, result } => self.on_learned(request, result),
            Event::RowDiscarded { request, result } => self.on_row_discarded(request, result),
            Event::Finalized { request, result } => self.on_finalized(request, result),
        }
    }

    fn issue(&mut self) -> RequestId {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    fn set_phase(&mut self, to: Phase, step: &mut Step) {
        if self.phase == to {
            return;
        }
        let from = self.phase;
        self.phase = to;
        tracing::info!(job_id = self.job_id, ?from, ?to, "review phase changed");
        step.notices.push(Notice::PhaseChanged { from, to });
    }

    fn set_selection(&mut self, index: Option<usize>) {
        if self.selected == index {
            return;
        }
        self.selected = index;
        self.focused_field = None;
        self.claims = match index.and_then(|i| self.record(i)) {
            Some(r) => ClaimMap::seeded_from(&r.candidate.fields),
            None => ClaimMap::new(),
        };
    }

    /// In guided review the selection follows the current record.
    fn follow_current(&mut self) {
        let current = self.current().map(|r| r.index);
        self.set_selection(current);
    }

    fn seed(&mut self, table: TableExtraction, candidates: CandidateSet) {
        self.page = table.page().unwrap_or(PageDimensions::UNIT);
        self.records = candidates
            .candidates
            .iter()
            .enumerate()
            .map(|(i, c)| self.build_record(i, i, c.clone(), RecordStatus::Pending, &table))
            .collect();
        self.table = table;
        self.candidates = candidates;
        self.adjusting = None;
        self.set_selection(None);
        tracing::info!(job_id = self.job_id, records = self.records.len(), "review session seeded");
    }

    fn build_record(
        &self,
        index: usize,
        position: usize,
        candidate: RecordCandidate,
        status: RecordStatus,
        table: &TableExtraction,
    ) -> ReviewableRecord {
        let page = table.page().unwrap_or(PageDimensions::UNIT);
        let fractional_bbox = table
            .row_bbox(candidate.source_row_index)
            .unwrap_or_else(|| fallback_row_bbox(position));
        ReviewableRecord {
            index,
            vision_bbox: fractional_to_vision(&fractional_bbox, page),
            fractional_bbox,
            candidate,
            status,
            was_adjusted: false,
            locked: false,
        }
    }

    fn start_review(&mut self) -> Step {
        if !self.can_start_review() {
            let reason = if self.phase != Phase::AutoDetect {
                "review already started"
            } else if self.records.is_empty() {
                "no records detected"
            } else {
                "waiting for the extraction service"
            };
            return Step::unavailable("startReview", reason);
        }
        let mut step = Step::default();
        self.set_phase(Phase::GuidedReview, &mut step);
        if self.first_pending().is_none() {
            self.set_phase(Phase::BulkConfirm, &mut step);
        }
        self.follow_current();
        step
    }

    fn decide(&mut self, status: RecordStatus) -> Step {
        let action = if status == RecordStatus::Confirmed {
            "confirm"
        } else {
            "reject"
        };
        if self.phase != Phase::GuidedReview {
            return Step::unavailable(action, "only available during guided review");
        }
        let Some(index) = self.current().map(|r| r.index) else {
            return Step::unavailable(action, "no pending record");
        };
        if let Some(record) = self.records.iter_mut().find(|r| r.index == index) {
            record.status = status;
            record.locked = true;
        }
        tracing::debug!(job_id = self.job_id, index, ?status, "record decided");
        if self.adjusting == Some(index) {
            self.adjusting = None;
        }

        let mut step = Step::default();
        self.advance_after_decision(&mut step);
        self.follow_current();
        step
    }

    fn advance_after_decision(&mut self, step: &mut Step) {
        let confirmed = self
            .records
            .iter()
            .filter(|r| r.status == RecordStatus::Confirmed)
            .count();
        let pending = self
            .records
            .iter()
            .filter(|r| r.status == RecordStatus::Pending)
            .count();

        if pending == 0 {
            self.learned = self.local_layout();
            self.set_phase(Phase::BulkConfirm, step);
        } else if confirmed >= self.config.learning_threshold && !self.learning_started {
            self.begin_learning(step);
        }
    }

    fn confirmed_boundaries(&self) -> Vec<ConfirmedBoundary> {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Confirmed)
            .map(|r| ConfirmedBoundary {
                bbox: r.fractional_bbox,
                cells: self.table.cells_for_rows(&[r.candidate.source_row_index]),
            })
            .collect()
    }

    fn local_layout(&self) -> Option<LearnedLayoutParams> {
        let prior = self
            .prior_bands
            .clone()
            .unwrap_or_else(|| self.table.column_bands.clone());
        derive_layout(&self.confirmed_boundaries(), &prior, self.config.learning_threshold)
    }

    fn begin_learning(&mut self, step: &mut Step) {
        self.learning_started = true;
        self.learned = self.local_layout();
        let request = self.issue();
        self.in_flight.learn = Some(request);

        let body = LearnRequest {
            confirmed_records: self
                .records
                .iter()
                .filter(|r| r.status == RecordStatus::Confirmed)
                .map(|r| ConfirmedRecordPayload {
                    source_row_index: r.candidate.source_row_index,
                    bbox: r.fractional_bbox,
                    was_adjusted: r.was_adjusted,
                })
                .collect(),
            rejected_row_indices: self
                .records
                .iter()
                .filter(|r| r.status == RecordStatus::Rejected)
                .map(|r| r.candidate.source_row_index)
                .collect(),
        };
        self.set_phase(Phase::Learning, step);
        step.effects.push(Effect::Learn { request, body });
    }

    fn start_adjust(&mut self) -> Step {
        match self.current().map(|r| r.index) {
            Some(index) => {
                self.adjusting = Some(index);
                Step::default()
            }
            None => Step::unavailable("startAdjust", "no record under review"),
        }
    }

    fn bbox_change_end(&mut self, index: usize, bbox: VisionBBox) -> Step {
        if self.phase != Phase::GuidedReview {
            return Step::unavailable("adjustBox", "boxes are adjusted during guided review");
        }
        if !self.has_page_dimensions() {
            return Step::unavailable("adjustBox", "page dimensions unknown");
        }
        let page = self.page;
        let Some(record) = self.records.iter_mut().find(|r| r.index == index) else {
            return Step::unavailable("adjustBox", format!("no record {}", index));
        };
        if record.locked {
            return Step::unavailable("adjustBox", "record already reviewed");
        }

        // The new boundary sticks even if re-extraction later fails.
        // Both forms describe the same on-page box.
        let fractional = vision_to_fractional(&bbox, page).normalized();
        record.vision_bbox = fractional_to_vision(&fractional, page);
        record.fractional_bbox = fractional;
        record.was_adjusted = true;

        let request = self.issue();
        self.in_flight.reextract.insert(index, request);
        Step {
            effects: vec![Effect::Reextract {
                request,
                index,
                body: ReextractRequest {
                    record_index: index,
                    bbox: fractional,
                },
            }],
            notices: Vec::new(),
        }
    }

    fn toggle(&mut self, index: usize) -> Step {
        if !self.can_toggle(index) {
            return Step::unavailable("toggle", "only unreviewed records can be toggled in bulk confirm");
        }
        if let Some(record) = self.records.iter_mut().find(|r| r.index == index) {
            record.status = match record.status {
                RecordStatus::AutoConfirmed => RecordStatus::Rejected,
                _ => RecordStatus::AutoConfirmed,
            };
        }
        Step::default()
    }

    fn finalize(&mut self, save_as_template: bool, template_name: Option<String>) -> Step {
        if !self.can_finalize() {
            let reason = if self.phase != Phase::BulkConfirm {
                "finalize is available in bulk confirm"
            } else if self.in_flight.finalize.is_some() {
                "finalize already in progress"
            } else {
                "no confirmed records"
            };
            return Step::unavailable("finalize", reason);
        }
        if self.learned.is_none() {
            self.learned = self.local_layout();
        }
        let indices = |pred: fn(&RecordStatus) -> bool| -> Vec<usize> {
            self.records
                .iter()
                .filter(|r| pred(&r.status))
                .map(|r| r.index)
                .collect()
        };
        let body = FinalizeRequest {
            confirmed_indices: indices(RecordStatus::is_accepted),
            rejected_indices: indices(|s| *s == RecordStatus::Rejected),
            learned_params: self.learned.clone(),
            save_as_template,
            template_name: if save_as_template {
                template_name.filter(|n| !n.trim().is_empty())
            } else {
                None
            },
        };
        let request = self.issue();
        self.in_flight.finalize = Some(request);
        self.in_flight.finalize_body = Some(body.clone());
        Step {
            effects: vec![Effect::Finalize { request, body }],
            notices: Vec::new(),
        }
    }

    fn discard_row(&mut self, index: usize) -> Step {
        if self.phase != Phase::AutoDetect {
            return Step::unavailable("discardRow", "rows are discarded before review starts");
        }
        if self.in_flight.discard.is_some() || self.in_flight.seed.is_some() {
            return Step::unavailable("discardRow", "waiting for the extraction service");
        }
        let Some(record) = self.record(index) else {
            return Step::unavailable("discardRow", format!("no record {}", index));
        };
        let body = RejectRowRequest {
            row_index: record.candidate.source_row_index,
            record_type: record.candidate.record_type,
            table_extraction: self.table.clone(),
        };
        let request = self.issue();
        self.in_flight.discard = Some(request);
        Step {
            effects: vec![Effect::RejectRow { request, body }],
            notices: Vec::new(),
        }
    }

    fn select_record(&mut self, index: usize) -> Step {
        if self.phase == Phase::GuidedReview {
            return Step::unavailable("selectRecord", "guided review follows the current record");
        }
        if self.record(index).is_none() {
            return Step::unavailable("selectRecord", format!("no record {}", index));
        }
        self.set_selection(Some(index));
        Step::default()
    }

    fn focus_field(&mut self, field_key: String) -> Step {
        if self.selected.is_none() {
            return Step::unavailable("focusField", "no record selected");
        }
        self.focused_field = Some(field_key);
        Step::default()
    }

    fn assign_field(&mut self, field_key: String, value: String) -> Step {
        let Some(index) = self.selected else {
            return Step::unavailable("assignField", "no record selected");
        };
        if self.phase == Phase::Learning {
            return Step::unavailable("assignField", "learning in progress");
        }
        let Some(record) = self.records.iter_mut().find(|r| r.index == index) else {
            return Step::unavailable("assignField", format!("no record {}", index));
        };

        let mut step = Step::default();
        let value = value.trim().to_string();
        if value.is_empty() {
            record.candidate.fields.remove(&field_key);
            self.claims.release_field(&field_key);
            return step;
        }
        if let Some(previous) = self.claims.claim(&field_key, &value) {
            record.candidate.fields.remove(&previous);
            step.notices.push(Notice::FieldReleased { field_key: previous });
        }
        record.candidate.fields.insert(field_key, value);
        step
    }

    // ---- completions ----

    fn on_seeded(&mut self, request: RequestId, result: ReviewResult<AutoExtractResponse>) -> Step {
        if self.in_flight.seed != Some(request) {
            return stale("auto-extract", request);
        }
        self.in_flight.seed = None;
        let mut step = Step::default();
        match result {
            Ok(resp) => {
                let table = resp.table_extraction.unwrap_or_default();
                let candidates = resp.record_candidates.unwrap_or_default();
                self.seed(table, candidates);
            }
            Err(e) => step.notices.push(remote_failed("auto-extract", &e.to_string())),
        }
        if self.records.is_empty() {
            step.notices.push(Notice::NoRecordsDetected);
        }
        step
    }

    fn on_reextracted(&mut self, request: RequestId, index: usize, result: ReviewResult<ReextractResponse>) -> Step {
        if self.in_flight.reextract.get(&index) != Some(&request) {
            return stale("reextract-row", request);
        }
        self.in_flight.reextract.remove(&index);
        match result {
            Ok(resp) => {
                let Some(record) = self.records.iter_mut().find(|r| r.index == index) else {
                    return Step::default();
                };
                record.candidate.fields.extend(resp.fields);
                tracing::debug!(job_id = self.job_id, index, tokens = resp.token_count, "row re-extracted");
                if self.selected == Some(index) {
                    self.claims = ClaimMap::seeded_from(&record.candidate.fields);
                }
                Step::default()
            }
            Err(e) => Step {
                effects: Vec::new(),
                notices: vec![remote_failed("reextract-row", &e.to_string())],
            },
        }
    }

    fn on_learned(&mut self, request: RequestId, result: ReviewResult<LearnResponse>) -> Step {
        if self.in_flight.learn != Some(request) {
            return stale("learn-from-confirmations", request);
        }
        self.in_flight.learn = None;
        let mut step = Step::default();
        match result {
            Ok(resp) => {
                if let Some(params) = resp.learned_params {
                    self.learned = Some(params);
                }
                if let Some(table) = resp.table_extraction {
                    self.table = table;
                    self.page = self.table.page().unwrap_or(self.page);
                }
                if let Some(candidates) = resp.record_candidates {
                    self.reseed_unreviewed(candidates);
                }
            }
            Err(e) => step.notices.push(remote_failed("learn-from-confirmations", &e.to_string())),
        }
        self.adjusting = None;
        self.set_phase(Phase::BulkConfirm, &mut step);
        self.set_selection(None);
        step
    }

    /// Keep every operator decision; replace the rest with the relearned candidates.
    fn reseed_unreviewed(&mut self, candidates: CandidateSet) {
        let mut kept: Vec<ReviewableRecord> = self.records.iter().filter(|r| r.locked).cloned().collect();
        let reviewed_rows: BTreeSet<i64> = kept.iter().map(|r| r.candidate.source_row_index).collect();
        let header = self.learned.as_ref().map(|p| p.header_y_threshold).unwrap_or(0.0);
        let mut next_index = kept.iter().map(|r| r.index + 1).max().unwrap_or(0);
        // Indices of dropped records get reused below.
        self.in_flight
            .reextract
            .retain(|index, _| kept.iter().any(|r| r.index == *index));

        let mut added = 0;
        for (position, candidate) in candidates.candidates.iter().enumerate() {
            if reviewed_rows.contains(&candidate.source_row_index) {
                continue;
            }
            let record = self.build_record(
                next_index,
                position,
                candidate.clone(),
                RecordStatus::AutoConfirmed,
                &self.table,
            );
            if record.fractional_bbox.y_max <= header {
                continue;
            }
            kept.push(record);
            next_index += 1;
            added += 1;
        }
        tracing::info!(job_id = self.job_id, kept = kept.len() - added, added, "records reseeded from learned layout");
        self.records = kept;
        self.candidates = CandidateSet {
            candidates: self.records.iter().map(|r| r.candidate.clone()).collect(),
            ..candidates
        };
    }

    fn on_row_discarded(&mut self, request: RequestId, result: ReviewResult<RejectRowResponse>) -> Step {
        if self.in_flight.discard != Some(request) {
            return stale("reject-row", request);
        }
        self.in_flight.discard = None;
        let mut step = Step::default();
        match result {
            Ok(resp) => {
                let table = resp.table_extraction.unwrap_or_else(|| self.table.clone());
                let candidates = resp.record_candidates.unwrap_or_else(|| self.candidates.clone());
                self.seed(table, candidates);
                if self.records.is_empty() {
                    step.notices.push(Notice::NoRecordsDetected);
                }
            }
            Err(e) => step.notices.push(remote_failed("reject-row", &e.to_string())),
        }
        step
    }

    fn on_finalized(&mut self, request: RequestId, result: ReviewResult<FinalizeResponse>) -> Step {
        if self.in_flight.finalize != Some(request) {
            return stale("finalize-review", request);
        }
        self.in_flight.finalize = None;
        let body = self.in_flight.finalize_body.take();
        let mut step = Step::default();
        match (result, body) {
            (Ok(resp), Some(body)) => {
                self.outcome = Some(ReviewOutcome {
                    accepted_indices: body.confirmed_indices,
                    rejected_indices: body.rejected_indices,
                    learned_params: body.learned_params,
                    save_as_template: body.save_as_template,
                    template_name: body.template_name,
                    template_id: resp.template_id,
                    record_candidates: resp.record_candidates,
                });
                self.in_flight = InFlight::default();
                self.set_phase(Phase::Closed, &mut step);
            }
            (Ok(_), None) => step.notices.push(remote_failed("finalize-review", "finalize arguments lost")),
            (Err(e), _) => step.notices.push(remote_failed("finalize-review", &e.to_string())),
        }
        step
    }
}

fn is_completion(event: &Event) -> bool {
    matches!(
        event,
        Event::Seeded { .. }
            | Event::Reextracted { .. }
            | Event::Learned { .. }
            | Event::RowDiscarded { .. }
            | Event::Finalized { .. }
    )
}

fn stale(operation: &'static str, request: RequestId) -> Step {
    tracing::warn!(operation, request, "dropping stale completion");
    Step::default()
}

fn remote_failed(operation: &'static str, message: &str) -> Notice {
    tracing::warn!(operation, message, "extraction service call failed");
    Notice::RemoteFailed {
        operation,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::FractionalBBox;
    use crate::error::ReviewError;
    use crate::types::{Table, TableRow};

    fn candidate(row: i64, name: &str) -> RecordCandidate {
        let mut fields = BTreeMap::new();
        fields.insert("deceased_name".to_string(), name.to_string());
        RecordCandidate {
            record_type: RecordType::Funeral,
            confidence: 0.8,
            fields,
            source_row_index: row,
            needs_review: false,
        }
    }

    fn cell(content: &str, column_index: usize, y: f64) -> TableCell {
        TableCell {
            content: content.to_string(),
            column_key: None,
            column_index,
            bbox: Some(FractionalBBox::new(
                0.05 + 0.3 * column_index as f64,
                y,
                0.3 + 0.3 * column_index as f64,
                y + 0.03,
            )),
            confidence: Some(0.9),
        }
    }

    /// Page with `n` funeral rows, each a name and a date cell.
    fn page_with_rows(n: usize) -> (TableExtraction, CandidateSet) {
        let names = ["John Smith", "Mary Jones", "Peter Brown", "Anna Kowalska", "Paul Green", "Olga Petrova"];
        let rows = (0..n)
            .map(|i| {
                let y = 0.2 + 0.05 * i as f64;
                TableRow {
                    row_index: i as i64,
                    cells: vec![cell(names[i % names.len()], 0, y), cell("12/05/1950", 1, y)],
                }
            })
            .collect();
        let table = TableExtraction {
            page_dimensions: Some(PageDimensions::new(2000.0, 3000.0)),
            tables: vec![Table { rows }],
            ..TableExtraction::default()
        };
        let candidates = CandidateSet {
            candidates: (0..n).map(|i| candidate(i as i64, names[i % names.len()])).collect(),
            detected_type: Some(RecordType::Funeral),
            ..CandidateSet::default()
        };
        (table, candidates)
    }

    fn session(n: usize) -> ReviewSession {
        let (table, candidates) = page_with_rows(n);
        ReviewSession::new(7, table, candidates, SessionConfig::default())
    }

    fn run(s: ReviewSession, events: Vec<Event>) -> (ReviewSession, Vec<Step>) {
        let mut steps = Vec::new();
        let mut s = s;
        for e in events {
            let (next, step) = s.reduce(e);
            s = next;
            steps.push(step);
        }
        (s, steps)
    }

    fn learn_request(step: &Step) -> RequestId {
        step.effects
            .iter()
            .find_map(|e| match e {
                Effect::Learn { request, .. } => Some(*request),
                _ => None,
            })
            .expect("learn effect")
    }

    fn status_of(s: &ReviewSession, index: usize) -> RecordStatus {
        s.record(index).unwrap().status
    }

    #[test]
    fn seeding_places_boxes_from_cells() {
        let s = session(2);
        assert_eq!(s.phase(), Phase::AutoDetect);
        let r = s.record(1).unwrap();
        assert!((r.fractional_bbox.y_min - 0.25).abs() < 1e-9);
        assert!((r.fractional_bbox.x_max - 0.6).abs() < 1e-9);
        assert!((r.vision_bbox.y - 750.0).abs() < 1e-6);
        assert_eq!(s.template_key().column_count, 2);
    }

    #[test]
    fn review_needs_at_least_one_candidate() {
        let s = ReviewSession::new(7, TableExtraction::default(), CandidateSet::default(), SessionConfig::default());
        assert!(!s.can_start_review());
        let (s, step) = s.reduce(Event::StartReview);
        assert_eq!(s.phase(), Phase::AutoDetect);
        assert!(matches!(step.notices[0], Notice::ActionUnavailable { action: "startReview", .. }));
    }

    #[test]
    fn third_confirmation_triggers_learning_then_bulk_confirm() {
        let (s, steps) = run(
            session(5),
            vec![Event::StartReview, Event::Confirm, Event::Confirm],
        );
        assert_eq!(s.phase(), Phase::GuidedReview);
        assert!(steps.iter().all(|st| st.effects.is_empty()));
        assert_eq!(s.current().unwrap().index, 2);

        let (s, step) = s.reduce(Event::Confirm);
        assert_eq!(s.phase(), Phase::Learning);
        assert!(s.is_learning());
        let request = learn_request(&step);
        match &step.effects[0] {
            Effect::Learn { body, .. } => {
                assert_eq!(body.confirmed_records.len(), 3);
                assert!(body.rejected_row_indices.is_empty());
            }
            other => panic!("unexpected effect {:?}", other),
        }

        let (table, mut candidates) = page_with_rows(5);
        candidates.candidates[4].fields.insert("age_at_death".to_string(), "82".to_string());
        let (s, step) = s.reduce(Event::Learned {
            request,
            result: Ok(LearnResponse {
                success: true,
                learned_params: None,
                table_extraction: Some(table),
                record_candidates: Some(candidates),
            }),
        });
        assert_eq!(s.phase(), Phase::BulkConfirm);
        assert!(step.notices.contains(&Notice::PhaseChanged {
            from: Phase::Learning,
            to: Phase::BulkConfirm
        }));
        assert_eq!(s.records().len(), 5);
        for i in 0..3 {
            assert_eq!(status_of(&s, i), RecordStatus::Confirmed);
        }
        assert_eq!(status_of(&s, 3), RecordStatus::AutoConfirmed);
        assert_eq!(status_of(&s, 4), RecordStatus::AutoConfirmed);
        assert_eq!(s.record(4).unwrap().candidate.fields["age_at_death"], "82");
        // Local derivation stands in when the service sends no params.
        assert!(s.learned_params().is_some());
    }

    #[test]
    fn relearned_rows_inside_the_header_band_are_dropped() {
        let (s, steps) = run(
            session(5),
            vec![Event::StartReview, Event::Confirm, Event::Confirm, Event::Confirm],
        );
        let request = learn_request(&steps[3]);
        let (table, candidates) = page_with_rows(5);
        let params = LearnedLayoutParams {
            header_y_threshold: 0.39,
            ..LearnedLayoutParams::default()
        };
        let (s, _) = s.reduce(Event::Learned {
            request,
            result: Ok(LearnResponse {
                success: true,
                learned_params: Some(params),
                table_extraction: Some(table),
                record_candidates: Some(candidates),
            }),
        });
        let rows: Vec<i64> = s.records().iter().map(|r| r.candidate.source_row_index).collect();
        assert_eq!(rows, vec![0, 1, 2, 4]);
        assert_eq!(s.record(3).unwrap().status, RecordStatus::AutoConfirmed);
        assert_eq!(s.learned_params().unwrap().header_y_threshold, 0.39);
    }

    #[test]
    fn learning_fires_only_once() {
        let config = SessionConfig { learning_threshold: 1 };
        let (table, candidates) = page_with_rows(4);
        let s = ReviewSession::new(7, table, candidates, config);
        let (s, steps) = run(s, vec![Event::StartReview, Event::Confirm]);
        let request = learn_request(&steps[1]);
        let (s, _) = s.reduce(Event::Learned {
            request,
            result: Err(ReviewError::remote("learn-from-confirmations", "timeout")),
        });
        assert_eq!(s.phase(), Phase::BulkConfirm);
        // Failure leaves the unreviewed records untouched.
        assert_eq!(status_of(&s, 1), RecordStatus::Pending);
        let (_, step) = s.reduce(Event::Confirm);
        assert!(step.effects.is_empty());
    }

    #[test]
    fn exhausting_records_before_threshold_skips_learning() {
        let (s, steps) = run(session(2), vec![Event::StartReview, Event::Confirm, Event::Reject]);
        assert_eq!(s.phase(), Phase::BulkConfirm);
        assert!(steps.iter().all(|st| st.effects.is_empty()));
        assert!(s.current().is_none());
    }

    #[test]
    fn operator_decisions_survive_learning_and_toggles() {
        let (s, steps) = run(
            session(6),
            vec![
                Event::StartReview,
                Event::Confirm,
                Event::Reject,
                Event::Confirm,
                Event::Confirm,
            ],
        );
        assert_eq!(s.phase(), Phase::Learning);
        let request = learn_request(steps.last().unwrap());

        // The service claims every row, including the reviewed ones.
        let (table, mut candidates) = page_with_rows(6);
        for c in candidates.candidates.iter_mut() {
            c.fields.insert("deceased_name".to_string(), "Overwritten".to_string());
        }
        let (s, _) = s.reduce(Event::Learned {
            request,
            result: Ok(LearnResponse {
                success: true,
                learned_params: None,
                table_extraction: Some(table),
                record_candidates: Some(candidates),
            }),
        });
        assert_eq!(status_of(&s, 0), RecordStatus::Confirmed);
        assert_eq!(status_of(&s, 1), RecordStatus::Rejected);
        assert_eq!(s.record(0).unwrap().candidate.fields["deceased_name"], "John Smith");
        assert_eq!(s.records().len(), 6);

        let (s, steps) = run(s, vec![Event::Toggle(0), Event::Toggle(1), Event::Toggle(4)]);
        assert!(matches!(steps[0].notices[0], Notice::ActionUnavailable { action: "toggle", .. }));
        assert!(matches!(steps[1].notices[0], Notice::ActionUnavailable { action: "toggle", .. }));
        assert_eq!(status_of(&s, 0), RecordStatus::Confirmed);
        assert_eq!(status_of(&s, 1), RecordStatus::Rejected);
        assert_eq!(status_of(&s, 4), RecordStatus::Rejected);

        let (s, _) = s.reduce(Event::Toggle(4));
        assert_eq!(status_of(&s, 4), RecordStatus::AutoConfirmed);
    }

    #[test]
    fn finalize_sends_accepted_and_rejected_indices() {
        let config = SessionConfig { learning_threshold: 10 };
        let (table, candidates) = page_with_rows(4);
        let s = ReviewSession::new(7, table, candidates, config);
        let (s, _) = run(
            s,
            vec![Event::StartReview, Event::Confirm, Event::Confirm, Event::Reject, Event::Reject],
        );
        assert_eq!(s.phase(), Phase::BulkConfirm);
        // Stand in for a row the learned layout auto-confirmed.
        let mut s = s;
        if let Some(r) = s.records.iter_mut().find(|r| r.index == 3) {
            r.status = RecordStatus::AutoConfirmed;
            r.locked = false;
        }

        let (s, step) = s.reduce(Event::Finalize {
            save_as_template: true,
            template_name: Some("Funeral ledger 1950s".to_string()),
        });
        let (request, body) = match &step.effects[..] {
            [Effect::Finalize { request, body }] => (*request, body.clone()),
            other => panic!("unexpected effects {:?}", other),
        };
        assert_eq!(body.confirmed_indices, vec![0, 1, 3]);
        assert_eq!(body.rejected_indices, vec![2]);
        assert!(body.learned_params.is_some());
        assert_eq!(body.template_name.as_deref(), Some("Funeral ledger 1950s"));

        let (s, step) = s.reduce(Event::Finalized {
            request,
            result: Ok(FinalizeResponse {
                success: true,
                record_candidates: None,
                template_id: Some("31".to_string()),
            }),
        });
        assert!(s.is_closed());
        assert_eq!(s.outcome().unwrap().template_id.as_deref(), Some("31"));
        assert!(step.notices.contains(&Notice::PhaseChanged {
            from: Phase::BulkConfirm,
            to: Phase::Closed
        }));

        let (s, step) = s.reduce(Event::Toggle(0));
        assert!(!step.notices.is_empty());
        assert_eq!(status_of(&s, 0), RecordStatus::Confirmed);
    }

    #[test]
    fn finalize_with_nothing_accepted_never_reaches_the_service() {
        let (s, _) = run(session(2), vec![Event::StartReview, Event::Reject, Event::Reject]);
        assert_eq!(s.phase(), Phase::BulkConfirm);
        assert!(!s.can_finalize());
        let (s, step) = s.reduce(Event::Finalize {
            save_as_template: false,
            template_name: None,
        });
        assert!(step.effects.is_empty());
        assert!(matches!(step.notices[0], Notice::ActionUnavailable { action: "finalize", .. }));
        assert_eq!(s.phase(), Phase::BulkConfirm);
    }

    #[test]
    fn failed_finalize_keeps_session_open() {
        let (s, _) = run(session(1), vec![Event::StartReview, Event::Confirm]);
        let (s, step) = s.reduce(Event::Finalize {
            save_as_template: false,
            template_name: Some("ignored".to_string()),
        });
        let request = step.effects[0].request();
        match &step.effects[0] {
            Effect::Finalize { body, .. } => assert_eq!(body.template_name, None),
            other => panic!("unexpected effect {:?}", other),
        }
        let (s, step) = s.reduce(Event::Finalized {
            request,
            result: Err(ReviewError::remote("finalize-review", "HTTP 500")),
        });
        assert_eq!(s.phase(), Phase::BulkConfirm);
        assert!(matches!(step.notices[0], Notice::RemoteFailed { operation: "finalize-review", .. }));
        assert!(s.can_finalize());
    }

    #[test]
    fn adjusted_box_sticks_and_fields_merge_on_reply() {
        let (s, _) = run(session(3), vec![Event::StartReview, Event::StartAdjust]);
        assert_eq!(s.adjusting(), Some(0));
        let new_box = VisionBBox::new(100.0, 600.0, 1800.0, 90.0);
        let (s, step) = s.reduce(Event::BboxChangeEnd { index: 0, bbox: new_box });
        let request = step.effects[0].request();
        let r = s.record(0).unwrap();
        assert!(r.was_adjusted);
        assert_box_near(r.vision_bbox, new_box);
        assert!((r.fractional_bbox.y_min - 0.2).abs() < 1e-9);
        assert_eq!(r.status, RecordStatus::Pending);

        let mut fields = BTreeMap::new();
        fields.insert("date_of_death".to_string(), "12/05/1950".to_string());
        let (s, _) = s.reduce(Event::Reextracted {
            request,
            index: 0,
            result: Ok(ReextractResponse {
                success: true,
                fields,
                token_count: 4,
            }),
        });
        let f = &s.record(0).unwrap().candidate.fields;
        assert_eq!(f["date_of_death"], "12/05/1950");
        assert_eq!(f["deceased_name"], "John Smith");
    }

    #[test]
    fn failed_reextract_keeps_fields_and_boundary() {
        let (s, _) = run(session(2), vec![Event::StartReview]);
        let new_box = VisionBBox::new(50.0, 500.0, 1000.0, 100.0);
        let (s, step) = s.reduce(Event::BboxChangeEnd { index: 0, bbox: new_box });
        let request = step.effects[0].request();
        let (s, step) = s.reduce(Event::Reextracted {
            request,
            index: 0,
            result: Err(ReviewError::remote("reextract-row", "HTTP 502")),
        });
        assert!(matches!(step.notices[0], Notice::RemoteFailed { .. }));
        let r = s.record(0).unwrap();
        assert!(r.was_adjusted);
        assert_box_near(r.vision_bbox, new_box);
        assert_eq!(r.candidate.fields.len(), 1);
    }

    fn assert_box_near(a: VisionBBox, b: VisionBBox) {
        for (x, y) in [(a.x, b.x), (a.y, b.y), (a.w, b.w), (a.h, b.h)] {
            assert!((x - y).abs() < 1e-6, "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn box_dragged_off_the_page_is_stored_clipped() {
        let (s, _) = run(session(3), vec![Event::StartReview]);
        let (s, step) = s.reduce(Event::BboxChangeEnd {
            index: 0,
            bbox: VisionBBox::new(1900.0, 2950.0, 400.0, 200.0),
        });
        let r = s.record(0).unwrap();
        assert_box_near(r.vision_bbox, VisionBBox::new(1900.0, 2950.0, 100.0, 50.0));
        let f = r.fractional_bbox;
        assert_box_near(
            r.vision_bbox,
            VisionBBox::new(f.x_min * 2000.0, f.y_min * 3000.0, (f.x_max - f.x_min) * 2000.0, (f.y_max - f.y_min) * 3000.0),
        );
        match &step.effects[0] {
            Effect::Reextract { body, .. } => assert_eq!(body.bbox, f),
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn reextract_for_a_reseeded_record_is_dropped() {
        let (s, _) = run(session(5), vec![Event::StartReview]);
        let (s, adjust) = s.reduce(Event::BboxChangeEnd {
            index: 4,
            bbox: VisionBBox::new(100.0, 1200.0, 1500.0, 90.0),
        });
        let (s, steps) = run(s, vec![Event::Confirm, Event::Confirm, Event::Confirm]);
        let request = learn_request(&steps[2]);
        let (table, candidates) = page_with_rows(5);
        let (s, _) = s.reduce(Event::Learned {
            request,
            result: Ok(LearnResponse {
                success: true,
                learned_params: None,
                table_extraction: Some(table),
                record_candidates: Some(candidates),
            }),
        });
        assert!(!s.record(4).unwrap().was_adjusted);

        let mut fields = BTreeMap::new();
        fields.insert("deceased_name".to_string(), "Late Reply".to_string());
        let (s, _) = s.reduce(Event::Reextracted {
            request: adjust.effects[0].request(),
            index: 4,
            result: Ok(ReextractResponse {
                success: true,
                fields,
                token_count: 2,
            }),
        });
        assert_eq!(s.record(4).unwrap().candidate.fields["deceased_name"], "Paul Green");
    }

    #[test]
    fn superseded_reextract_is_dropped() {
        let (s, _) = run(session(2), vec![Event::StartReview]);
        let (s, first) = s.reduce(Event::BboxChangeEnd {
            index: 0,
            bbox: VisionBBox::new(0.0, 500.0, 900.0, 100.0),
        });
        let (s, _) = s.reduce(Event::BboxChangeEnd {
            index: 0,
            bbox: VisionBBox::new(0.0, 520.0, 900.0, 100.0),
        });
        let mut fields = BTreeMap::new();
        fields.insert("deceased_name".to_string(), "Stale Value".to_string());
        let (s, _) = s.reduce(Event::Reextracted {
            request: first.effects[0].request(),
            index: 0,
            result: Ok(ReextractResponse {
                success: true,
                fields,
                token_count: 1,
            }),
        });
        assert_eq!(s.record(0).unwrap().candidate.fields["deceased_name"], "John Smith");
    }

    #[test]
    fn box_edits_need_page_dimensions() {
        let (mut table, candidates) = page_with_rows(2);
        table.page_dimensions = None;
        let s = ReviewSession::new(7, table, candidates, SessionConfig::default());
        assert_eq!(s.page(), PageDimensions::UNIT);
        let (s, _) = s.reduce(Event::StartReview);
        let (_, step) = s.reduce(Event::BboxChangeEnd {
            index: 0,
            bbox: VisionBBox::new(0.1, 0.1, 0.5, 0.1),
        });
        assert!(step.effects.is_empty());
        assert!(matches!(step.notices[0], Notice::ActionUnavailable { action: "adjustBox", .. }));
    }

    #[test]
    fn cancel_drops_in_flight_results() {
        let config = SessionConfig { learning_threshold: 1 };
        let (table, candidates) = page_with_rows(3);
        let s = ReviewSession::new(7, table, candidates, config);
        let (s, steps) = run(s, vec![Event::StartReview, Event::Confirm, Event::Cancel]);
        assert!(s.is_closed());
        let request = learn_request(&steps[1]);
        let before = s.records().to_vec();
        let (s, step) = s.reduce(Event::Learned {
            request,
            result: Ok(LearnResponse::default()),
        });
        assert_eq!(step, Step::default());
        assert_eq!(s.records(), &before[..]);
    }

    #[test]
    fn auto_extract_seeds_or_reports_nothing() {
        let (s, step) = ReviewSession::awaiting_extraction(7, SessionConfig::default());
        let request = step.effects[0].request();
        assert!(!s.can_start_review());
        let (table, candidates) = page_with_rows(3);
        let (s, step) = s.reduce(Event::Seeded {
            request,
            result: Ok(AutoExtractResponse {
                success: true,
                record_candidates: Some(candidates),
                table_extraction: Some(table),
                cached: false,
            }),
        });
        assert!(step.notices.is_empty());
        assert_eq!(s.records().len(), 3);
        assert!(s.can_start_review());

        let (s, step) = ReviewSession::awaiting_extraction(7, SessionConfig::default());
        let request = step.effects[0].request();
        let (s, step) = s.reduce(Event::Seeded {
            request,
            result: Err(ReviewError::remote("auto-extract", "HTTP 500")),
        });
        assert!(step.notices.contains(&Notice::NoRecordsDetected));
        assert!(s.records().is_empty());
    }

    #[test]
    fn discarding_a_row_reseeds_from_the_reply() {
        let s = session(3);
        let (s, step) = s.reduce(Event::DiscardRow(1));
        let request = match &step.effects[..] {
            [Effect::RejectRow { request, body }] => {
                assert_eq!(body.row_index, 1);
                assert_eq!(body.record_type, RecordType::Funeral);
                *request
            }
            other => panic!("unexpected effects {:?}", other),
        };
        let (table, mut candidates) = page_with_rows(3);
        candidates.candidates.remove(1);
        let (s, _) = s.reduce(Event::RowDiscarded {
            request,
            result: Ok(RejectRowResponse {
                success: true,
                record_candidates: Some(candidates),
                table_extraction: Some(table),
            }),
        });
        assert_eq!(s.records().len(), 2);
        assert_eq!(s.record(1).unwrap().candidate.source_row_index, 2);

        let (s, _) = s.reduce(Event::StartReview);
        let (_, step) = s.reduce(Event::DiscardRow(0));
        assert!(step.effects.is_empty());
    }

    #[test]
    fn claims_follow_selection_and_feed_suggestions() {
        let (s, _) = run(session(3), vec![Event::StartReview]);
        assert_eq!(s.selected().unwrap().index, 0);
        assert_eq!(s.claims().owner_of("John Smith"), Some("deceased_name"));

        // Value already held by deceased_name is not offered for next_of_kin.
        let result = s.suggestions("next_of_kin").unwrap();
        assert!(result.suggestions.iter().all(|x| x.text != "John Smith"));
        let own = s.suggestions("deceased_name").unwrap();
        assert_eq!(own.suggestions[0].text, "John Smith");

        let (s, steps) = run(
            s,
            vec![
                Event::FocusField("next_of_kin".to_string()),
                Event::AssignField {
                    field_key: "next_of_kin".to_string(),
                    value: "John Smith".to_string(),
                },
            ],
        );
        assert_eq!(s.focused_field(), Some("next_of_kin"));
        assert_eq!(
            steps[1].notices,
            vec![Notice::FieldReleased {
                field_key: "deceased_name".to_string()
            }]
        );
        let fields = &s.selected().unwrap().candidate.fields;
        assert!(!fields.contains_key("deceased_name"));
        assert_eq!(fields["next_of_kin"], "John Smith");

        // Moving on resets claims to the next record.
        let (s, _) = s.reduce(Event::Confirm);
        assert_eq!(s.selected().unwrap().index, 1);
        assert_eq!(s.focused_field(), None);
        assert_eq!(s.claims().owner_of("Mary Jones"), Some("deceased_name"));
        assert_eq!(s.claims().owner_of("John Smith"), None);
    }

    #[test]
    fn progress_and_tones() {
        let (s, _) = run(session(4), vec![Event::StartReview, Event::Confirm, Event::Reject]);
        let p = s.progress();
        assert_eq!(
            p,
            Progress {
                total: 4,
                pending: 2,
                confirmed: 1,
                auto_confirmed: 0,
                rejected: 1,
                current_position: Some(3),
            }
        );
        assert_eq!(s.record_tone(0), Some(RecordTone::Accepted));
        assert_eq!(s.record_tone(1), Some(RecordTone::Rejected));
        assert_eq!(s.record_tone(2), Some(RecordTone::Current));
        assert_eq!(s.record_tone(3), Some(RecordTone::Pending));
        assert_eq!(s.record_tone(9), None);
    }
}
