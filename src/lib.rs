pub mod backend;
pub mod bbox_editor;
pub mod cache;
pub mod commands;
pub mod config;
pub mod coords;
pub mod db;
pub mod entities;
pub mod error;
pub mod fields;
pub mod learning;
pub mod logging;
pub mod models;
pub mod review;
pub mod suggestions;
pub mod types;

pub use backend::{HttpReviewBackend, ReviewBackend};
pub use bbox_editor::{BoxEditor, EditorConfig, PointerSession, ResizeHandle};
pub use config::ReviewConfig;
pub use coords::{FractionalBBox, PageDimensions, VisionBBox, ViewportMetrics};
pub use db::TemplateStore;
pub use entities::{DetectedEntity, EntityDetector, EntityKind};
pub use error::{ReviewError, ReviewResult};
pub use models::{LayoutTemplate, LearnedLayoutParams, TemplateKey};
pub use review::{Event, Notice, Phase, ReviewController, ReviewSession, SessionConfig};
pub use suggestions::{compute_field_suggestions, SuggestionResult, SuggestionScorer};
pub use types::{CandidateSet, RecordStatus, RecordType, ReviewableRecord, TableExtraction};
