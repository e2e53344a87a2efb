use crate::bbox_editor::{EditorConfig, DEFAULT_HIT_RADIUS, DEFAULT_MIN_SIZE};
use crate::error::{ReviewError, ReviewResult};
use crate::fields::FieldOverrides;
use crate::learning::DEFAULT_LEARNING_THRESHOLD;
use crate::review::SessionConfig;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewConfig {
    pub api_url: Option<String>,
    pub church_id: Option<i64>,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub learning_threshold: usize,
    pub editor: EditorConfig,
    pub template_db: PathBuf,
    pub field_overrides_path: Option<PathBuf>,
}

pub fn default_template_db() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("record-review")
        .join("layout_templates.db")
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            church_id: None,
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            learning_threshold: DEFAULT_LEARNING_THRESHOLD,
            editor: EditorConfig {
                hit_radius: DEFAULT_HIT_RADIUS,
                min_width: DEFAULT_MIN_SIZE,
                min_height: DEFAULT_MIN_SIZE,
            },
            template_db: default_template_db(),
            field_overrides_path: None,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> ReviewResult<Option<T>> {
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ReviewError::Config(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(None),
    }
}

impl ReviewConfig {
    /// Defaults overlaid with `.env` and process environment.
    pub fn from_env() -> ReviewResult<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let learning_threshold: usize =
            parsed("RECORD_REVIEW_LEARNING_THRESHOLD")?.unwrap_or(defaults.learning_threshold);
        if learning_threshold == 0 {
            return Err(ReviewError::Config(
                "RECORD_REVIEW_LEARNING_THRESHOLD must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            api_url: var("RECORD_REVIEW_API_URL"),
            church_id: parsed("RECORD_REVIEW_CHURCH_ID")?,
            api_token: var("RECORD_REVIEW_API_TOKEN"),
            timeout: parsed::<u64>("RECORD_REVIEW_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            learning_threshold,
            editor: EditorConfig {
                hit_radius: parsed("RECORD_REVIEW_HANDLE_RADIUS")?.unwrap_or(defaults.editor.hit_radius),
                min_width: parsed("RECORD_REVIEW_MIN_BOX_WIDTH")?.unwrap_or(defaults.editor.min_width),
                min_height: parsed("RECORD_REVIEW_MIN_BOX_HEIGHT")?.unwrap_or(defaults.editor.min_height),
            },
            template_db: var("RECORD_REVIEW_TEMPLATE_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_db),
            field_overrides_path: var("RECORD_REVIEW_FIELD_OVERRIDES").map(PathBuf::from),
        })
    }

    /// Overrides from `field_overrides_path`, or none configured.
    pub fn load_field_overrides(&self) -> ReviewResult<FieldOverrides> {
        match &self.field_overrides_path {
            Some(path) => FieldOverrides::from_json_file(path),
            None => Ok(FieldOverrides::default()),
        }
    }
}

impl From<&ReviewConfig> for SessionConfig {
    fn from(config: &ReviewConfig) -> Self {
        Self {
            learning_threshold: config.learning_threshold,
        }
    }
}
