use crate::bbox_editor::BoxEditor;
use crate::config::ReviewConfig;
use crate::coords::{Orientation, PageDimensions, VisionBBox};
use crate::db::TemplateStore;
use crate::entities::{self, DetectedEntity};
use crate::fields::{field_list, FieldOverrides, FieldSpec};
use crate::models::{LayoutTemplate, TemplateKey};
use crate::review::SessionConfig;
use crate::suggestions::{compute_field_suggestions, SuggestionResult};
use crate::types::{RecordType, TableExtraction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub struct AppState {
    pub templates: Mutex<Option<TemplateStore>>,
    pub overrides: FieldOverrides,
    pub config: ReviewConfig,
}

impl AppState {
    pub fn from_config(config: ReviewConfig) -> Result<Self, String> {
        let store = TemplateStore::open(&config.template_db).map_err(|e| e.to_string())?;
        let overrides = config.load_field_overrides().map_err(|e| e.to_string())?;
        Ok(Self {
            templates: Mutex::new(Some(store)),
            overrides,
            config,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::from(&self.config)
    }

    /// Editor for one record's box, with the configured handle radius and minimum size.
    pub fn box_editor(&self, bbox: Option<VisionBBox>, page: PageDimensions) -> BoxEditor {
        BoxEditor::new(bbox, page, self.config.editor)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSuggestionsPayload {
    pub field_key: String,
    #[serde(default)]
    pub record_type: RecordType,
    pub table_extraction: TableExtraction,
    pub source_row_index: i64,
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub used_values: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateLookupPayload {
    pub record_type: RecordType,
    pub column_count: usize,
    pub orientation: String,
}

fn with_store<T>(state: &AppState, f: impl FnOnce(&TemplateStore) -> Result<T, String>) -> Result<T, String> {
    let guard = state.templates.lock().map_err(|e| e.to_string())?;
    let store = guard.as_ref().ok_or("Template store not initialized")?;
    f(store)
}

pub fn get_service_status(state: &AppState) -> ServiceStatus {
    let missing = match (&state.config.api_url, state.config.church_id) {
        (None, _) => Some("RECORD_REVIEW_API_URL".to_string()),
        (_, None) => Some("RECORD_REVIEW_CHURCH_ID".to_string()),
        _ => None,
    };
    ServiceStatus {
        configured: missing.is_none(),
        missing,
    }
}

pub fn get_field_list(state: &AppState, record_type: String) -> Vec<FieldSpec> {
    field_list(RecordType::parse(&record_type), &state.overrides)
}

pub fn detect_entities(text: String) -> Vec<DetectedEntity> {
    entities::detect(&text)
}

pub fn get_field_suggestions(payload: FieldSuggestionsPayload) -> Result<SuggestionResult, String> {
    if payload.field_key.trim().is_empty() {
        return Err("Field key is required".to_string());
    }
    let cells = payload.table_extraction.cells_for_rows(&[payload.source_row_index]);
    Ok(compute_field_suggestions(
        &payload.field_key,
        payload.record_type,
        &cells,
        &payload.column_mapping,
        &payload.used_values,
    ))
}

pub fn find_layout_template(state: &AppState, payload: TemplateLookupPayload) -> Result<Option<LayoutTemplate>, String> {
    let key = TemplateKey {
        record_type: payload.record_type,
        column_count: payload.column_count,
        orientation: Orientation::parse(&payload.orientation),
    };
    with_store(state, |store| store.find_template(&key).map_err(|e| e.to_string()))
}

pub fn list_layout_templates(state: &AppState) -> Result<Vec<LayoutTemplate>, String> {
    with_store(state, |store| store.list_templates().map_err(|e| e.to_string()))
}

pub fn delete_layout_template(state: &AppState, id: i64) -> Result<(), String> {
    with_store(state, |store| {
        if store.delete_template(id).map_err(|e| e.to_string())? {
            Ok(())
        } else {
            Err(format!("Layout template {} not found", id))
        }
    })
}

pub fn clear_layout_templates(state: &AppState) -> Result<usize, String> {
    with_store(state, |store| store.clear_templates().map_err(|e| e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LearnedLayoutParams;

    fn state() -> AppState {
        AppState {
            templates: Mutex::new(Some(TemplateStore::open_in_memory().unwrap())),
            overrides: FieldOverrides::default(),
            config: ReviewConfig::default(),
        }
    }

    #[test]
    fn status_names_first_missing_setting() {
        let mut s = state();
        assert_eq!(get_service_status(&s).missing.as_deref(), Some("RECORD_REVIEW_API_URL"));
        s.config.api_url = Some("http://localhost:3001".to_string());
        s.config.church_id = Some(46);
        assert!(get_service_status(&s).configured);
    }

    #[test]
    fn suggestions_payload_reads_wire_shape() {
        let payload: FieldSuggestionsPayload = serde_json::from_str(
            r#"{"fieldKey":"child_name","recordType":"baptism","sourceRowIndex":0,
                "tableExtraction":{"tables":[{"rows":[{"row_index":0,"cells":[
                    {"content":"Anna Kowalska","column_index":0,"bbox":[0.02,0.3,0.2,0.33]},
                    {"content":"03/02/1961","column_index":1,"bbox":[0.25,0.3,0.35,0.33]}]}]}]}}"#,
        )
        .unwrap();
        let result = get_field_suggestions(payload).unwrap();
        assert_eq!(result.suggestions[0].text, "Anna Kowalska");
        assert_eq!(result.field_key, "child_name");
    }

    #[test]
    fn template_commands_go_through_store() {
        let s = state();
        with_store(&s, |store| {
            let key = TemplateKey {
                record_type: RecordType::Marriage,
                column_count: 8,
                orientation: Orientation::Landscape,
            };
            store
                .save_template("Marriages", &key, &LearnedLayoutParams::default(), None)
                .map_err(|e| e.to_string())
        })
        .unwrap();

        let found = find_layout_template(
            &s,
            TemplateLookupPayload {
                record_type: RecordType::Marriage,
                column_count: 8,
                orientation: "landscape".to_string(),
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(found.name, "Marriages");
        assert_eq!(list_layout_templates(&s).unwrap().len(), 1);
        assert!(delete_layout_template(&s, found.id).is_ok());
        assert!(delete_layout_template(&s, found.id).is_err());
        assert_eq!(clear_layout_templates(&s).unwrap(), 0);
    }

    #[test]
    fn session_and_editor_follow_configuration() {
        let mut s = state();
        s.config.learning_threshold = 5;
        s.config.editor.min_width = 300.0;
        assert_eq!(s.session_config().learning_threshold, 5);

        let page = PageDimensions::new(2000.0, 3000.0);
        let editor = s.box_editor(Some(VisionBBox::new(100.0, 100.0, 400.0, 200.0)), page);
        assert_eq!(editor.config().min_width, 300.0);
    }

    #[test]
    fn missing_store_is_reported() {
        let s = AppState {
            templates: Mutex::new(None),
            overrides: FieldOverrides::default(),
            config: ReviewConfig::default(),
        };
        assert_eq!(list_layout_templates(&s).unwrap_err(), "Template store not initialized");
    }
}
