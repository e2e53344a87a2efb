use crate::entities::EntityKind;
use crate::error::ReviewResult;
use crate::types::RecordType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// (field key, expected entity kind).
const FIELD_ENTITY_MAP: &[(&str, EntityKind)] = &[
    ("child_name", EntityKind::Name),
    ("father_name", EntityKind::Name),
    ("mother_name", EntityKind::Name),
    ("godparents", EntityKind::Name),
    ("performed_by", EntityKind::Name),
    ("date_of_birth", EntityKind::Date),
    ("date_of_baptism", EntityKind::Date),
    ("place_of_birth", EntityKind::Address),
    ("address", EntityKind::Address),
    ("groom_name", EntityKind::Name),
    ("bride_name", EntityKind::Name),
    ("witnesses", EntityKind::Name),
    ("officiant", EntityKind::Name),
    ("date_of_marriage", EntityKind::Date),
    ("place_of_marriage", EntityKind::Address),
    ("deceased_name", EntityKind::Name),
    ("next_of_kin", EntityKind::Name),
    ("date_of_death", EntityKind::Date),
    ("date_of_funeral", EntityKind::Date),
    ("date_of_burial", EntityKind::Date),
    ("age_at_death", EntityKind::Number),
    ("cause_of_death", EntityKind::Text),
    ("place_of_burial", EntityKind::Address),
    ("notes", EntityKind::Text),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionHint {
    Left,
    Center,
    Right,
}

impl PositionHint {
    /// Whether a fractional x-center falls in this hint's zone.
    pub fn matches(&self, x_center: f64) -> bool {
        match self {
            PositionHint::Left => x_center < 0.4,
            PositionHint::Right => x_center > 0.6,
            PositionHint::Center => (0.3..=0.7).contains(&x_center),
        }
    }
}

const FIELD_POSITION_HINTS: &[(&str, PositionHint)] = &[
    ("deceased_name", PositionHint::Left),
    ("place_of_burial", PositionHint::Right),
    ("officiant", PositionHint::Right),
    ("age_at_death", PositionHint::Center),
    ("child_name", PositionHint::Left),
    ("performed_by", PositionHint::Right),
    ("groom_name", PositionHint::Left),
    ("bride_name", PositionHint::Left),
];

/// Fields holding exactly one person's name per record.
const SINGLE_NAME_FIELDS: &[(RecordType, &[&str])] = &[
    (RecordType::Baptism, &["child_name"]),
    (RecordType::Marriage, &["groom_name", "bride_name"]),
    (RecordType::Funeral, &["deceased_name"]),
];

/// (field key, default label), in display order.
const BAPTISM_FIELDS: &[(&str, &str)] = &[
    ("child_name", "Child Name"),
    ("date_of_birth", "Date of Birth"),
    ("date_of_baptism", "Date of Baptism"),
    ("place_of_birth", "Place of Birth"),
    ("father_name", "Father's Name"),
    ("mother_name", "Mother's Name"),
    ("address", "Address"),
    ("godparents", "Godparents"),
    ("performed_by", "Performed By"),
    ("notes", "Notes"),
];

const MARRIAGE_FIELDS: &[(&str, &str)] = &[
    ("groom_name", "Groom Name"),
    ("bride_name", "Bride Name"),
    ("date_of_marriage", "Date of Marriage"),
    ("place_of_marriage", "Place of Marriage"),
    ("witnesses", "Witnesses"),
    ("officiant", "Officiant"),
    ("notes", "Notes"),
];

const FUNERAL_FIELDS: &[(&str, &str)] = &[
    ("deceased_name", "Deceased Name"),
    ("date_of_death", "Date of Death"),
    ("date_of_funeral", "Date of Funeral"),
    ("date_of_burial", "Date of Burial"),
    ("place_of_burial", "Place of Burial"),
    ("age_at_death", "Age at Death"),
    ("cause_of_death", "Cause of Death"),
    ("next_of_kin", "Next of Kin"),
    ("officiant", "Officiant"),
    ("notes", "Notes"),
];

/// Expected entity kind for a field; unknown fields are free text.
pub fn expected_kind(field_key: &str) -> EntityKind {
    FIELD_ENTITY_MAP
        .iter()
        .find(|(k, _)| *k == field_key)
        .map(|(_, kind)| *kind)
        .unwrap_or(EntityKind::Text)
}

pub fn position_hint(field_key: &str) -> Option<PositionHint> {
    FIELD_POSITION_HINTS
        .iter()
        .find(|(k, _)| *k == field_key)
        .map(|(_, h)| *h)
}

pub fn single_name_fields(record_type: RecordType) -> &'static [&'static str] {
    SINGLE_NAME_FIELDS
        .iter()
        .find(|(t, _)| *t == record_type)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

fn catalog(record_type: RecordType) -> &'static [(&'static str, &'static str)] {
    match record_type {
        RecordType::Baptism => BAPTISM_FIELDS,
        RecordType::Marriage => MARRIAGE_FIELDS,
        RecordType::Funeral => FUNERAL_FIELDS,
        RecordType::Unknown => &[("notes", "Notes")],
    }
}

/// Host-provided per-field customisation, keyed `"<record type>.<field key>"`
/// or by bare field key to apply across record types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldOverrides {
    pub labels: BTreeMap<String, String>,
    pub hidden: BTreeSet<String>,
    pub sticky_defaults: BTreeMap<String, String>,
}

impl FieldOverrides {
    pub fn from_json_file(path: &Path) -> ReviewResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn lookup<'a, T>(map: &'a BTreeMap<String, T>, record_type: RecordType, key: &str) -> Option<&'a T> {
        map.get(&format!("{}.{}", record_type.as_str(), key))
            .or_else(|| map.get(key))
    }

    fn is_hidden(&self, record_type: RecordType, key: &str) -> bool {
        self.hidden.contains(&format!("{}.{}", record_type.as_str(), key)) || self.hidden.contains(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    pub entity_type: EntityKind,
    pub visible: bool,
    pub default_value: Option<String>,
}

/// Ordered fields for a record type with overrides applied.
pub fn field_list(record_type: RecordType, overrides: &FieldOverrides) -> Vec<FieldSpec> {
    catalog(record_type)
        .iter()
        .map(|(key, label)| FieldSpec {
            key: key.to_string(),
            label: FieldOverrides::lookup(&overrides.labels, record_type, key)
                .cloned()
                .unwrap_or_else(|| label.to_string()),
            entity_type: expected_kind(key),
            visible: !overrides.is_hidden(record_type, key),
            default_value: FieldOverrides::lookup(&overrides.sticky_defaults, record_type, key).cloned(),
        })
        .collect()
}
