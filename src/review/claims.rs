use std::collections::BTreeMap;

/// Which literal value fills which field of the open record. One value, one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimMap {
    by_value: BTreeMap<String, String>,
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl ClaimMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims built from a record's non-empty fields.
    pub fn seeded_from(fields: &BTreeMap<String, String>) -> Self {
        let mut map = Self::new();
        for (field, value) in fields {
            map.claim(field, value);
        }
        map
    }

    /// Give `value` to `field_key`. The field's previous value is released and
    /// whichever field held `value` before loses it; that field key is returned.
    pub fn claim(&mut self, field_key: &str, value: &str) -> Option<String> {
        self.release_field(field_key);
        let key = normalize(value);
        if key.is_empty() {
            return None;
        }
        self.by_value
            .insert(key, field_key.to_string())
            .filter(|previous| previous != field_key)
    }

    pub fn release_field(&mut self, field_key: &str) {
        self.by_value.retain(|_, f| f.as_str() != field_key);
    }

    pub fn owner_of(&self, value: &str) -> Option<&str> {
        self.by_value.get(&normalize(value)).map(String::as_str)
    }

    /// Values held by every field except `field_key`, for suggestion filtering.
    pub fn used_values_excluding(&self, field_key: &str) -> Vec<String> {
        self.by_value
            .iter()
            .filter(|(_, f)| f.as_str() != field_key)
            .map(|(v, _)| v.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.by_value.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }
}
