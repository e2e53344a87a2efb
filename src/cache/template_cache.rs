use crate::models::LayoutTemplate;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory view of saved layout templates, keyed by `TemplateKey::cache_key`.
#[derive(Debug, Default)]
pub struct TemplateCache {
    inner: RwLock<HashMap<String, LayoutTemplate>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cache_key: &str) -> Option<LayoutTemplate> {
        let guard = self.inner.read().ok()?;
        guard.get(cache_key).cloned()
    }

    pub fn set(&self, template: LayoutTemplate) {
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(template.key.cache_key(), template);
        }
    }

    pub fn invalidate(&self, cache_key: &str) {
        if let Ok(mut guard) = self.inner.write() {
            guard.remove(cache_key);
        }
    }

    /// Drop whichever entry holds template `id`.
    pub fn invalidate_id(&self, id: i64) {
        if let Ok(mut guard) = self.inner.write() {
            guard.retain(|_, t| t.id != id);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            guard.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Orientation;
    use crate::models::{LearnedLayoutParams, TemplateKey};
    use crate::types::RecordType;

    fn template(id: i64, record_type: RecordType) -> LayoutTemplate {
        LayoutTemplate {
            id,
            name: format!("t{}", id),
            key: TemplateKey {
                record_type,
                column_count: 6,
                orientation: Orientation::Landscape,
            },
            params: LearnedLayoutParams::default(),
            remote_id: None,
            saved_at: "2026-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn entries_are_keyed_by_layout() {
        let cache = TemplateCache::new();
        cache.set(template(1, RecordType::Baptism));
        cache.set(template(2, RecordType::Funeral));
        assert_eq!(cache.get("baptism:6:landscape").map(|t| t.id), Some(1));

        cache.invalidate_id(2);
        assert!(cache.get("funeral:6:landscape").is_none());
        cache.clear();
        assert!(cache.get("baptism:6:landscape").is_none());
    }
}
