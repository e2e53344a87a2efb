use crate::cache::TemplateCache;
use crate::coords::Orientation;
use crate::error::{ReviewError, ReviewResult};
use crate::models::{LayoutTemplate, LearnedLayoutParams, TemplateKey};
use crate::types::RecordType;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Saved layout templates, one per `TemplateKey`.
pub struct TemplateStore {
    conn: Mutex<Connection>,
    cache: TemplateCache,
}

const SELECT_TEMPLATE: &str = "SELECT id, name, record_type, column_count, orientation, params_json, remote_id, saved_at
     FROM layout_templates";

impl TemplateStore {
    pub fn open(db_path: &Path) -> ReviewResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> ReviewResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ReviewResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS layout_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cache_key TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                record_type TEXT NOT NULL,
                column_count INTEGER NOT NULL,
                orientation TEXT NOT NULL,
                params_json TEXT NOT NULL,
                remote_id TEXT,
                saved_at TEXT NOT NULL
            );
            ",
        )?;

        // Migration 002: usage tracking for template lookups
        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .unwrap_or(1);
        if current_version < 2 {
            conn.execute_batch(
                "
                ALTER TABLE layout_templates ADD COLUMN usage_count INTEGER DEFAULT 0;
                ALTER TABLE layout_templates ADD COLUMN last_used TEXT;
                ",
            )?;
            conn.execute("UPDATE schema_version SET version = 2", [])?;
            tracing::info!("layout template store migrated to version 2");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            cache: TemplateCache::new(),
        })
    }

    fn lock(&self) -> ReviewResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ReviewError::Runtime(format!("template store poisoned: {}", e)))
    }

    /// Insert or replace the template for `key`; returns its row id.
    pub fn save_template(
        &self,
        name: &str,
        key: &TemplateKey,
        params: &LearnedLayoutParams,
        remote_id: Option<&str>,
    ) -> ReviewResult<i64> {
        let cache_key = key.cache_key();
        let params_json = serde_json::to_string(params)?;
        let now = chrono::Utc::now().to_rfc3339();
        let id = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO layout_templates
                 (cache_key, name, record_type, column_count, orientation, params_json, remote_id, saved_at, usage_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
                 ON CONFLICT(cache_key) DO UPDATE SET
                   name = excluded.name,
                   params_json = excluded.params_json,
                   remote_id = COALESCE(excluded.remote_id, remote_id),
                   saved_at = excluded.saved_at",
                params![
                    cache_key,
                    name,
                    key.record_type.as_str(),
                    key.column_count as i64,
                    key.orientation.as_str(),
                    params_json,
                    remote_id,
                    now,
                ],
            )?;
            conn.query_row(
                "SELECT id FROM layout_templates WHERE cache_key = ?1",
                params![cache_key],
                |r| r.get::<_, i64>(0),
            )?
        };
        self.cache.invalidate(&cache_key);
        tracing::info!(id, cache_key = %cache_key, name, "layout template saved");
        Ok(id)
    }

    /// Template for `key`, if one was saved. Counts as a use.
    pub fn find_template(&self, key: &TemplateKey) -> ReviewResult<Option<LayoutTemplate>> {
        let cache_key = key.cache_key();
        let found = match self.cache.get(&cache_key) {
            Some(t) => Some(t),
            None => {
                let conn = self.lock()?;
                let loaded = conn
                    .query_row(
                        &format!("{} WHERE cache_key = ?1", SELECT_TEMPLATE),
                        params![cache_key],
                        template_from_row,
                    )
                    .optional()?;
                drop(conn);
                let loaded = loaded.map(|raw| raw.into_template()).transpose()?;
                if let Some(t) = &loaded {
                    self.cache.set(t.clone());
                }
                loaded
            }
        };
        if let Some(t) = &found {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE layout_templates SET usage_count = usage_count + 1, last_used = ?1 WHERE id = ?2",
                params![chrono::Utc::now().to_rfc3339(), t.id],
            )?;
        }
        Ok(found)
    }

    /// Most recently saved first.
    pub fn list_templates(&self) -> ReviewResult<Vec<LayoutTemplate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY saved_at DESC, id DESC", SELECT_TEMPLATE))?;
        let rows = stmt.query_map([], template_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_template()?);
        }
        Ok(out)
    }

    pub fn usage_count(&self, id: i64) -> ReviewResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COALESCE(usage_count, 0) FROM layout_templates WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?)
    }

    /// Returns whether a template was removed.
    pub fn delete_template(&self, id: i64) -> ReviewResult<bool> {
        let removed = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM layout_templates WHERE id = ?1", params![id])?
        };
        self.cache.invalidate_id(id);
        Ok(removed > 0)
    }

    pub fn clear_templates(&self) -> ReviewResult<usize> {
        let removed = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM layout_templates", [])?
        };
        self.cache.clear();
        Ok(removed)
    }
}

struct RawTemplate {
    id: i64,
    name: String,
    record_type: String,
    column_count: i64,
    orientation: String,
    params_json: String,
    remote_id: Option<String>,
    saved_at: String,
}

fn template_from_row(r: &Row<'_>) -> rusqlite::Result<RawTemplate> {
    Ok(RawTemplate {
        id: r.get(0)?,
        name: r.get(1)?,
        record_type: r.get(2)?,
        column_count: r.get(3)?,
        orientation: r.get(4)?,
        params_json: r.get(5)?,
        remote_id: r.get(6)?,
        saved_at: r.get(7)?,
    })
}

impl RawTemplate {
    fn into_template(self) -> ReviewResult<LayoutTemplate> {
        Ok(LayoutTemplate {
            id: self.id,
            name: self.name,
            key: TemplateKey {
                record_type: RecordType::parse(&self.record_type),
                column_count: self.column_count.max(0) as usize,
                orientation: Orientation::parse(&self.orientation),
            },
            params: serde_json::from_str(&self.params_json)?,
            remote_id: self.remote_id,
            saved_at: self.saved_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn key(record_type: RecordType) -> TemplateKey {
        TemplateKey {
            record_type,
            column_count: 7,
            orientation: Orientation::Landscape,
        }
    }

    fn params(confidence: f64) -> LearnedLayoutParams {
        let mut column_bands = BTreeMap::new();
        column_bands.insert("col_1".to_string(), [0.02, 0.18]);
        LearnedLayoutParams {
            avg_row_height: 0.03,
            avg_row_spacing: 0.05,
            header_y_threshold: 0.12,
            merge_threshold: 0.036,
            column_bands,
            confidence,
        }
    }

    #[test]
    fn save_is_upsert_by_layout_key() {
        let store = TemplateStore::open_in_memory().unwrap();
        let first = store.save_template("Funerals 1950", &key(RecordType::Funeral), &params(0.5), None).unwrap();
        let again = store
            .save_template("Funerals 1950 v2", &key(RecordType::Funeral), &params(0.9), Some("88"))
            .unwrap();
        assert_eq!(first, again);

        let t = store.find_template(&key(RecordType::Funeral)).unwrap().unwrap();
        assert_eq!(t.name, "Funerals 1950 v2");
        assert_eq!(t.params.confidence, 0.9);
        assert_eq!(t.params.column_bands["col_1"], [0.02, 0.18]);
        assert_eq!(t.remote_id.as_deref(), Some("88"));
        assert!(store.find_template(&key(RecordType::Baptism)).unwrap().is_none());
    }

    #[test]
    fn lookups_are_counted_even_when_cached() {
        let store = TemplateStore::open_in_memory().unwrap();
        let id = store.save_template("b", &key(RecordType::Baptism), &params(0.5), None).unwrap();
        store.find_template(&key(RecordType::Baptism)).unwrap();
        store.find_template(&key(RecordType::Baptism)).unwrap();
        assert_eq!(store.usage_count(id).unwrap(), 2);
    }

    #[test]
    fn delete_and_clear_invalidate_cache() {
        let store = TemplateStore::open_in_memory().unwrap();
        let id = store.save_template("m", &key(RecordType::Marriage), &params(0.5), None).unwrap();
        store.save_template("f", &key(RecordType::Funeral), &params(0.5), None).unwrap();
        assert!(store.find_template(&key(RecordType::Marriage)).unwrap().is_some());

        assert!(store.delete_template(id).unwrap());
        assert!(!store.delete_template(id).unwrap());
        assert!(store.find_template(&key(RecordType::Marriage)).unwrap().is_none());
        assert_eq!(store.list_templates().unwrap().len(), 1);

        assert_eq!(store.clear_templates().unwrap(), 1);
        assert!(store.find_template(&key(RecordType::Funeral)).unwrap().is_none());
    }

    #[test]
    fn reopening_a_file_keeps_templates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("layout_templates.db");
        {
            let store = TemplateStore::open(&path).unwrap();
            store.save_template("b", &key(RecordType::Baptism), &params(0.7), None).unwrap();
        }
        let store = TemplateStore::open(&path).unwrap();
        let all = store.list_templates().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, key(RecordType::Baptism));
    }
}
