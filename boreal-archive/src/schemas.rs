use std::collections::HashMap;

use parking_lot::RwLock;

use boreal_alert::SchemaVersion;

/// Process-local schema-id cache. Registered schemas are immutable, so
/// entries are never invalidated.
#[derive(Default)]
pub struct SchemaCache {
    versions: RwLock<HashMap<i32, SchemaVersion>>,
}

impl SchemaCache {
    pub fn get(&self, id: i32) -> Option<SchemaVersion> {
        self.versions.read().get(&id).copied()
    }

    pub fn insert(&self, id: i32, version: SchemaVersion) {
        self.versions.write().entry(id).or_insert(version);
    }
}
