use serde::Deserialize;

use crate::error::{AlertError, AlertResult};

/// Supported alert packet generations.
///
/// Registry schema ids are opaque integers assigned by the broker's
/// schema registry; the generation is recovered from the registered
/// schema document itself (its record name carries the namespace, e.g.
/// `lsst.v9_0.alert`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaVersion {
    V7_1,
    V9_0,
}

impl SchemaVersion {
    pub const ALL: [SchemaVersion; 2] = [SchemaVersion::V7_1, SchemaVersion::V9_0];

    /// Recover the generation from a registered schema document.
    pub fn from_schema_document(content: &str) -> AlertResult<Self> {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            namespace: Option<String>,
        }

        let doc: Doc = serde_json::from_str(content).map_err(AlertError::Decode)?;
        let qualified = format!(
            "{}.{}",
            doc.namespace.as_deref().unwrap_or_default(),
            doc.name.as_deref().unwrap_or_default()
        );
        if qualified.contains("v9_0") {
            Ok(SchemaVersion::V9_0)
        } else if qualified.contains("v7_1") {
            Ok(SchemaVersion::V7_1)
        } else {
            Err(AlertError::UnknownSchema(qualified))
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaVersion::V7_1 => f.write_str("v7_1"),
            SchemaVersion::V9_0 => f.write_str("v9_0"),
        }
    }
}
