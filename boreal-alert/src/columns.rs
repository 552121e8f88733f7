//! Column registry for projection validation.
//!
//! Query callers may ask for a subset of packet columns by name. The set of
//! valid names depends on the packet generation, so each generation gets its
//! own registry, built once on first use and never invalidated.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::error::{AlertError, AlertResult};
use crate::schema::SchemaVersion;

const COMMON_COLUMNS: &[&str] = &[
    "alertId",
    "diaSource.diaSourceId",
    "diaSource.diaObjectId",
    "diaSource.ssObjectId",
    "diaSource.midpointMjdTai",
    "diaSource.ra",
    "diaSource.dec",
    "diaSource.psfFlux",
    "diaSource.psfFluxErr",
    "diaSource.snr",
    "diaSource.band",
    "diaObject.diaObjectId",
    "diaObject.ra",
    "diaObject.dec",
    "diaObject.firstDiaSourceMjdTai",
    "diaObject.lastDiaSourceMjdTai",
    "diaObject.nDiaSources",
];

const V9_COLUMNS: &[&str] = &["ssSource.ssObjectId", "mpcorb.mpcDesignation"];

lazy_static! {
    static ref REGISTRY: RwLock<HashMap<SchemaVersion, Arc<BTreeSet<&'static str>>>> =
        RwLock::new(HashMap::new());
}

fn build(version: SchemaVersion) -> BTreeSet<&'static str> {
    let mut columns: BTreeSet<&'static str> = COMMON_COLUMNS.iter().copied().collect();
    if version == SchemaVersion::V9_0 {
        columns.extend(V9_COLUMNS.iter().copied());
    }
    columns
}

/// The valid column names for a packet generation.
pub fn known_columns(version: SchemaVersion) -> Arc<BTreeSet<&'static str>> {
    if let Some(columns) = REGISTRY.read().get(&version) {
        return Arc::clone(columns);
    }
    let mut registry = REGISTRY.write();
    Arc::clone(
        registry
            .entry(version)
            .or_insert_with(|| Arc::new(build(version))),
    )
}

/// Reject a projection that names a column the generation does not have.
pub fn validate_projection(
    version: SchemaVersion,
    include: &[String],
    exclude: &[String],
) -> AlertResult<()> {
    let columns = known_columns(version);
    for name in include.iter().chain(exclude) {
        if !columns.contains(name.as_str()) {
            return Err(AlertError::UnknownColumn {
                column: name.clone(),
                version,
            });
        }
    }
    Ok(())
}
