//! Translation of the outward query surface into the fixed condition set
//! both index backends evaluate.

use boreal_spatial::{angular_separation, cone_to_ranges, scale_ranges, STORAGE_NSIDE};

use crate::models::AlertRow;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeConstraint {
    pub ra: f64,
    pub dec: f64,
    /// Search radius in degrees.
    pub radius: f64,
}

/// Half-open time window on the detection timestamp (MJD TAI): `since` is
/// inclusive, `before` exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeConstraint {
    pub since: Option<f64>,
    pub before: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertQuery {
    pub include_columns: Vec<String>,
    pub exclude_columns: Vec<String>,
    pub object_id: Option<i64>,
    pub cone: Option<ConeConstraint>,
    pub time: Option<TimeConstraint>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub order: Order,
}

impl AlertQuery {
    /// Compile to the condition set the backends evaluate. A cone becomes a
    /// storage-resolution cell-id range OR-chain (over-approximate cover)
    /// plus the exact separation predicate applied after the index scan.
    pub fn compile(&self) -> CompiledConditions {
        let cell_ranges = self.cone.map(|cone| {
            let (nside, ranges) = cone_to_ranges(cone.ra, cone.dec, cone.radius, STORAGE_NSIDE);
            scale_ranges(&ranges, nside, STORAGE_NSIDE)
        });
        CompiledConditions {
            object_id: self.object_id,
            cone: self.cone,
            cell_ranges,
            time: self.time,
            limit: self.limit,
            offset: self.offset,
            order: self.order,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledConditions {
    pub object_id: Option<i64>,
    pub cone: Option<ConeConstraint>,
    /// Disjoint half-open cell-id ranges at the storage resolution.
    pub cell_ranges: Option<Vec<(i64, i64)>>,
    pub time: Option<TimeConstraint>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub order: Order,
}

impl CompiledConditions {
    /// Full predicate over one stored alert row, cell cover and exact
    /// separation included.
    pub fn matches(&self, alert: &AlertRow) -> bool {
        if let Some(object_id) = self.object_id {
            if alert.object_id != Some(object_id) {
                return false;
            }
        }
        if let Some(ranges) = &self.cell_ranges {
            if !ranges
                .iter()
                .any(|&(lo, hi)| lo <= alert.cell_id && alert.cell_id < hi)
            {
                return false;
            }
        }
        if let Some(time) = self.time {
            if time.since.is_some_and(|since| alert.timestamp < since) {
                return false;
            }
            if time.before.is_some_and(|before| alert.timestamp >= before) {
                return false;
            }
        }
        self.cone_matches(alert.ra, alert.dec)
    }

    /// The exact part of the cone predicate, applied to rows the cell-range
    /// scan already admitted.
    pub fn cone_matches(&self, ra: f64, dec: f64) -> bool {
        match self.cone {
            Some(cone) => angular_separation(cone.ra, cone.dec, ra, dec) < cone.radius,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(id: i64, cell_id: i64, ra: f64, dec: f64, timestamp: f64) -> AlertRow {
        AlertRow {
            id,
            object_id: Some(1),
            moving_object_id: None,
            timestamp,
            ra,
            dec,
            cell_id,
            blob_id: 1,
            blob_start: 0,
            blob_end: 1,
        }
    }

    #[test]
    fn cone_query_compiles_to_storage_resolution_ranges() {
        let query = AlertQuery {
            cone: Some(ConeConstraint {
                ra: 120.0,
                dec: 0.0,
                radius: 0.5,
            }),
            ..Default::default()
        };
        let compiled = query.compile();
        let ranges = compiled.cell_ranges.as_ref().expect("ranges");
        assert!(!ranges.is_empty());
        for pair in ranges.windows(2) {
            assert!(pair[0].1 < pair[1].0, "ranges not disjoint: {pair:?}");
        }

        let cell = boreal_spatial::cell_id(120.0, 0.0, STORAGE_NSIDE);
        let center = alert(1, cell, 120.0, 0.0, 60000.0);
        assert!(compiled.matches(&center));

        let far = alert(2, cell, 121.0, 0.0, 60000.0);
        assert!(!compiled.matches(&far), "outside the radius");
    }

    #[test]
    fn time_window_is_inclusive_below_and_exclusive_above() {
        let query = AlertQuery {
            time: Some(TimeConstraint {
                since: Some(60000.0),
                before: Some(60010.0),
            }),
            ..Default::default()
        };
        let compiled = query.compile();
        assert!(compiled.matches(&alert(1, 0, 0.0, 0.0, 60000.0)));
        assert!(compiled.matches(&alert(2, 0, 0.0, 0.0, 60009.999)));
        assert!(!compiled.matches(&alert(3, 0, 0.0, 0.0, 60010.0)));
        assert!(!compiled.matches(&alert(4, 0, 0.0, 0.0, 59999.999)));
    }

    #[test]
    fn object_constraint_rejects_other_objects() {
        let query = AlertQuery {
            object_id: Some(1),
            ..Default::default()
        };
        let compiled = query.compile();
        assert!(compiled.matches(&alert(1, 0, 0.0, 0.0, 60000.0)));
        let mut other = alert(2, 0, 0.0, 0.0, 60000.0);
        other.object_id = Some(2);
        assert!(!compiled.matches(&other));
        other.object_id = None;
        assert!(!compiled.matches(&other));
    }
}
