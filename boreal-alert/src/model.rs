use serde::{Deserialize, Serialize};

use crate::error::{AlertError, AlertResult};
use crate::schema::SchemaVersion;

/// One difference-image detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaSource {
    #[serde(rename = "diaSourceId")]
    pub dia_source_id: i64,
    /// Zero means "not associated", as upstream pipelines emit it.
    #[serde(rename = "diaObjectId", default)]
    pub dia_object_id: Option<i64>,
    #[serde(rename = "ssObjectId", default)]
    pub ss_object_id: Option<i64>,
    #[serde(rename = "midpointMjdTai")]
    pub midpoint_mjd_tai: f64,
    pub ra: f64,
    pub dec: f64,
    #[serde(rename = "psfFlux", default)]
    pub psf_flux: Option<f64>,
    #[serde(rename = "psfFluxErr", default)]
    pub psf_flux_err: Option<f64>,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default)]
    pub band: Option<String>,
}

impl DiaSource {
    pub fn object_id(&self) -> Option<i64> {
        self.dia_object_id.filter(|&id| id != 0)
    }

    pub fn moving_object_id(&self) -> Option<i64> {
        self.ss_object_id.filter(|&id| id != 0)
    }
}

/// Per-object aggregate carried alongside a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaObject {
    #[serde(rename = "diaObjectId")]
    pub dia_object_id: i64,
    pub ra: f64,
    pub dec: f64,
    #[serde(rename = "firstDiaSourceMjdTai", default)]
    pub first_dia_source_mjd_tai: Option<f64>,
    #[serde(rename = "lastDiaSourceMjdTai", default)]
    pub last_dia_source_mjd_tai: Option<f64>,
    #[serde(rename = "nDiaSources", default)]
    pub n_dia_sources: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsSource {
    #[serde(rename = "ssObjectId")]
    pub ss_object_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpcOrb {
    #[serde(rename = "mpcDesignation", default)]
    pub mpc_designation: Option<String>,
}

/// Moving-object identity resolved from a packet.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingObjectRef {
    pub id: i64,
    pub designation: Option<String>,
}

/// A v7-generation packet: no solar-system block beyond the id carried on
/// the detection itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertV7 {
    #[serde(rename = "alertId")]
    pub alert_id: i64,
    #[serde(rename = "diaSource")]
    pub dia_source: DiaSource,
    #[serde(rename = "diaObject", default)]
    pub dia_object: Option<DiaObject>,
}

/// A v9-generation packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertV9 {
    #[serde(rename = "alertId")]
    pub alert_id: i64,
    #[serde(rename = "diaSource")]
    pub dia_source: DiaSource,
    #[serde(rename = "diaObject", default)]
    pub dia_object: Option<DiaObject>,
    #[serde(rename = "ssSource", default)]
    pub ss_source: Option<SsSource>,
    #[serde(default)]
    pub mpcorb: Option<MpcOrb>,
}

/// A decoded alert of any supported generation.
///
/// Serializes untagged, i.e. back to the packet shape of its generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AlertRecord {
    V7_1(AlertV7),
    V9_0(AlertV9),
}

impl AlertRecord {
    /// Single deserialization entry point, parameterized by generation.
    pub fn decode(version: SchemaVersion, payload: &[u8]) -> AlertResult<Self> {
        match version {
            SchemaVersion::V7_1 => serde_json::from_slice(payload)
                .map(AlertRecord::V7_1)
                .map_err(AlertError::Decode),
            SchemaVersion::V9_0 => serde_json::from_slice(payload)
                .map(AlertRecord::V9_0)
                .map_err(AlertError::Decode),
        }
    }

    pub fn version(&self) -> SchemaVersion {
        match self {
            AlertRecord::V7_1(_) => SchemaVersion::V7_1,
            AlertRecord::V9_0(_) => SchemaVersion::V9_0,
        }
    }

    pub fn alert_id(&self) -> i64 {
        match self {
            AlertRecord::V7_1(alert) => alert.alert_id,
            AlertRecord::V9_0(alert) => alert.alert_id,
        }
    }

    pub fn dia_source(&self) -> &DiaSource {
        match self {
            AlertRecord::V7_1(alert) => &alert.dia_source,
            AlertRecord::V9_0(alert) => &alert.dia_source,
        }
    }

    pub fn dia_object(&self) -> Option<&DiaObject> {
        match self {
            AlertRecord::V7_1(alert) => alert.dia_object.as_ref(),
            AlertRecord::V9_0(alert) => alert.dia_object.as_ref(),
        }
    }

    /// The moving-object identity, if the detection is associated with one.
    ///
    /// v9 packets may carry an MPC designation; earlier generations never
    /// name the object beyond its id.
    pub fn moving_object(&self) -> Option<MovingObjectRef> {
        let id = match self {
            AlertRecord::V9_0(alert) => alert
                .ss_source
                .as_ref()
                .map(|s| s.ss_object_id)
                .or_else(|| self.dia_source().moving_object_id()),
            AlertRecord::V7_1(_) => self.dia_source().moving_object_id(),
        }?;
        let designation = match self {
            AlertRecord::V9_0(alert) => alert
                .mpcorb
                .as_ref()
                .and_then(|orb| orb.mpc_designation.clone()),
            AlertRecord::V7_1(_) => None,
        };
        Some(MovingObjectRef { id, designation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v9_payload() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "alertId": 7,
            "diaSource": {
                "diaSourceId": 700,
                "diaObjectId": 0,
                "ssObjectId": 31,
                "midpointMjdTai": 60500.5,
                "ra": 150.0,
                "dec": 2.2,
                "band": "g"
            },
            "ssSource": {"ssObjectId": 31},
            "mpcorb": {"mpcDesignation": "2024 AB1"}
        }))
        .expect("encode")
    }

    #[test]
    fn decode_dispatches_on_generation() {
        let record = AlertRecord::decode(SchemaVersion::V9_0, &v9_payload()).expect("decode");
        assert_eq!(record.version(), SchemaVersion::V9_0);
        assert_eq!(record.alert_id(), 7);
        assert_eq!(record.dia_source().dia_source_id, 700);
    }

    #[test]
    fn zero_object_ids_mean_unassociated() {
        let record = AlertRecord::decode(SchemaVersion::V9_0, &v9_payload()).expect("decode");
        assert_eq!(record.dia_source().object_id(), None);
        assert_eq!(record.dia_source().moving_object_id(), Some(31));
    }

    #[test]
    fn v9_moving_object_carries_the_designation() {
        let record = AlertRecord::decode(SchemaVersion::V9_0, &v9_payload()).expect("decode");
        let moving = record.moving_object().expect("moving object");
        assert_eq!(moving.id, 31);
        assert_eq!(moving.designation.as_deref(), Some("2024 AB1"));
    }

    #[test]
    fn v7_moving_object_is_anonymous() {
        let payload = serde_json::to_vec(&serde_json::json!({
            "alertId": 8,
            "diaSource": {
                "diaSourceId": 800,
                "ssObjectId": 44,
                "midpointMjdTai": 60400.0,
                "ra": 10.0,
                "dec": -5.0
            }
        }))
        .expect("encode");
        let record = AlertRecord::decode(SchemaVersion::V7_1, &payload).expect("decode");
        let moving = record.moving_object().expect("moving object");
        assert_eq!(moving.id, 44);
        assert_eq!(moving.designation, None);
    }

    #[test]
    fn serialization_keeps_the_packet_shape() {
        let record = AlertRecord::decode(SchemaVersion::V9_0, &v9_payload()).expect("decode");
        let encoded = serde_json::to_value(&record).expect("encode");
        assert!(encoded.get("diaSource").is_some());
        assert!(encoded.get("V9_0").is_none(), "untagged serialization expected");
    }
}
