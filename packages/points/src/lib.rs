#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Normalized time-series points and the sinks that store them.
//!
//! A [`NormalizedPoint`] is the terminal artifact of a pipeline run: one
//! measurement for one area on one date, carrying raw and per-capita
//! values. Points are built by the [`normalize::Normalizer`] and handed
//! to a [`sink::TimeSeriesSink`].

pub mod line_protocol;
pub mod normalize;
pub mod sink;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Administrative area type, used as the `areaKind` tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum AreaKind {
    /// Lower-tier local authority.
    Ltla,
    /// Upper-tier local authority.
    Utla,
    /// Region.
    Region,
    /// Nation.
    Nation,
}

/// Measurement name of a point.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum Measurement {
    /// Daily confirmed cases for an area.
    ConfirmedCases,
    /// Hospital metrics of one facility, attributed to the area containing
    /// it.
    HospitalObservations,
}

/// One field of a point: a raw value and its per-capita counterpart.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Field name of the raw value (e.g. `"daily"`). The per-capita field
    /// is named `{name}Per100k`.
    pub name: &'static str,
    /// Raw value.
    pub raw: f64,
    /// Value per 100 000 residents. `None` when the area's population is
    /// unknown.
    pub per_capita: Option<f64>,
}

/// Hospital metrics reported by one facility on one date.
///
/// Absent metrics are `None`, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HospitalMetrics {
    /// Patients in hospital with the disease.
    pub hospital_cases: Option<u32>,
    /// New admissions.
    pub new_admissions: Option<u32>,
    /// Occupied mechanical-ventilation beds.
    pub occupied_beds: Option<u32>,
}

impl HospitalMetrics {
    /// Present metrics as `(field name, value)` pairs.
    #[must_use]
    pub fn present(&self) -> Vec<(&'static str, u32)> {
        [
            ("hospitalCases", self.hospital_cases),
            ("newAdmissions", self.new_admissions),
            ("occupiedBeds", self.occupied_beds),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }

    /// Whether no metric is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.hospital_cases.is_none()
            && self.new_admissions.is_none()
            && self.occupied_beds.is_none()
    }
}

/// A fully normalized point, ready for a sink. Not modified after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPoint {
    /// Measurement name.
    pub measurement: Measurement,
    /// Area name tag.
    pub area_name: String,
    /// Area code tag.
    pub area_code: String,
    /// Area kind tag.
    pub area_kind: AreaKind,
    /// Facility tag, for hospital observations.
    pub facility: Option<String>,
    /// Observation date.
    pub date: NaiveDate,
    /// Field values; never empty.
    pub fields: Vec<MetricValue>,
}

impl NormalizedPoint {
    /// Point timestamp: midnight UTC on [`date`](Self::date).
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.date.and_time(NaiveTime::MIN).and_utc()
    }

    /// Raw value of the named field.
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<f64> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.raw)
    }

    /// Per-capita value of the named field.
    #[must_use]
    pub fn per_capita(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.per_capita)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn area_kind_round_trips_api_names() {
        assert_eq!(AreaKind::Ltla.to_string(), "ltla");
        assert_eq!(AreaKind::from_str("utla").unwrap(), AreaKind::Utla);
        assert_eq!(Measurement::ConfirmedCases.as_ref(), "confirmedCases");
    }

    #[test]
    fn present_metrics_skip_missing_values() {
        let metrics = HospitalMetrics {
            hospital_cases: Some(0),
            new_admissions: None,
            occupied_beds: Some(3),
        };
        assert_eq!(metrics.present(), vec![("hospitalCases", 0), ("occupiedBeds", 3)]);
        assert!(!metrics.is_empty());
        assert!(HospitalMetrics::default().is_empty());
    }
}
