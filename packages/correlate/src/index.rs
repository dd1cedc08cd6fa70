//! Facility observation index.
//!
//! Observation series arrive as a flat list of records keyed by the
//! reporting organisation's name. [`ObservationIndex`] groups them into
//! `FacilityKey -> (NaiveDate -> HospitalMetrics)` so the correlator can
//! look up one facility's full series by the name it carries in the
//! facility reference file.

use std::collections::BTreeMap;
use std::fmt;

use case_tracker_points::HospitalMetrics;
use case_tracker_source_models::FacilityObservationRecord;
use chrono::NaiveDate;

/// Normalized organisation name used to join facilities with their
/// observation series.
///
/// The facility directory and the observation API spell the same
/// organisation with different casing and padding; both sides are
/// trimmed and upper-cased before comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FacilityKey(String);

impl FacilityKey {
    /// Normalizes an organisation name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_uppercase())
    }

    /// The normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FacilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FacilityKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One facility's observations, ordered by date.
pub type ObservationSeries = BTreeMap<NaiveDate, HospitalMetrics>;

/// Two-level index: facility key, then observation date.
///
/// Each `(facility, date)` pair holds at most one [`HospitalMetrics`]. When
/// the source repeats a pair, metrics present in the later record replace
/// earlier values; absent metrics never overwrite present ones.
#[derive(Debug, Clone, Default)]
pub struct ObservationIndex {
    series: BTreeMap<FacilityKey, ObservationSeries>,
}

impl ObservationIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation.
    pub fn insert(&mut self, facility: &str, date: NaiveDate, metrics: HospitalMetrics) {
        let entry = self
            .series
            .entry(FacilityKey::new(facility))
            .or_default()
            .entry(date)
            .or_default();

        if metrics.hospital_cases.is_some() {
            entry.hospital_cases = metrics.hospital_cases;
        }
        if metrics.new_admissions.is_some() {
            entry.new_admissions = metrics.new_admissions;
        }
        if metrics.occupied_beds.is_some() {
            entry.occupied_beds = metrics.occupied_beds;
        }
    }

    /// Series for a facility, if any observation was recorded for it.
    #[must_use]
    pub fn series(&self, facility: &FacilityKey) -> Option<&ObservationSeries> {
        self.series.get(facility)
    }

    /// Metrics for one facility on one date.
    #[must_use]
    pub fn get(&self, facility: &FacilityKey, date: NaiveDate) -> Option<&HospitalMetrics> {
        self.series.get(facility)?.get(&date)
    }

    /// Number of facilities with at least one observation.
    #[must_use]
    pub fn facility_count(&self) -> usize {
        self.series.len()
    }

    /// Total number of `(facility, date)` observations.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    /// Whether the index holds no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl<'a> FromIterator<&'a FacilityObservationRecord> for ObservationIndex {
    fn from_iter<I: IntoIterator<Item = &'a FacilityObservationRecord>>(iter: I) -> Self {
        let mut index = Self::new();
        for record in iter {
            index.insert(
                &record.area_name,
                record.date,
                HospitalMetrics {
                    hospital_cases: record.hospital_cases,
                    new_admissions: record.new_admissions,
                    occupied_beds: record.occupied_beds,
                },
            );
        }
        log::info!(
            "Indexed {} observations for {} facilities",
            index.observation_count(),
            index.facility_count()
        );
        index
    }
}
