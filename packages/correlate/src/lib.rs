#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Correlation of case records, facility observations and the spatial
//! assignment into normalized points.
//!
//! Every case record becomes a `confirmedCases` point. For every area
//! named in the case records, the facilities assigned to its boundary are
//! looked up in the [`ObservationIndex`] and each dated observation
//! becomes a `hospitalObservations` point tagged with that area. Lookup
//! failures are [`JoinMiss`]es: recorded in the [`CorrelationSummary`]
//! and skipped, never fatal.

pub mod index;
pub mod outcome;

use std::collections::BTreeMap;

use case_tracker_points::NormalizedPoint;
use case_tracker_points::normalize::Normalizer;
use case_tracker_source_models::CaseRecord;
use case_tracker_spatial::{BoundaryIndex, Facility, FacilityAssignment};

pub use index::{FacilityKey, ObservationIndex, ObservationSeries};
pub use outcome::{CorrelationSummary, JoinMiss, JoinMissKind, JoinOutcome};

/// Points and summary from one correlation pass.
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    /// Case points first (in record order), then hospital points grouped
    /// by area name.
    pub points: Vec<NormalizedPoint>,
    /// Counts and skipped keys.
    pub summary: CorrelationSummary,
}

/// Joins run data against the static spatial assignment.
///
/// Holds only shared references to the read-only spatial structures.
#[derive(Debug, Clone, Copy)]
pub struct Correlator<'a> {
    boundaries: &'a BoundaryIndex,
    assignment: &'a FacilityAssignment,
    normalizer: &'a Normalizer,
}

impl<'a> Correlator<'a> {
    /// Creates a correlator over a built index and assignment.
    #[must_use]
    pub const fn new(
        boundaries: &'a BoundaryIndex,
        assignment: &'a FacilityAssignment,
        normalizer: &'a Normalizer,
    ) -> Self {
        Self {
            boundaries,
            assignment,
            normalizer,
        }
    }

    /// Joins one area's facilities with their observation series.
    ///
    /// Returns one outcome per facility, or a single skip when the area
    /// has no boundary or no facilities.
    #[must_use]
    pub fn correlate_area(
        &self,
        area_name: &str,
        area_code: &str,
        observations: &ObservationIndex,
    ) -> Vec<JoinOutcome> {
        if self.boundaries.get(area_name).is_none() {
            return vec![JoinOutcome::Skipped(JoinMiss::NoBoundary {
                area: area_name.to_string(),
            })];
        }

        let Some(facilities) = self.assignment.facilities_for(area_name) else {
            return vec![JoinOutcome::Skipped(JoinMiss::NoFacilities {
                area: area_name.to_string(),
            })];
        };

        facilities
            .iter()
            .map(|facility| self.correlate_facility(area_name, area_code, facility, observations))
            .collect()
    }

    fn correlate_facility(
        &self,
        area_name: &str,
        area_code: &str,
        facility: &Facility,
        observations: &ObservationIndex,
    ) -> JoinOutcome {
        let key = FacilityKey::new(&facility.organisation_name);
        let Some(series) = observations.series(&key) else {
            return JoinOutcome::Skipped(JoinMiss::NoObservations {
                area: area_name.to_string(),
                facility: facility.organisation_name.clone(),
            });
        };

        let points = series
            .iter()
            .filter_map(|(date, metrics)| {
                self.normalizer.hospital_point(
                    area_name,
                    area_code,
                    &facility.organisation_name,
                    *date,
                    metrics,
                )
            })
            .collect();

        JoinOutcome::Matched(points)
    }

    /// Builds every point for a run.
    ///
    /// A facility assigned to two boundaries contributes points under
    /// each. A miss for one area never affects the others.
    #[must_use]
    pub fn correlate(&self, cases: &[CaseRecord], observations: &ObservationIndex) -> Correlation {
        let mut summary = CorrelationSummary::default();
        let mut points: Vec<NormalizedPoint> =
            cases.iter().map(|r| self.normalizer.case_point(r)).collect();
        summary.case_points = points.len();

        let mut areas: BTreeMap<&str, &str> = BTreeMap::new();
        for record in cases {
            areas
                .entry(record.area_name.as_str())
                .or_insert(record.area_code.as_str());
        }

        for (area_name, area_code) in areas {
            let mut area_matched = false;

            for outcome in self.correlate_area(area_name, area_code, observations) {
                match outcome {
                    JoinOutcome::Matched(area_points) => {
                        if area_points.is_empty() {
                            log::debug!("No metrics recorded for a facility in {area_name}");
                            continue;
                        }
                        summary.matched_facilities += 1;
                        summary.hospital_points += area_points.len();
                        area_matched = true;
                        points.extend(area_points);
                    }
                    JoinOutcome::Skipped(miss) => {
                        match &miss {
                            JoinMiss::NoFacilities { .. } => log::debug!("Join miss: {miss}"),
                            JoinMiss::NoBoundary { .. } | JoinMiss::NoObservations { .. } => {
                                log::warn!("Join miss: {miss}");
                            }
                        }
                        summary.skipped.push(miss);
                    }
                }
            }

            if area_matched {
                summary.matched_areas += 1;
            }
        }

        summary.log();

        Correlation { points, summary }
    }
}
