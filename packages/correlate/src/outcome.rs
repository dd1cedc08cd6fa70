//! Per-area join results and the run-level summary built from them.

use std::collections::BTreeMap;
use std::fmt;

use case_tracker_points::NormalizedPoint;
use strum_macros::Display;

/// Why a join produced no points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum JoinMissKind {
    /// The case records name an area absent from the boundary file.
    NoBoundary,
    /// The boundary contains no known facility.
    NoFacilities,
    /// A facility inside the boundary has no observation series.
    NoObservations,
}

/// A lookup that failed during correlation. Not an error: the area or
/// facility is skipped and correlation continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinMiss {
    /// No boundary carries this area name.
    NoBoundary {
        /// Area name from the case records.
        area: String,
    },
    /// The boundary contains no facility.
    NoFacilities {
        /// Area name.
        area: String,
    },
    /// The facility has no observations.
    NoObservations {
        /// Area the facility was assigned to.
        area: String,
        /// Facility organisation name.
        facility: String,
    },
}

impl JoinMiss {
    /// Reason category.
    #[must_use]
    pub const fn kind(&self) -> JoinMissKind {
        match self {
            Self::NoBoundary { .. } => JoinMissKind::NoBoundary,
            Self::NoFacilities { .. } => JoinMissKind::NoFacilities,
            Self::NoObservations { .. } => JoinMissKind::NoObservations,
        }
    }

    /// The key that failed to match: an area name, or
    /// `area/facility` for missing observation series.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::NoBoundary { area } | Self::NoFacilities { area } => area.clone(),
            Self::NoObservations { area, facility } => format!("{area}/{facility}"),
        }
    }
}

impl fmt::Display for JoinMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.key())
    }
}

/// Result of joining one facility (or one area, when it fails before
/// reaching its facilities).
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Points attributed to the area.
    Matched(Vec<NormalizedPoint>),
    /// Lookup failed; nothing emitted.
    Skipped(JoinMiss),
}

/// Counts and skipped keys from one correlation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationSummary {
    /// `confirmedCases` points emitted.
    pub case_points: usize,
    /// Areas that received at least one hospital point.
    pub matched_areas: usize,
    /// `(area, facility)` pairs that produced hospital points.
    pub matched_facilities: usize,
    /// `hospitalObservations` points emitted.
    pub hospital_points: usize,
    /// Every join miss, in the order encountered.
    pub skipped: Vec<JoinMiss>,
}

impl CorrelationSummary {
    /// Skipped keys grouped by reason.
    #[must_use]
    pub fn skipped_by_kind(&self) -> BTreeMap<JoinMissKind, Vec<String>> {
        let mut grouped: BTreeMap<JoinMissKind, Vec<String>> = BTreeMap::new();
        for miss in &self.skipped {
            grouped.entry(miss.kind()).or_default().push(miss.key());
        }
        grouped
    }

    /// Number of skipped joins of one kind.
    #[must_use]
    pub fn skipped_count(&self, kind: JoinMissKind) -> usize {
        self.skipped.iter().filter(|m| m.kind() == kind).count()
    }

    /// Logs the summary, one line per skip reason.
    pub fn log(&self) {
        log::info!(
            "Correlation: {} case points, {} hospital points from {} facilities in {} areas",
            self.case_points,
            self.hospital_points,
            self.matched_facilities,
            self.matched_areas
        );
        for (kind, keys) in self.skipped_by_kind() {
            log::info!("Skipped {} ({kind}): {}", keys.len(), keys.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_skipped_keys_by_kind() {
        let summary = CorrelationSummary {
            skipped: vec![
                JoinMiss::NoFacilities {
                    area: "B".to_string(),
                },
                JoinMiss::NoObservations {
                    area: "A".to_string(),
                    facility: "F2".to_string(),
                },
                JoinMiss::NoFacilities {
                    area: "C".to_string(),
                },
            ],
            ..CorrelationSummary::default()
        };

        let grouped = summary.skipped_by_kind();

        assert_eq!(grouped[&JoinMissKind::NoFacilities], vec!["B", "C"]);
        assert_eq!(grouped[&JoinMissKind::NoObservations], vec!["A/F2"]);
        assert!(!grouped.contains_key(&JoinMissKind::NoBoundary));
        assert_eq!(summary.skipped_count(JoinMissKind::NoFacilities), 2);
    }

    #[test]
    fn join_miss_display_names_reason_and_key() {
        let miss = JoinMiss::NoBoundary {
            area: "Atlantis".to_string(),
        };
        assert_eq!(miss.to_string(), "no_boundary: Atlantis");
    }
}
