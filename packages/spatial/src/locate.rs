//! Facility-to-boundary assignment.

use std::collections::BTreeMap;

use crate::{BoundaryIndex, Facility};

/// Read-only mapping from boundary name to the facilities it covers.
///
/// A facility inside overlapping boundaries is listed under each of
/// them. Boundaries covering no facility have no entry.
#[derive(Debug, Clone, Default)]
pub struct FacilityAssignment {
    by_boundary: BTreeMap<String, Vec<Facility>>,
    unassigned: Vec<String>,
}

impl FacilityAssignment {
    /// Facilities inside the named boundary, in input order.
    #[must_use]
    pub fn facilities_for(&self, boundary: &str) -> Option<&[Facility]> {
        self.by_boundary.get(boundary).map(Vec::as_slice)
    }

    /// Iterates `(boundary name, facilities)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Facility])> {
        self.by_boundary
            .iter()
            .map(|(name, facilities)| (name.as_str(), facilities.as_slice()))
    }

    /// Names of facilities that fell inside no boundary.
    #[must_use]
    pub fn unassigned(&self) -> &[String] {
        &self.unassigned
    }

    /// Number of boundaries with at least one facility.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_boundary.len()
    }

    /// Whether no boundary received a facility.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_boundary.is_empty()
    }
}

impl FromIterator<(String, Vec<Facility>)> for FacilityAssignment {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Facility>)>>(iter: I) -> Self {
        Self {
            by_boundary: iter.into_iter().collect(),
            unassigned: Vec::new(),
        }
    }
}

/// Assigns every facility to every boundary that covers its location.
///
/// Equivalent to testing each facility against each boundary; the
/// index's R-tree only prunes boundaries whose bounding box cannot
/// contain the point. Containment is boundary-inclusive (see
/// [`BoundaryIndex::containing`]). Facilities outside every boundary are
/// reported in [`FacilityAssignment::unassigned`], not as errors.
#[must_use]
pub fn locate(facilities: &[Facility], index: &BoundaryIndex) -> FacilityAssignment {
    let mut by_boundary: BTreeMap<String, Vec<Facility>> = BTreeMap::new();
    let mut unassigned = Vec::new();

    for facility in facilities {
        let containing = index.containing(facility.location);
        if containing.is_empty() {
            log::debug!(
                "Facility {} at ({}, {}) is outside every boundary",
                facility.organisation_name,
                facility.location.x(),
                facility.location.y()
            );
            unassigned.push(facility.organisation_name.clone());
            continue;
        }
        if containing.len() > 1 {
            log::debug!(
                "Facility {} falls inside {} overlapping boundaries",
                facility.organisation_name,
                containing.len()
            );
        }
        for boundary in containing {
            by_boundary
                .entry(boundary.name.clone())
                .or_default()
                .push(facility.clone());
        }
    }

    log::info!(
        "Assigned facilities to {} of {} boundaries ({} facilities unassigned)",
        by_boundary.len(),
        index.len(),
        unassigned.len()
    );

    FacilityAssignment {
        by_boundary,
        unassigned,
    }
}

#[cfg(test)]
mod tests {
    use geo::Point;

    use super::*;
    use crate::BoundaryProperties;

    fn index() -> BoundaryIndex {
        let square = |name: &str, x0: f64, size: f64| {
            serde_json::json!({
                "type": "Feature",
                "properties": { "NAME": name },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [x0, 0.0], [x0 + size, 0.0], [x0 + size, size], [x0, size], [x0, 0.0]
                    ]]
                }
            })
        };
        let text = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                square("West", 0.0, 2.0),
                square("East", 2.0, 2.0),
                square("Empty", 10.0, 1.0)
            ]
        })
        .to_string();
        BoundaryIndex::from_geojson_str(&text, &BoundaryProperties::named("NAME")).unwrap()
    }

    #[test]
    fn assigns_facilities_to_containing_boundaries() {
        let facilities = vec![
            Facility::new("F1", Point::new(1.0, 1.0), "Trust"),
            Facility::new("F2", Point::new(3.0, 1.0), "Trust"),
            Facility::new("F3", Point::new(0.5, 0.5), "Trust"),
        ];

        let assignment = locate(&facilities, &index());

        let west: Vec<&str> = assignment
            .facilities_for("West")
            .unwrap()
            .iter()
            .map(|f| f.organisation_name.as_str())
            .collect();
        assert_eq!(west, vec!["F1", "F3"]);
        assert_eq!(assignment.facilities_for("East").unwrap().len(), 1);
        assert!(assignment.facilities_for("Empty").is_none());
    }

    #[test]
    fn facility_on_shared_edge_belongs_to_both() {
        let facilities = vec![Facility::new("Edge", Point::new(2.0, 1.0), "Trust")];

        let assignment = locate(&facilities, &index());

        assert_eq!(assignment.facilities_for("West").unwrap().len(), 1);
        assert_eq!(assignment.facilities_for("East").unwrap().len(), 1);
    }

    #[test]
    fn facility_outside_every_boundary_is_omitted() {
        let facilities = vec![Facility::new("Far", Point::new(50.0, 50.0), "Trust")];

        let assignment = locate(&facilities, &index());

        assert!(assignment.is_empty());
        assert_eq!(assignment.unassigned(), ["Far".to_string()]);
    }
}
