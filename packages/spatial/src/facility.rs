//! Point-located facility reference data.
//!
//! The reference file is an organisation-directory search response:
//! `{ "value": [ { "OrganisationName", "OrganisationType", "Geocode" } ] }`
//! where `Geocode` is a `GeoJSON` point. Entries without a usable geocode
//! are skipped.

use std::path::Path;

use geo::Point;
use serde::Deserialize;

use crate::GeometryError;

/// A hospital facility with a known location.
#[derive(Debug, Clone, PartialEq)]
pub struct Facility {
    /// Organisation name; joins against observation series.
    pub organisation_name: String,
    /// Location in lon/lat.
    pub location: Point<f64>,
    /// Organisation type (e.g. `"Hospital Trust"`).
    pub kind: String,
}

impl Facility {
    /// Creates a facility.
    #[must_use]
    pub fn new(
        organisation_name: impl Into<String>,
        location: Point<f64>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            organisation_name: organisation_name.into(),
            location,
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FacilityDirectory {
    value: Vec<FacilityEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FacilityEntry {
    organisation_name: String,
    #[serde(default)]
    organisation_type: Option<String>,
    #[serde(default)]
    geocode: Option<geojson::Geometry>,
}

/// Reads facilities from a directory search response file.
///
/// # Errors
///
/// Returns [`GeometryError`] if the file cannot be read or is not valid
/// JSON of the expected shape.
pub fn load(path: &Path) -> Result<Vec<Facility>, GeometryError> {
    log::info!("Loading facilities from {}", path.display());
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

/// Parses facilities from a directory search response.
///
/// # Errors
///
/// Returns [`GeometryError::Json`] if the document does not match the
/// expected shape.
pub fn parse(text: &str) -> Result<Vec<Facility>, GeometryError> {
    let directory: FacilityDirectory = serde_json::from_str(text)?;
    let total = directory.value.len();

    let facilities: Vec<Facility> = directory
        .value
        .into_iter()
        .filter_map(|entry| {
            let Some(location) = entry.geocode.as_ref().and_then(to_point) else {
                log::warn!(
                    "Facility {} has no usable geocode, skipping",
                    entry.organisation_name
                );
                return None;
            };
            Some(Facility {
                organisation_name: entry.organisation_name.trim().to_string(),
                location,
                kind: entry
                    .organisation_type
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
        })
        .collect();

    log::info!("Loaded {} of {total} facilities", facilities.len());

    Ok(facilities)
}

fn to_point(geometry: &geojson::Geometry) -> Option<Point<f64>> {
    match &geometry.value {
        geojson::Value::Point(coords) if coords.len() >= 2 => {
            let (x, y) = (coords[0], coords[1]);
            (x.is_finite() && y.is_finite()).then(|| Point::new(x, y))
        }
        _ => None,
    }
}
