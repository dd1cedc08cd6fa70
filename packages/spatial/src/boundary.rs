//! Administrative boundary index.
//!
//! Every `Polygon`/`MultiPolygon` feature carrying the configured
//! area-name property becomes a [`Boundary`], keyed by that name. Other
//! geometry types (e.g. centroid points shipped in the same file) and
//! features without the property are skipped. Invalid polygons and
//! duplicate names fail the whole build.
//!
//! A ring is valid when its coordinates are finite, it has at least three
//! distinct vertices and no two of its edges cross or overlap. Edges are
//! compared with a sweep line, so the check stays near-linear in the
//! vertex count. Rings are checked one at a time: a hole poking out of its
//! exterior or two overlapping parts of a multipolygon are not detected.

use std::collections::BTreeMap;
use std::path::Path;

use geo::algorithm::line_intersection::line_intersection;
use geo::{BoundingRect, Centroid, Coord, Line, LineIntersection, LineString, MultiPolygon, Point};
use geojson::{FeatureCollection, GeoJson};
use rstar::{AABB, RTree, RTreeObject};

use crate::GeometryError;

/// Which feature properties hold the join keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryProperties {
    /// Property holding the area name (e.g. `"LAD20NM"`). Required.
    pub name: String,
    /// Property holding the area code (e.g. `"LAD20CD"`). Optional.
    pub code: Option<String>,
}

impl BoundaryProperties {
    /// Name-only property mapping.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
        }
    }

    /// Adds an area-code property.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// One administrative area.
#[derive(Debug, Clone)]
pub struct Boundary {
    /// Area name, unique within the index.
    pub name: String,
    /// Area code, when the source file carries one.
    pub code: Option<String>,
    /// Area extent.
    pub geometry: MultiPolygon<f64>,
    /// Centroid of [`geometry`](Self::geometry).
    pub centroid: Point<f64>,
}

/// Bounding box of a boundary, stored in the R-tree.
struct BoundaryEnvelope {
    name: String,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for BoundaryEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Immutable name-keyed boundary index with an R-tree over bounding
/// boxes.
pub struct BoundaryIndex {
    boundaries: BTreeMap<String, Boundary>,
    tree: RTree<BoundaryEnvelope>,
}

impl std::fmt::Debug for BoundaryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryIndex")
            .field("boundaries", &self.boundaries.len())
            .finish_non_exhaustive()
    }
}

impl BoundaryIndex {
    /// Reads and indexes a `GeoJSON` feature collection file.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the file cannot be read or parsed, a
    /// polygon is invalid, or an area name repeats.
    pub fn load(path: &Path, properties: &BoundaryProperties) -> Result<Self, GeometryError> {
        log::info!("Loading boundaries from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&text, properties)
    }

    /// Indexes a `GeoJSON` feature collection held in memory.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_geojson_str(
        text: &str,
        properties: &BoundaryProperties,
    ) -> Result<Self, GeometryError> {
        let geojson: GeoJson = text.parse()?;
        let collection = FeatureCollection::try_from(geojson)?;
        Self::build(&collection, properties)
    }

    /// Indexes an already-parsed feature collection.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn build(
        collection: &FeatureCollection,
        properties: &BoundaryProperties,
    ) -> Result<Self, GeometryError> {
        let mut boundaries = BTreeMap::new();
        let mut skipped = 0usize;

        for feature in &collection.features {
            let Some(geometry) = &feature.geometry else {
                continue;
            };
            if !matches!(
                geometry.value,
                geojson::Value::Polygon(_) | geojson::Value::MultiPolygon(_)
            ) {
                continue;
            }

            let Some(name) = string_property(feature, &properties.name) else {
                skipped += 1;
                continue;
            };
            let code = properties
                .code
                .as_deref()
                .and_then(|key| string_property(feature, key));

            let boundary = to_boundary(name, code, geometry)?;
            log::debug!(
                "Boundary {} centroid ({}, {})",
                boundary.name,
                boundary.centroid.x(),
                boundary.centroid.y()
            );

            if boundaries.contains_key(&boundary.name) {
                return Err(GeometryError::DuplicateName {
                    name: boundary.name,
                });
            }
            boundaries.insert(boundary.name.clone(), boundary);
        }

        if skipped > 0 {
            log::info!(
                "Skipped {skipped} polygon features without a '{}' property",
                properties.name
            );
        }

        let envelopes = boundaries
            .values()
            .map(|b| BoundaryEnvelope {
                name: b.name.clone(),
                envelope: compute_envelope(&b.geometry),
            })
            .collect();
        let tree = RTree::bulk_load(envelopes);

        log::info!("Indexed {} boundaries", boundaries.len());

        Ok(Self { boundaries, tree })
    }

    /// Looks up a boundary by area name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Boundary> {
        self.boundaries.get(name)
    }

    /// Centroid of the named boundary.
    #[must_use]
    pub fn centroid(&self, name: &str) -> Option<Point<f64>> {
        self.get(name).map(|b| b.centroid)
    }

    /// Iterates boundaries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Boundary> {
        self.boundaries.values()
    }

    /// Number of boundaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Returns every boundary covering `point`, in name order.
    ///
    /// Containment is boundary-inclusive: a point on an edge or vertex
    /// belongs to the boundary (`geo::Intersects`, not the interior-only
    /// `geo::Contains`).
    #[must_use]
    pub fn containing(&self, point: Point<f64>) -> Vec<&Boundary> {
        let query = AABB::from_point([point.x(), point.y()]);
        let mut found: Vec<&Boundary> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .filter_map(|entry| self.boundaries.get(&entry.name))
            .filter(|boundary| covers(&boundary.geometry, point))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

/// Boundary-inclusive point-in-polygon test.
#[must_use]
pub fn covers(geometry: &MultiPolygon<f64>, point: Point<f64>) -> bool {
    use geo::Intersects;

    geometry.intersects(&point)
}

fn string_property(feature: &geojson::Feature, key: &str) -> Option<String> {
    feature
        .property(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn to_boundary(
    name: String,
    code: Option<String>,
    geometry: &geojson::Geometry,
) -> Result<Boundary, GeometryError> {
    let invalid = |message: String| GeometryError::InvalidGeometry {
        name: name.clone(),
        message,
    };

    let geo_geometry: geo::Geometry<f64> = geometry
        .clone()
        .try_into()
        .map_err(|e: geojson::Error| invalid(e.to_string()))?;

    let multi_polygon = match geo_geometry {
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
        other => return Err(invalid(format!("expected a polygon, got {other:?}"))),
    };

    if multi_polygon.0.is_empty() {
        return Err(invalid("no polygons".to_string()));
    }
    for polygon in &multi_polygon.0 {
        check_ring(polygon.exterior()).map_err(|e| invalid(format!("exterior ring {e}")))?;
        for (i, interior) in polygon.interiors().iter().enumerate() {
            check_ring(interior).map_err(|e| invalid(format!("interior ring {i} {e}")))?;
        }
    }

    let centroid = multi_polygon
        .centroid()
        .ok_or_else(|| invalid("polygon has no centroid".to_string()))?;

    Ok(Boundary {
        name,
        code,
        geometry: multi_polygon,
        centroid,
    })
}

fn check_ring(ring: &LineString<f64>) -> Result<(), String> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err("has a non-finite coordinate".to_string());
    }
    if !ring.is_closed() {
        return Err("is not closed".to_string());
    }

    let mut vertices: Vec<Coord<f64>> = ring.0.clone();
    vertices.dedup();
    if vertices.len() < 4 {
        return Err("has fewer than three distinct vertices".to_string());
    }

    let edges: Vec<Line<f64>> = vertices
        .windows(2)
        .map(|pair| Line::new(pair[0], pair[1]))
        .collect();
    let last = edges.len() - 1;

    // Sweep left to right: only edges whose x-ranges overlap can meet.
    let mut order: Vec<usize> = (0..edges.len()).collect();
    order.sort_by(|&a, &b| min_x(&edges[a]).total_cmp(&min_x(&edges[b])));

    for (pos, &a) in order.iter().enumerate() {
        let reach = max_x(&edges[a]);
        for &b in order[pos + 1..]
            .iter()
            .take_while(|&&b| min_x(&edges[b]) <= reach)
        {
            let Some(intersection) = line_intersection(edges[a], edges[b]) else {
                continue;
            };
            let (low, high) = (a.min(b), a.max(b));
            let adjacent = high - low == 1 || (low == 0 && high == last);
            let shares_vertex_only = matches!(
                intersection,
                LineIntersection::SinglePoint {
                    is_proper: false,
                    ..
                }
            );
            if adjacent && shares_vertex_only {
                continue;
            }
            return Err(format!(
                "self-intersects at edges {low} and {high} near ({}, {})",
                edges[low].start.x, edges[low].start.y
            ));
        }
    }

    Ok(())
}

fn min_x(line: &Line<f64>) -> f64 {
    line.start.x.min(line.end.x)
}

fn max_x(line: &Line<f64>) -> f64 {
    line.start.x.max(line.end.x)
}

fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
