#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial assignment of facilities to administrative areas.
//!
//! [`BoundaryIndex`] loads area polygons from a `GeoJSON` feature
//! collection, computes their centroids and builds an R-tree over their
//! bounding boxes. [`locate`] then assigns every [`Facility`] to each
//! boundary containing it. Both are built once at startup and are
//! read-only afterwards, so they can be shared freely between readers.

pub mod boundary;
pub mod facility;
pub mod locate;

pub use boundary::{Boundary, BoundaryIndex, BoundaryProperties};
pub use facility::Facility;
pub use locate::{FacilityAssignment, locate};

/// Errors raised while loading reference geometry.
///
/// All of these are fatal: the run aborts before any fetching starts.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// Reading a reference file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reference document is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The reference document is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A feature's geometry could not be turned into a valid polygon.
    #[error("Invalid geometry for {name}: {message}")]
    InvalidGeometry {
        /// Area or facility name the geometry belongs to.
        name: String,
        /// Description of the defect.
        message: String,
    },

    /// Two boundary features carry the same area name.
    #[error("Duplicate boundary name: {name}")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },
}
