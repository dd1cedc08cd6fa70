//! Per-capita normalization.
//!
//! Population figures are an explicit [`PopulationTable`] value owned by
//! the [`Normalizer`]; nothing here reads global state.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use case_tracker_source_models::CaseRecord;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{AreaKind, HospitalMetrics, Measurement, MetricValue, NormalizedPoint};

/// Per-capita values are expressed per this many residents.
pub const PER_CAPITA_BASE: f64 = 100_000.0;

/// Errors that can occur while loading population data.
#[derive(Debug, thiserror::Error)]
pub enum PopulationError {
    /// Reading the file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV was malformed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct PopulationRow {
    #[serde(rename = "areaCode")]
    area_code: String,
    population: u64,
}

/// Population by area code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationTable {
    by_area_code: BTreeMap<String, u64>,
}

impl PopulationTable {
    /// Loads an `areaCode,population` CSV file.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError`] if the file cannot be read or a row is
    /// malformed.
    pub fn load(path: &Path) -> Result<Self, PopulationError> {
        log::info!("Loading population data from {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Reads an `areaCode,population` CSV with a header row.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::Csv`] if a row is malformed.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PopulationError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut by_area_code = BTreeMap::new();
        for row in csv_reader.deserialize() {
            let row: PopulationRow = row?;
            by_area_code.insert(row.area_code, row.population);
        }
        log::info!("Loaded population for {} areas", by_area_code.len());
        Ok(Self { by_area_code })
    }

    /// Population of an area, if known.
    #[must_use]
    pub fn get(&self, area_code: &str) -> Option<u64> {
        self.by_area_code.get(area_code).copied()
    }

    /// Number of areas with population data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_area_code.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_area_code.is_empty()
    }
}

impl FromIterator<(String, u64)> for PopulationTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            by_area_code: iter.into_iter().collect(),
        }
    }
}

/// Builds [`NormalizedPoint`]s, adding per-capita values where the area's
/// population is known.
#[derive(Debug, Clone)]
pub struct Normalizer {
    populations: PopulationTable,
    area_kind: AreaKind,
}

impl Normalizer {
    /// Creates a normalizer tagging points with `area_kind`.
    #[must_use]
    pub const fn new(populations: PopulationTable, area_kind: AreaKind) -> Self {
        Self {
            populations,
            area_kind,
        }
    }

    /// Area kind tag applied to every point.
    #[must_use]
    pub const fn area_kind(&self) -> AreaKind {
        self.area_kind
    }

    /// `raw` per [`PER_CAPITA_BASE`] residents of `area_code`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn per_capita(&self, area_code: &str, raw: f64) -> Option<f64> {
        let population = self.populations.get(area_code).filter(|p| *p > 0)?;
        Some(raw / (population as f64 / PER_CAPITA_BASE))
    }

    fn metric(&self, area_code: &str, name: &'static str, raw: u32) -> MetricValue {
        let raw = f64::from(raw);
        MetricValue {
            name,
            raw,
            per_capita: self.per_capita(area_code, raw),
        }
    }

    /// Point for a daily case count.
    #[must_use]
    pub fn case_point(&self, record: &CaseRecord) -> NormalizedPoint {
        NormalizedPoint {
            measurement: Measurement::ConfirmedCases,
            area_name: record.area_name.clone(),
            area_code: record.area_code.clone(),
            area_kind: self.area_kind,
            facility: None,
            date: record.date,
            fields: vec![self.metric(&record.area_code, "daily", record.new_cases)],
        }
    }

    /// Point for one facility's metrics attributed to an area. Returns
    /// `None` when no metric is present.
    #[must_use]
    pub fn hospital_point(
        &self,
        area_name: &str,
        area_code: &str,
        facility: &str,
        date: NaiveDate,
        metrics: &HospitalMetrics,
    ) -> Option<NormalizedPoint> {
        let fields: Vec<MetricValue> = metrics
            .present()
            .into_iter()
            .map(|(name, value)| self.metric(area_code, name, value))
            .collect();

        if fields.is_empty() {
            return None;
        }

        Some(NormalizedPoint {
            measurement: Measurement::HospitalObservations,
            area_name: area_name.to_string(),
            area_code: area_code.to_string(),
            area_kind: self.area_kind,
            facility: Some(facility.to_string()),
            date,
            fields,
        })
    }
}
