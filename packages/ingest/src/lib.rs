#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch ingestion of case and hospital data into a time-series store.
//!
//! One run is a single sequence: load reference data, fetch case records
//! and facility observations concurrently, correlate, then hand the
//! complete point set to the sink. A fetch or reference error aborts the
//! run before the sink sees a single point. A sink that fails partway
//! reports how much it stored through [`IngestError::points_written`].

pub mod config;

use std::sync::Arc;

use case_tracker_correlate::{CorrelationSummary, Correlator, ObservationIndex};
use case_tracker_points::normalize::{Normalizer, PopulationError, PopulationTable};
use case_tracker_points::sink::{InfluxSink, LineProtocolFileSink, SinkError, TimeSeriesSink};
use case_tracker_source::executor::ReqwestExecutor;
use case_tracker_source::freshness::ChangeDetector;
use case_tracker_source::observations::fetch_facility_observations;
use case_tracker_source::paginated::RemoteFetcher;
use case_tracker_source::{FetchError, HttpExecutor};
use case_tracker_spatial::{BoundaryIndex, FacilityAssignment, GeometryError};

use crate::config::{ApiConfig, ConfigError, IngestConfig, ReferenceConfig, RetryConfig, SinkConfig};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reference geometry could not be loaded.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Population data could not be loaded.
    #[error(transparent)]
    Population(#[from] PopulationError),

    /// A remote fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The sink rejected the points.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl IngestError {
    /// Points the sink stored before the run failed.
    #[must_use]
    pub const fn points_written(&self) -> usize {
        match self {
            Self::Sink(e) => e.points_written(),
            Self::Config(_) | Self::Geometry(_) | Self::Population(_) | Self::Fetch(_) => 0,
        }
    }
}

/// Counts from one successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Case records fetched.
    pub case_records: usize,
    /// Facility observation records fetched.
    pub observation_records: usize,
    /// Points accepted by the sink.
    pub points_written: usize,
    /// Correlation counts and join misses.
    pub summary: CorrelationSummary,
}

/// Static reference data, built once and read-only afterwards.
#[derive(Debug)]
pub struct Reference {
    boundaries: BoundaryIndex,
    assignment: FacilityAssignment,
    normalizer: Normalizer,
}

impl Reference {
    /// Loads boundaries, facilities and population data and assigns
    /// facilities to boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Geometry`] if a boundary or facility file is
    /// unreadable or invalid, or [`IngestError::Population`] if the
    /// population CSV is.
    pub fn load(config: &ReferenceConfig) -> Result<Self, IngestError> {
        let boundaries = BoundaryIndex::load(&config.boundaries, &config.boundary_properties())?;
        let facilities = case_tracker_spatial::facility::load(&config.facilities)?;
        let populations = match &config.population {
            Some(path) => PopulationTable::load(path)?,
            None => {
                log::warn!("No population data configured, per-capita fields will be omitted");
                PopulationTable::default()
            }
        };

        let assignment = case_tracker_spatial::locate(&facilities, &boundaries);
        Ok(Self::new(
            boundaries,
            assignment,
            Normalizer::new(populations, config.area_kind),
        ))
    }

    /// Assembles reference data from already-built parts.
    #[must_use]
    pub const fn new(
        boundaries: BoundaryIndex,
        assignment: FacilityAssignment,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            boundaries,
            assignment,
            normalizer,
        }
    }
}

/// Wraps `executor` in the configured retry policy.
#[must_use]
pub fn retrying(executor: Arc<dyn HttpExecutor>, retry: &RetryConfig) -> Arc<dyn HttpExecutor> {
    let policy = retry.policy();
    log::debug!(
        "Retry policy: {} retries, up to {:?} total backoff",
        policy.max_retries,
        policy.total_backoff()
    );
    Arc::new(policy.wrap(executor))
}

/// Creates the production HTTP executor, wrapped in the configured retry
/// policy.
///
/// # Errors
///
/// Returns [`IngestError::Fetch`] if the HTTP client cannot be built.
pub fn http_executor(retry: &RetryConfig) -> Result<Arc<dyn HttpExecutor>, IngestError> {
    let executor: Arc<dyn HttpExecutor> = Arc::new(ReqwestExecutor::new()?);
    Ok(retrying(executor, retry))
}

/// Change detector for the case listing endpoint.
#[must_use]
pub fn change_detector(
    executor: Arc<dyn HttpExecutor>,
    api: &ApiConfig,
) -> ChangeDetector<Arc<dyn HttpExecutor>> {
    ChangeDetector::new(executor, api.cases_url())
}

/// Builds the configured sink. Network sinks retry each batch with the
/// `retry` policy.
///
/// # Errors
///
/// Returns [`IngestError::Config`] if the sink's token variable is unset.
pub fn build_sink(
    config: &SinkConfig,
    retry: &RetryConfig,
) -> Result<Box<dyn TimeSeriesSink>, IngestError> {
    let token = config.token()?;
    let sink: Box<dyn TimeSeriesSink> = match config {
        SinkConfig::Influx {
            url,
            org,
            bucket,
            batch_size,
            ..
        } => {
            let sink = InfluxSink::new(url, org, bucket, token.unwrap_or_default())
                .with_retry(retry.policy());
            Box::new(match batch_size {
                Some(size) => sink.with_batch_size(*size),
                None => sink,
            })
        }
        SinkConfig::File { path } => Box::new(LineProtocolFileSink::new(path)),
    };
    Ok(sink)
}

/// One pipeline: fetch, correlate, write.
pub struct Pipeline {
    executor: Arc<dyn HttpExecutor>,
    api: ApiConfig,
    reference: Reference,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("api", &self.api)
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline from already-loaded reference data. `executor`
    /// is used as-is; wrap it with [`retrying`] first for retries.
    #[must_use]
    pub fn new(executor: Arc<dyn HttpExecutor>, api: ApiConfig, reference: Reference) -> Self {
        Self {
            executor,
            api,
            reference,
        }
    }

    /// Loads reference data, then wraps `executor` in the configured
    /// retry policy. Reference errors surface here, before any request
    /// is made.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if reference data cannot be loaded.
    pub fn prepare(
        config: &IngestConfig,
        executor: Arc<dyn HttpExecutor>,
    ) -> Result<Self, IngestError> {
        let reference = Reference::load(&config.reference)?;
        Ok(Self::new(
            retrying(executor, &config.retry),
            config.api.clone(),
            reference,
        ))
    }

    /// [`prepare`](Self::prepare) with the production HTTP executor.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if reference data cannot be loaded or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        let executor: Arc<dyn HttpExecutor> = Arc::new(ReqwestExecutor::new()?);
        Self::prepare(config, executor)
    }

    /// The executor requests go through.
    #[must_use]
    pub fn executor(&self) -> Arc<dyn HttpExecutor> {
        Arc::clone(&self.executor)
    }

    /// Runs once: fetch both sources concurrently under the overall
    /// timeout, correlate, and write every point in one sink call.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Fetch`] if either fetch fails or the timeout
    /// elapses, or [`IngestError::Sink`] if the write fails. The sink is
    /// not called when fetching fails.
    pub async fn run(&self, sink: &dyn TimeSeriesSink) -> Result<RunSummary, IngestError> {
        let timeout = self.api.timeout();
        let fetcher = RemoteFetcher::new(Arc::clone(&self.executor), &self.api.base_url)?;
        let cases_url = self.api.cases_url();

        let fetches = async {
            tokio::try_join!(
                fetcher.fetch(&cases_url),
                fetch_facility_observations(self.executor.as_ref(), &self.api.observations_url),
            )
        };
        let (cases, observations) = tokio::time::timeout(timeout, fetches)
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        let index: ObservationIndex = observations.iter().collect();
        let correlator = Correlator::new(
            &self.reference.boundaries,
            &self.reference.assignment,
            &self.reference.normalizer,
        );
        let correlation = correlator.correlate(&cases, &index);

        let points_written = sink.write(&correlation.points).await?;
        log::info!("Run complete: {points_written} points written");

        Ok(RunSummary {
            case_records: cases.len(),
            observation_records: observations.len(),
            points_written,
            summary: correlation.summary,
        })
    }

    /// Checks freshness and runs when the data changed.
    ///
    /// Returns `None` when nothing changed. A missing freshness token is
    /// logged and treated as a change. When the run fails the detector's
    /// previous token is restored so the next check tries again.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the freshness check fails for another
    /// reason or the run fails.
    pub async fn run_if_changed(
        &self,
        detector: &mut ChangeDetector<Arc<dyn HttpExecutor>>,
        sink: &dyn TimeSeriesSink,
    ) -> Result<Option<RunSummary>, IngestError> {
        let previous = detector.token().map(str::to_string);

        match detector.has_changed().await {
            Ok(true) => {}
            Ok(false) => {
                log::info!("No update found");
                return Ok(None);
            }
            Err(e @ FetchError::FreshnessUnavailable { .. }) => {
                log::warn!("{e}, ingesting anyway");
            }
            Err(e) => return Err(e.into()),
        }

        match self.run(sink).await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                detector.set_token(previous);
                Err(e)
            }
        }
    }

    /// Polls for changes forever, running whenever the data changed and
    /// sleeping `interval` between checks. Failures are logged and the
    /// loop continues.
    pub async fn watch(
        &self,
        mut detector: ChangeDetector<Arc<dyn HttpExecutor>>,
        sink: &dyn TimeSeriesSink,
        interval: std::time::Duration,
    ) {
        loop {
            match self.run_if_changed(&mut detector, sink).await {
                Ok(Some(summary)) => log::info!(
                    "Ingested {} case records and {} observations",
                    summary.case_records,
                    summary.observation_records
                ),
                Ok(None) => {}
                Err(e) => log::error!("Run failed: {e}"),
            }
            log::info!("Waiting {}s", interval.as_secs());
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use case_tracker_correlate::JoinMiss;
    use case_tracker_points::sink::MemorySink;
    use case_tracker_points::{AreaKind, Measurement};
    use case_tracker_source::testing::{Scripted, ScriptedExecutor};
    use reqwest::StatusCode;
    use reqwest::header::LAST_MODIFIED;

    use super::*;

    const BASE: &str = "https://api.example.org";
    const CASES_PAGE_1: &str = "https://api.example.org/v1/data?page=1";
    const CASES_PAGE_2: &str = "https://api.example.org/v1/data?page=2";
    const OBSERVATIONS: &str = "https://api.example.org/v2/data?areaType=nhsTrust";

    const BOUNDARIES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "LAD20NM": "Alpha", "LAD20CD": "E1" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "LAD20NM": "Beta", "LAD20CD": "E2" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 6.0], [5.0, 5.0]]]
                }
            }
        ]
    }"#;

    const DUPLICATE_BOUNDARIES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "LAD20NM": "Alpha" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "LAD20NM": "Alpha" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 6.0], [5.0, 5.0]]]
                }
            }
        ]
    }"#;

    const FACILITIES: &str = r#"{
        "value": [
            {
                "OrganisationName": "F1 Hospitals NHS Trust",
                "OrganisationType": "NHS Trust",
                "Geocode": { "type": "Point", "coordinates": [0.5, 0.5] }
            }
        ]
    }"#;

    const POPULATION: &str = "areaCode,population\nE1,200000\nE2,100000\n";

    const PAGE_1: &str = r#"{
        "length": 2,
        "data": [
            { "date": "2020-11-02", "areaCode": "E1", "areaName": "Alpha", "newCasesBySpecimenDate": 40 },
            { "date": "2020-11-02", "areaCode": "E2", "areaName": "Beta", "newCasesBySpecimenDate": 10 }
        ],
        "pagination": { "next": "/v1/data?page=2" }
    }"#;

    const PAGE_2: &str = r#"{
        "length": 1,
        "data": [
            { "date": "2020-11-01", "areaCode": "E1", "areaName": "Alpha", "newCasesBySpecimenDate": 30 }
        ],
        "pagination": { "next": null }
    }"#;

    const OBSERVATION_BODY: &str = r#"{
        "length": 2,
        "body": [
            { "date": "2020-11-01", "areaCode": "RF1", "areaName": "F1 HOSPITALS NHS TRUST", "hospitalCases": 20, "newAdmissions": 4, "covidOccupiedMVBeds": null },
            { "date": "2020-11-02", "areaCode": "RF1", "areaName": "F1 HOSPITALS NHS TRUST", "hospitalCases": 22 }
        ]
    }"#;

    fn write_reference(dir: &Path, boundaries: &str) -> IngestConfig {
        let boundaries_path = dir.join("boundaries.geojson");
        let facilities_path = dir.join("facilities.json");
        let population_path = dir.join("population.csv");
        std::fs::write(&boundaries_path, boundaries).unwrap();
        std::fs::write(&facilities_path, FACILITIES).unwrap();
        std::fs::write(&population_path, POPULATION).unwrap();

        IngestConfig::parse(&format!(
            r#"
            [api]
            base_url = "{BASE}"
            cases_path = "/v1/data?page=1"
            observations_url = "{OBSERVATIONS}"
            timeout_secs = 5

            [retry]
            max_retries = 2
            base_delay_secs = 0

            [reference]
            boundaries = "{}"
            area_name_property = "LAD20NM"
            area_code_property = "LAD20CD"
            facilities = "{}"
            population = "{}"
            area_kind = "ltla"

            [sink]
            type = "file"
            path = "unused.lp"
            "#,
            boundaries_path.display(),
            facilities_path.display(),
            population_path.display(),
        ))
        .unwrap()
    }

    fn healthy_api() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .on(CASES_PAGE_1, Scripted::ok(PAGE_1))
            .on(CASES_PAGE_2, Scripted::ok(PAGE_2))
            .on(OBSERVATIONS, Scripted::ok(OBSERVATION_BODY))
    }

    #[tokio::test]
    async fn facility_observations_are_attributed_only_to_containing_area() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_reference(dir.path(), BOUNDARIES);
        let pipeline = Pipeline::prepare(&config, Arc::new(healthy_api())).unwrap();
        let sink = MemorySink::new();

        let summary = pipeline.run(&sink).await.unwrap();

        let points = sink.points();
        let hospital: Vec<_> = points
            .iter()
            .filter(|p| p.measurement == Measurement::HospitalObservations)
            .collect();
        assert_eq!(hospital.len(), 2);
        assert!(hospital.iter().all(|p| p.area_name == "Alpha"));
        assert!(hospital.iter().all(|p| p.area_kind == AreaKind::Ltla));
        assert!(
            hospital
                .iter()
                .all(|p| p.facility.as_deref() == Some("F1 Hospitals NHS Trust"))
        );
        assert!(!points.iter().any(|p| p.area_name == "Beta" && p.facility.is_some()));
        assert!((hospital[0].per_capita("hospitalCases").unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(hospital[0].raw("occupiedBeds"), None);

        let cases = points
            .iter()
            .filter(|p| p.measurement == Measurement::ConfirmedCases)
            .count();
        assert_eq!(cases, 3);

        assert_eq!(summary.case_records, 3);
        assert_eq!(summary.observation_records, 2);
        assert_eq!(summary.points_written, 5);
        assert_eq!(
            summary.summary.skipped,
            vec![JoinMiss::NoFacilities {
                area: "Beta".to_string()
            }]
        );
        assert_eq!(sink.write_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_boundary_name_is_rejected_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_reference(dir.path(), DUPLICATE_BOUNDARIES);
        let executor = Arc::new(healthy_api());

        let result = Pipeline::prepare(&config, executor.clone());

        assert!(matches!(
            result,
            Err(IngestError::Geometry(GeometryError::DuplicateName { name })) if name == "Alpha"
        ));
        assert!(executor.requests().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_reference(dir.path(), BOUNDARIES);
        let executor = ScriptedExecutor::new()
            .on(CASES_PAGE_1, Scripted::ok(PAGE_1))
            .on(CASES_PAGE_2, Scripted::status(StatusCode::INTERNAL_SERVER_ERROR))
            .on(OBSERVATIONS, Scripted::ok(OBSERVATION_BODY));
        let executor = Arc::new(executor);
        let pipeline = Pipeline::prepare(&config, executor.clone()).unwrap();
        let sink = MemorySink::new();

        let err = pipeline.run(&sink).await.unwrap_err();

        assert!(matches!(
            err,
            IngestError::Fetch(FetchError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(executor.request_count(CASES_PAGE_2), 3);
        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test]
    async fn overall_timeout_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_reference(dir.path(), BOUNDARIES);
        config.api.timeout_secs = 1;
        let executor = ScriptedExecutor::new()
            .on(CASES_PAGE_1, Scripted::ok(PAGE_1))
            .on(CASES_PAGE_2, Scripted::ok(PAGE_2))
            .on(
                OBSERVATIONS,
                Scripted::Delayed(
                    Duration::from_secs(30),
                    Box::new(Scripted::ok(OBSERVATION_BODY)),
                ),
            );
        let pipeline = Pipeline::prepare(&config, Arc::new(executor)).unwrap();
        let sink = MemorySink::new();

        let err = pipeline.run(&sink).await.unwrap_err();

        assert!(matches!(err, IngestError::Fetch(FetchError::Timeout(_))));
        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test]
    async fn run_if_changed_skips_unchanged_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_reference(dir.path(), BOUNDARIES);
        let executor = ScriptedExecutor::new()
            .on(
                CASES_PAGE_1,
                Scripted::ok(PAGE_1).with_header(LAST_MODIFIED, "Mon, 02 Nov 2020 16:00:00 GMT"),
            )
            .on(CASES_PAGE_2, Scripted::ok(PAGE_2))
            .on(OBSERVATIONS, Scripted::ok(OBSERVATION_BODY));
        let pipeline = Pipeline::prepare(&config, Arc::new(executor)).unwrap();
        let mut detector = change_detector(pipeline.executor(), &config.api);
        let sink = MemorySink::new();

        let first = pipeline.run_if_changed(&mut detector, &sink).await.unwrap();
        let second = pipeline.run_if_changed(&mut detector, &sink).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(sink.write_count(), 1);
    }

    #[tokio::test]
    async fn failed_run_restores_previous_token() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_reference(dir.path(), BOUNDARIES);
        let executor = ScriptedExecutor::new()
            .on(
                CASES_PAGE_1,
                Scripted::ok(PAGE_1).with_header(LAST_MODIFIED, "Tue, 03 Nov 2020 16:00:00 GMT"),
            )
            .on(OBSERVATIONS, Scripted::ok("not json"));
        let pipeline = Pipeline::prepare(&config, Arc::new(executor)).unwrap();
        let mut detector = change_detector(pipeline.executor(), &config.api)
            .with_token("Mon, 02 Nov 2020 16:00:00 GMT");
        let sink = MemorySink::new();

        let result = pipeline.run_if_changed(&mut detector, &sink).await;

        assert!(result.is_err());
        assert_eq!(detector.token(), Some("Mon, 02 Nov 2020 16:00:00 GMT"));
        assert_eq!(sink.write_count(), 0);
    }

    #[test]
    fn file_sink_needs_no_token() {
        let sink = build_sink(
            &SinkConfig::File {
                path: "out.lp".into(),
            },
            &RetryConfig::default(),
        );
        assert!(sink.is_ok());
    }

    #[test]
    fn only_partial_sink_failures_report_stored_points() {
        let partial = IngestError::Sink(SinkError::Partial {
            written: 5_000,
            total: 12_000,
            source: Box::new(SinkError::Rejected {
                status: 503,
                message: "unavailable".to_string(),
            }),
        });
        let rejected = IngestError::Sink(SinkError::Rejected {
            status: 400,
            message: "bad line".to_string(),
        });
        let timeout = IngestError::Fetch(FetchError::Timeout(Duration::from_secs(1)));

        assert_eq!(partial.points_written(), 5_000);
        assert_eq!(rejected.points_written(), 0);
        assert_eq!(timeout.points_written(), 0);
    }
}
