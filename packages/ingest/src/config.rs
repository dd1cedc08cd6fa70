//! Ingestion configuration.
//!
//! A default configuration is baked into the binary at compile time via
//! [`include_str!`]; `--config <path>` replaces it with a file of the same
//! shape. Secrets are never stored in the file: the sink token is read from
//! the environment variable the config names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use case_tracker_points::AreaKind;
use case_tracker_source::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy};
use case_tracker_spatial::BoundaryProperties;
use serde::Deserialize;

/// Configuration embedded at compile time.
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The TOML did not match the expected shape.
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    /// The environment variable holding a secret is unset.
    #[error("Environment variable {0} is not set")]
    MissingSecret(String),
}

/// Root of the TOML document.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Remote API locations.
    pub api: ApiConfig,
    /// Per-request retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Static reference data.
    pub reference: ReferenceConfig,
    /// Where points are written.
    pub sink: SinkConfig,
    /// `watch` subcommand settings.
    #[serde(default)]
    pub watch: WatchConfig,
}

impl IngestConfig {
    /// Parses the embedded default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the embedded document is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the document does not match.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::de::from_str(text)?)
    }
}

/// `[api]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API origin; pagination cursors are resolved against it.
    pub base_url: String,
    /// Path and query of the first case listing page.
    pub cases_path: String,
    /// Full URL of the facility observation endpoint.
    pub observations_url: String,
    /// Wall-clock budget for both fetches together, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    600
}

impl ApiConfig {
    /// URL of the first case listing page.
    #[must_use]
    pub fn cases_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.cases_path)
    }

    /// Overall fetch timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further retry.
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_secs: DEFAULT_BASE_DELAY.as_secs(),
        }
    }
}

impl RetryConfig {
    /// The configured policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.base_delay_secs))
    }
}

/// `[reference]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    /// `GeoJSON` boundary file.
    pub boundaries: PathBuf,
    /// Feature property holding the area name.
    pub area_name_property: String,
    /// Feature property holding the area code.
    #[serde(default)]
    pub area_code_property: Option<String>,
    /// Facility directory file.
    pub facilities: PathBuf,
    /// `areaCode,population` CSV. Without it no per-capita fields are
    /// written.
    #[serde(default)]
    pub population: Option<PathBuf>,
    /// Area kind of the case listing, written as the `areaKind` tag.
    pub area_kind: AreaKind,
}

impl ReferenceConfig {
    /// Property mapping for the boundary file.
    #[must_use]
    pub fn boundary_properties(&self) -> BoundaryProperties {
        let properties = BoundaryProperties::named(&self.area_name_property);
        match &self.area_code_property {
            Some(code) => properties.with_code(code),
            None => properties,
        }
    }
}

/// `[sink]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// `InfluxDB` v2 HTTP write API.
    Influx {
        /// Server root URL.
        url: String,
        /// Organisation.
        org: String,
        /// Bucket.
        bucket: String,
        /// Environment variable holding the API token.
        token_env: String,
        /// Points per write request.
        #[serde(default)]
        batch_size: Option<usize>,
    },
    /// Line protocol written to a local file.
    File {
        /// Output path.
        path: PathBuf,
    },
}

impl SinkConfig {
    /// Reads the token for an `influx` sink from its environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] if the variable is unset.
    pub fn token(&self) -> Result<Option<String>, ConfigError> {
        match self {
            Self::Influx { token_env, .. } => std::env::var(token_env)
                .map(Some)
                .map_err(|_| ConfigError::MissingSecret(token_env.clone())),
            Self::File { .. } => Ok(None),
        }
    }
}

/// `[watch]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WatchConfig {
    /// Seconds between freshness checks.
    pub interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { interval_secs: 900 }
    }
}

impl WatchConfig {
    /// Time between freshness checks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_config_parses() {
        let config = IngestConfig::embedded().unwrap();

        assert_eq!(config.reference.area_kind, AreaKind::Ltla);
        assert_eq!(config.retry.max_retries, 8);
        assert_eq!(config.api.timeout(), Duration::from_secs(600));
        assert!(
            config
                .api
                .cases_url()
                .starts_with("https://api.coronavirus.data.gov.uk/v1/data?")
        );
        assert!(matches!(config.sink, SinkConfig::Influx { .. }));
        assert_eq!(
            config.reference.boundary_properties(),
            BoundaryProperties::named("LAD20NM").with_code("LAD20CD")
        );
    }

    #[test]
    fn optional_sections_take_defaults() {
        let config = IngestConfig::parse(
            r#"
            [api]
            base_url = "https://api.example.org/"
            cases_path = "/v1/data?page=1"
            observations_url = "https://api.example.org/v2/data"

            [reference]
            boundaries = "b.geojson"
            area_name_property = "NAME"
            facilities = "f.json"
            area_kind = "utla"

            [sink]
            type = "file"
            path = "out.lp"
            "#,
        )
        .unwrap();

        assert_eq!(config.api.cases_url(), "https://api.example.org/v1/data?page=1");
        assert_eq!(config.api.timeout_secs, 600);
        assert_eq!(config.retry.policy().max_attempts(), 9);
        assert_eq!(config.watch.interval(), Duration::from_secs(900));
        assert!(config.reference.population.is_none());
        assert_eq!(config.sink.token().unwrap(), None);
    }

    #[test]
    fn unknown_sink_type_is_rejected() {
        let result = IngestConfig::parse(
            r#"
            [api]
            base_url = "https://api.example.org"
            cases_path = "/v1/data"
            observations_url = "https://api.example.org/v2/data"

            [reference]
            boundaries = "b.geojson"
            area_name_property = "NAME"
            facilities = "f.json"
            area_kind = "ltla"

            [sink]
            type = "carrier_pigeon"
            "#,
        );

        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn missing_token_variable_is_reported() {
        const VAR: &str = "CASE_TRACKER_TEST_TOKEN_THAT_IS_NEVER_SET";
        let sink = SinkConfig::Influx {
            url: "http://localhost:8086".to_string(),
            org: "org".to_string(),
            bucket: "bucket".to_string(),
            token_env: VAR.to_string(),
            batch_size: None,
        };

        assert!(matches!(sink.token(), Err(ConfigError::MissingSecret(var)) if var == VAR));
    }
}
