//! Facility observation fetch.
//!
//! The facility endpoint returns every observation in a single
//! `{ "body": [...] }` document, so there is no pagination here; the
//! request still goes through whatever retry policy the executor carries.

use case_tracker_source_models::{FacilityObservationRecord, FacilityObservationResponse};

use crate::{FetchError, HttpExecutor};

/// Fetches all facility observations from `url`.
///
/// # Errors
///
/// Returns [`FetchError`] if the request fails or the body does not match
/// the expected shape.
pub async fn fetch_facility_observations<E: HttpExecutor + ?Sized>(
    executor: &E,
    url: &str,
) -> Result<Vec<FacilityObservationRecord>, FetchError> {
    log::info!("Fetching facility observations: {url}");

    let response = executor.get(url).await?;
    let parsed: FacilityObservationResponse =
        serde_json::from_str(&response.body).map_err(|e| FetchError::MalformedResponse {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    log::info!("Fetched {} facility observations", parsed.body.len());

    Ok(parsed.body)
}
