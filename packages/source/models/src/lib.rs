#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Wire types for the case-data and facility-observation APIs.
//!
//! The case listing endpoint returns [`CasePage`]s linked by a
//! [`Pagination::next`] cursor. The facility endpoint returns a single
//! [`FacilityObservationResponse`]. Records are immutable once fetched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily new-case count for one administrative area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    /// Specimen date the cases are attributed to.
    pub date: NaiveDate,
    /// Statistical area code (e.g. `"E06000001"`).
    pub area_code: String,
    /// Area name, used as the join key against boundary names.
    pub area_name: String,
    /// New cases by specimen date.
    #[serde(rename = "newCasesBySpecimenDate")]
    pub new_cases: u32,
}

/// Pagination block attached to every case listing page.
///
/// Only `next` drives the fetch loop; the remaining links are kept for
/// logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Cursor for the current page.
    #[serde(default)]
    pub current: Option<String>,
    /// Cursor for the next page. `None` or empty on the last page.
    #[serde(default)]
    pub next: Option<String>,
    /// Cursor for the previous page.
    #[serde(default)]
    pub previous: Option<String>,
    /// Cursor for the first page.
    #[serde(default)]
    pub first: Option<String>,
    /// Cursor for the last page.
    #[serde(default)]
    pub last: Option<String>,
}

impl Pagination {
    /// Returns the next-page cursor if one is present and non-empty.
    #[must_use]
    pub fn next_cursor(&self) -> Option<&str> {
        self.next.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// One page of the case listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CasePage {
    /// Number of records on this page, as reported by the server.
    #[serde(default)]
    pub length: Option<u64>,
    /// Server-side page size limit.
    #[serde(default)]
    pub max_page_limit: Option<u64>,
    /// Records on this page.
    pub data: Vec<CaseRecord>,
    /// Links to neighbouring pages. A page without a pagination block is
    /// the last page.
    #[serde(default)]
    pub pagination: Pagination,
}

/// A single dated observation for one hospital facility.
///
/// Every metric is optional: a `None` means the facility did not report
/// that metric for the date, which is distinct from reporting zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityObservationRecord {
    /// Observation date.
    pub date: NaiveDate,
    /// Facility (trust) code.
    pub area_code: String,
    /// Facility organisation name, used as the join key against the
    /// facility reference file.
    pub area_name: String,
    /// Patients in hospital with the disease.
    #[serde(default)]
    pub hospital_cases: Option<u32>,
    /// New admissions.
    #[serde(default)]
    pub new_admissions: Option<u32>,
    /// Occupied mechanical-ventilation beds.
    #[serde(default, rename = "covidOccupiedMVBeds")]
    pub occupied_beds: Option<u32>,
}

/// Body of the facility-observation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityObservationResponse {
    /// Number of records, as reported by the server.
    #[serde(default)]
    pub length: Option<u64>,
    /// All observation records.
    pub body: Vec<FacilityObservationRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_page_with_next_cursor() {
        let page: CasePage = serde_json::from_str(
            r#"{
                "length": 1,
                "maxPageLimit": 2500,
                "data": [{
                    "date": "2020-11-02",
                    "areaCode": "E06000001",
                    "areaName": "Hartlepool",
                    "newCasesBySpecimenDate": 42
                }],
                "pagination": {
                    "current": "/v1/data?page=1",
                    "next": "/v1/data?page=2",
                    "previous": null,
                    "first": "/v1/data?page=1",
                    "last": "/v1/data?page=9"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].new_cases, 42);
        assert_eq!(page.data[0].date, NaiveDate::from_ymd_opt(2020, 11, 2).unwrap());
        assert_eq!(page.pagination.next_cursor(), Some("/v1/data?page=2"));
    }

    #[test]
    fn empty_or_null_next_means_last_page() {
        let null_next = Pagination {
            next: None,
            ..Pagination::default()
        };
        let empty_next = Pagination {
            next: Some("  ".to_string()),
            ..Pagination::default()
        };
        assert!(null_next.next_cursor().is_none());
        assert!(empty_next.next_cursor().is_none());
    }

    #[test]
    fn rejects_negative_case_count() {
        let result: Result<CaseRecord, _> = serde_json::from_str(
            r#"{"date":"2020-11-02","areaCode":"E1","areaName":"A","newCasesBySpecimenDate":-1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_metrics_are_none_not_zero() {
        let response: FacilityObservationResponse = serde_json::from_str(
            r#"{"length": 1, "body": [{
                "date": "2020-11-02",
                "areaCode": "RXX",
                "areaName": "Example Hospitals NHS Trust",
                "hospitalCases": 12,
                "newAdmissions": null
            }]}"#,
        )
        .unwrap();

        let record = &response.body[0];
        assert_eq!(record.hospital_cases, Some(12));
        assert_eq!(record.new_admissions, None);
        assert_eq!(record.occupied_beds, None);
    }
}
