//! `InfluxDB` line protocol encoding, second precision.
//!
//! ```text
//! confirmedCases,areaCode=E1,areaKind=ltla,areaName=Alpha daily=50,dailyPer100k=25 1604275200
//! ```
//!
//! Tag keys are written in sorted order. Tag values escape commas, equals
//! signs and spaces; the measurement escapes commas and spaces. Line breaks
//! cannot be escaped in either, so they are written as spaces.

use std::fmt::Write as _;

use crate::NormalizedPoint;

/// Encodes one point as a single line (no trailing newline).
#[must_use]
pub fn encode(point: &NormalizedPoint) -> String {
    let mut line = escape(point.measurement.as_ref(), &[',', ' ']);

    let mut tags: Vec<(&str, &str)> = vec![
        ("areaCode", point.area_code.as_str()),
        ("areaKind", point.area_kind.as_ref()),
        ("areaName", point.area_name.as_str()),
    ];
    if let Some(facility) = &point.facility {
        tags.push(("facility", facility.as_str()));
    }
    tags.sort_by(|a, b| a.0.cmp(b.0));

    for (key, value) in tags {
        if value.is_empty() {
            continue;
        }
        let _ = write!(line, ",{key}={}", escape(value, &[',', '=', ' ']));
    }

    let mut fields = Vec::with_capacity(point.fields.len() * 2);
    for field in &point.fields {
        fields.push(format!("{}={}", field.name, field.raw));
        if let Some(per_capita) = field.per_capita {
            fields.push(format!("{}Per100k={per_capita}", field.name));
        }
    }

    let _ = write!(line, " {} {}", fields.join(","), point.timestamp().timestamp());
    line
}

/// Encodes a batch of points, one per line.
#[must_use]
pub fn encode_all(points: &[NormalizedPoint]) -> String {
    points
        .iter()
        .map(encode)
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        let c = if matches!(c, '\n' | '\r') { ' ' } else { c };
        if special.contains(&c) || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
