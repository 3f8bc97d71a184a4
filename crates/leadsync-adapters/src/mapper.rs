use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use leadsync_core::NormalizedLead;

use crate::{columns, SheetRow};

/// Id variants and ad-platform metadata that never reach the notes.
const IGNORED_COLUMNS: &[&str] = &[
    "Id",
    "id",
    "ID",
    "F",
    "ad_id",
    "ad_name",
    "adset_id",
    "adset_name",
    "campaign_id",
    "form_id",
    "form_name",
    "is_organic",
    "platform",
];

const MAPPED_COLUMNS: &[&str] = &[
    columns::FULL_NAME,
    columns::PHONE_NUMBER,
    columns::MANUAL_CONTACT,
    columns::EMAIL,
    columns::CREATED_TIME,
    columns::CAMPAIGN_NAME,
];

/// Export artifact prepended to phone numbers by the lead-ad platform.
const PHONE_EXPORT_PREFIX: &str = "p:";

const ZONED_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"];
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses the lead creation timestamp. Values without an offset are read as UTC.
pub fn parse_created_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts.and_utc());
        }
    }
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|ts| ts.and_utc())
    })
}

fn build_notes(row: &SheetRow) -> String {
    row.iter()
        .filter(|(column, _)| !IGNORED_COLUMNS.contains(column))
        .filter(|(column, _)| !MAPPED_COLUMNS.contains(column))
        .filter_map(|(column, value)| {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            let label = match column.trim() {
                "" => "Note",
                label => label,
            };
            Some(format!("{label}: {value}"))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Normalizes one validated row. Pure; never fails.
pub fn map_row(row: &SheetRow) -> NormalizedLead {
    let full_name = row.get(columns::FULL_NAME).unwrap_or_default();
    let mut name_parts = full_name.split_whitespace();
    let first_name = name_parts.next().unwrap_or_default().to_string();
    let last_name = name_parts.collect::<Vec<_>>().join(" ");

    let raw_phone = row
        .first_present(&[columns::PHONE_NUMBER, columns::MANUAL_CONTACT])
        .unwrap_or_default()
        .trim();
    let phone = raw_phone
        .strip_prefix(PHONE_EXPORT_PREFIX)
        .unwrap_or(raw_phone);

    NormalizedLead {
        first_name,
        last_name,
        email: non_empty(row.get(columns::EMAIL).unwrap_or_default()),
        phone: Some(phone).filter(|p| !p.is_empty()).map(str::to_string),
        notes: build_notes(row),
        created_at: row
            .get(columns::CREATED_TIME)
            .and_then(parse_created_time),
        campaign_name: non_empty(row.get(columns::CAMPAIGN_NAME).unwrap_or_default()),
    }
}
