//! Hourly count records from the OGD Rosengartenbrücke feed.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const COLUMN_TIMESTAMP: &str = "Datum";
pub const COLUMN_CLASS: &str = "Klasse.Text";
pub const COLUMN_DIRECTION: &str = "Richtung";
pub const COLUMN_COUNT: &str = "Anzahl";

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M%z", "%Y-%m-%dT%H:%M:%S%z"];
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub count: u64,
    pub vehicle_class: String,
    pub direction: String,
    pub category: Option<String>,
}

impl Observation {
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    pub fn month(&self) -> u32 {
        self.timestamp.month()
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn weekday(&self) -> Weekday {
        self.timestamp.weekday()
    }

    pub fn iso_week(&self) -> u32 {
        self.timestamp.iso_week().week()
    }
}

/// Static many-to-one lookup from raw vehicle-class labels to coarser
/// categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMap {
    entries: HashMap<String, String>,
}

impl CategoryMap {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn rosengarten() -> Self {
        Self::new([
            ("Motorrad", "Motorrad"),
            ("Personenwagen", "Personenwagen"),
            ("Personenwagen mit Anhänger", "Personenwagen"),
            ("Lieferwagen", "Lieferwagen"),
            ("Lieferwagen mit Anhänger", "Lieferwagen"),
            ("Lieferwagen mit Auflieger", "Lieferwagen"),
            ("Lastwagen", "Lastwagen"),
            ("Sattelzug", "Lastwagen"),
            ("Lastenzug", "Lastwagen"),
            ("Bus", "Bus/Trolleybus"),
            ("Trolleybus", "Bus/Trolleybus"),
            ("Unbekannt", "Unbekannt"),
        ])
    }

    pub fn category_of(&self, vehicle_class: &str) -> Option<&str> {
        self.entries.get(vehicle_class).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("payload is missing column '{0}'")]
    MissingColumn(&'static str),
    #[error("failed to parse field {field} value '{value}' on line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
}

/// Parses a civil-time timestamp. Any UTC offset is dropped and the
/// wall-clock reading kept, so a spring-forward hour shows up as missing and
/// a fall-back hour collapses onto its twin.
pub fn parse_civil_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Some(dt.naive_local());
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }

    None
}

#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    timestamp: usize,
    class: usize,
    direction: usize,
    count: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self, RecordParseError> {
        let find = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
                .ok_or(RecordParseError::MissingColumn(name))
        };

        Ok(Self {
            timestamp: find(COLUMN_TIMESTAMP)?,
            class: find(COLUMN_CLASS)?,
            direction: find(COLUMN_DIRECTION)?,
            count: find(COLUMN_COUNT)?,
        })
    }
}

pub fn parse_ogd_csv(
    payload: &[u8],
    categories: &CategoryMap,
) -> Result<Vec<Observation>, RecordParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(payload);
    let columns = ColumnIndex::from_headers(reader.headers()?)?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        out.push(parse_observation(&record, columns, categories)?);
    }

    Ok(out)
}

fn parse_observation(
    record: &StringRecord,
    columns: ColumnIndex,
    categories: &CategoryMap,
) -> Result<Observation, RecordParseError> {
    let line = record.position().map(|p| p.line()).unwrap_or_default();

    let raw_ts = record.get(columns.timestamp).unwrap_or_default();
    // Rows off the hour would shift the whole expected hourly grid.
    let timestamp = parse_civil_timestamp(raw_ts)
        .filter(is_on_the_hour)
        .ok_or_else(|| RecordParseError::ParseField {
            field: COLUMN_TIMESTAMP,
            value: raw_ts.to_string(),
            line,
        })?;

    let count = parse_count(record.get(columns.count).unwrap_or_default(), line)?;
    let vehicle_class = record.get(columns.class).unwrap_or_default().trim().to_string();
    let direction = record
        .get(columns.direction)
        .unwrap_or_default()
        .trim()
        .to_string();
    let category = categories.category_of(&vehicle_class).map(str::to_string);

    Ok(Observation {
        timestamp,
        count,
        vehicle_class,
        direction,
        category,
    })
}

fn is_on_the_hour(ts: &NaiveDateTime) -> bool {
    ts.minute() == 0 && ts.second() == 0 && ts.nanosecond() == 0
}

fn parse_count(raw: &str, line: u64) -> Result<u64, RecordParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(0);
    }

    let parse_err = || RecordParseError::ParseField {
        field: COLUMN_COUNT,
        value: raw.to_string(),
        line,
    };

    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(value);
    }
    // Some yearly exports write counts as floats ("12.0").
    match trimmed.parse::<f64>() {
        Ok(value) if value >= 0.0 && value.fract() == 0.0 => Ok(value as u64),
        _ => Err(parse_err()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn civil(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn ogd_timestamps_keep_wall_clock_and_drop_offset() {
        assert_eq!(
            parse_civil_timestamp("2025-01-01T00:00+0100"),
            Some(civil(2025, 1, 1, 0))
        );
        assert_eq!(
            parse_civil_timestamp("2024-07-15T13:00+0200"),
            Some(civil(2024, 7, 15, 13))
        );
        assert_eq!(
            parse_civil_timestamp("2024-07-15T13:00:00+02:00"),
            Some(civil(2024, 7, 15, 13))
        );
        assert_eq!(
            parse_civil_timestamp("2024-07-15 13:00:00"),
            Some(civil(2024, 7, 15, 13))
        );
        assert_eq!(parse_civil_timestamp("yesterday"), None);
        assert_eq!(parse_civil_timestamp("  "), None);
    }

    #[test]
    fn fall_back_hour_collapses_to_same_civil_instant() {
        let summer = parse_civil_timestamp("2023-10-29T02:00+0200").unwrap();
        let winter = parse_civil_timestamp("2023-10-29T02:00+0100").unwrap();
        assert_eq!(summer, winter);
    }

    #[test]
    fn csv_columns_are_located_by_header_and_categories_applied() {
        let payload = "\u{feff}Datum,Standort,Richtung,Klasse.ID,Klasse.Text,Anzahl\n\
            2025-01-01T00:00+0100,Z001,Bucheggplatz,3,Sattelzug,4\n\
            2025-01-01T00:00+0100,Z001,Hardbrücke,1,Personenwagen,120\n\
            2025-01-01T01:00+0100,Z001,Hardbrücke,99,Velo,\n";

        let rows = parse_ogd_csv(payload.as_bytes(), &CategoryMap::rosengarten()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].timestamp, civil(2025, 1, 1, 0));
        assert_eq!(rows[0].direction, "Bucheggplatz");
        assert_eq!(rows[0].vehicle_class, "Sattelzug");
        assert_eq!(rows[0].category.as_deref(), Some("Lastwagen"));
        assert_eq!(rows[1].count, 120);
        assert_eq!(rows[2].count, 0);
        assert_eq!(rows[2].category, None);
    }

    #[test]
    fn missing_column_and_bad_values_are_rejected() {
        let no_count = "Datum,Richtung,Klasse.Text\n2025-01-01T00:00+0100,A,Bus\n";
        assert!(matches!(
            parse_ogd_csv(no_count.as_bytes(), &CategoryMap::default()).unwrap_err(),
            RecordParseError::MissingColumn("Anzahl")
        ));

        let bad_count = "Datum,Richtung,Klasse.Text,Anzahl\n2025-01-01T00:00+0100,A,Bus,-3\n";
        assert!(matches!(
            parse_ogd_csv(bad_count.as_bytes(), &CategoryMap::default()).unwrap_err(),
            RecordParseError::ParseField {
                field: "Anzahl",
                ..
            }
        ));

        let bad_ts = "Datum,Richtung,Klasse.Text,Anzahl\nsoon,A,Bus,3\n";
        assert!(matches!(
            parse_ogd_csv(bad_ts.as_bytes(), &CategoryMap::default()).unwrap_err(),
            RecordParseError::ParseField { field: "Datum", .. }
        ));
    }

    #[test]
    fn rows_off_the_hour_are_rejected() {
        let half_past = "Datum,Richtung,Klasse.Text,Anzahl\n\
            2024-01-01T00:00+0100,A,Bus,3\n\
            2024-01-01T00:30+0100,A,Bus,2\n";
        match parse_ogd_csv(half_past.as_bytes(), &CategoryMap::default()).unwrap_err() {
            RecordParseError::ParseField { field, value, line } => {
                assert_eq!(field, "Datum");
                assert_eq!(value, "2024-01-01T00:30+0100");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }

        let with_seconds = "Datum,Richtung,Klasse.Text,Anzahl\n2024-01-01 05:00:15,A,Bus,3\n";
        assert!(matches!(
            parse_ogd_csv(with_seconds.as_bytes(), &CategoryMap::default()).unwrap_err(),
            RecordParseError::ParseField { field: "Datum", .. }
        ));
    }

    #[test]
    fn float_counts_are_accepted_when_integral() {
        assert_eq!(parse_count("12.0", 2).unwrap(), 12);
        assert!(parse_count("12.5", 2).is_err());
    }

    #[test]
    fn derived_calendar_fields_follow_timestamp() {
        let obs = Observation {
            timestamp: civil(2021, 1, 2, 17),
            count: 1,
            vehicle_class: "Bus".to_string(),
            direction: "A".to_string(),
            category: None,
        };
        assert_eq!(obs.year(), 2021);
        assert_eq!(obs.month(), 1);
        assert_eq!(obs.hour(), 17);
        assert_eq!(obs.weekday(), Weekday::Sat);
        assert_eq!(obs.iso_week(), 53);
    }
}
