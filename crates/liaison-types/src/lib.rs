//! Shared value types for the liaison letter workstation

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Date layouts accepted on input, ISO first
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueParseError {
    #[error("Unrecognized date: '{0}'")]
    Date(String),

    #[error("Unrecognized period: '{0}' (expected YYYY-MM or YYYY-MM-DD)")]
    Period(String),
}

/// One employee row from the personnel export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    /// Matricule
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    /// National identity card number, 8 digits or empty
    pub cin: String,
    /// Social security number including its 2-digit key, or empty
    pub cnss: String,
}

impl EmployeeRecord {
    /// "Nom Prénom", the order used on the letter and in the ledger
    pub fn full_name(&self) -> String {
        match (self.last_name.is_empty(), self.first_name.is_empty()) {
            (false, false) => format!("{} {}", self.last_name, self.first_name),
            (false, true) => self.last_name.clone(),
            (true, _) => self.first_name.clone(),
        }
    }
}

/// Letter metadata entered by the clerk for one generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterRequest {
    pub employee_id: String,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub admission_time: Option<NaiveTime>,
    pub hospital_name: String,
    /// Falls back to the hospital catalogue when absent
    #[serde(default)]
    pub hospital_address: Option<String>,
    #[serde(default)]
    pub requesting_physician: String,
    #[serde(default)]
    pub treating_physicians: String,
    pub care_type: String,
}

impl LetterRequest {
    pub fn new(
        employee_id: impl Into<String>,
        issue_date: NaiveDate,
        hospital_name: impl Into<String>,
        care_type: impl Into<String>,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            issue_date,
            admission_time: None,
            hospital_name: hospital_name.into(),
            hospital_address: None,
            requesting_physician: String::new(),
            treating_physicians: String::new(),
            care_type: care_type.into(),
        }
    }

    pub fn with_admission_time(mut self, time: NaiveTime) -> Self {
        self.admission_time = Some(time);
        self
    }

    pub fn with_hospital_address(mut self, address: impl Into<String>) -> Self {
        self.hospital_address = Some(address.into());
        self
    }

    pub fn with_physicians(mut self, requesting: impl Into<String>, treating: impl Into<String>) -> Self {
        self.requesting_physician = requesting.into();
        self.treating_physicians = treating.into();
        self
    }

    /// Names of required fields that are blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.employee_id.trim().is_empty() {
            missing.push("employee_id");
        }
        if self.hospital_name.trim().is_empty() {
            missing.push("hospital_name");
        }
        if self.care_type.trim().is_empty() {
            missing.push("care_type");
        }
        missing
    }

    /// Ledger reference, e.g. `LL-1042-20240301`
    pub fn reference(&self) -> String {
        format!("LL-{}-{}", self.employee_id.trim(), self.issue_date.format("%Y%m%d"))
    }
}

/// Time granularity of duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodGranularity {
    Day,
    #[default]
    Month,
}

/// A calendar day or month against which issuances are deduplicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
}

impl Period {
    pub fn of(date: NaiveDate, granularity: PeriodGranularity) -> Self {
        match granularity {
            PeriodGranularity::Day => Self::Day(date),
            PeriodGranularity::Month => Self::Month {
                year: date.year(),
                month: date.month(),
            },
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Self::Day(day) => day == date,
            Self::Month { year, month } => date.year() == year && date.month() == month,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day(day) => write!(f, "{}", day.format("%Y-%m-%d")),
            Self::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
        }
    }
}

impl FromStr for Period {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok((date, _)) = parse_admission(s) {
            return Ok(Self::Day(date));
        }

        let err = || ValueParseError::Period(s.to_string());
        let (first, second) = s.split_once(['-', '/']).ok_or_else(err)?;
        // Accept both YYYY-MM and MM/YYYY
        let (year, month) = if first.len() == 4 {
            (first, second)
        } else {
            (second, first)
        };
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        if !(1..=12).contains(&month) {
            return Err(err());
        }
        Ok(Self::Month { year, month })
    }
}

/// Parse an admission date with an optional time of day.
///
/// Accepts `2024-03-01`, `01/03/2024`, `01-03-2024`, each optionally followed
/// by `HH:MM` or `HH:MM:SS` (separated by a space or `T`).
pub fn parse_admission(input: &str) -> Result<(NaiveDate, Option<NaiveTime>), ValueParseError> {
    let input = input.trim();
    let (date_part, time_part) = match input.split_once([' ', 'T']) {
        Some((date, time)) => (date.trim(), Some(time.trim())),
        None => (input, None),
    };

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .ok_or_else(|| ValueParseError::Date(input.to_string()))?;

    let time = match time_part {
        None | Some("") => None,
        Some(time) => Some(
            TIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveTime::parse_from_str(time, fmt).ok())
                .ok_or_else(|| ValueParseError::Date(input.to_string()))?,
        ),
    };

    Ok((date, time))
}

/// ISO rendering used in the ledger: `2024-03-01` or `2024-03-01 08:30:00`
pub fn format_admission_iso(date: NaiveDate, time: Option<NaiveTime>) -> String {
    match time {
        Some(time) => format!("{} {}", date.format("%Y-%m-%d"), time.format("%H:%M:%S")),
        None => date.format("%Y-%m-%d").to_string(),
    }
}

/// French rendering used on the letter: `01/03/2024` or `01/03/2024 08:30`
pub fn format_admission_fr(date: NaiveDate, time: Option<NaiveTime>) -> String {
    match time {
        Some(time) => format!("{} {}", date.format("%d/%m/%Y"), time.format("%H:%M")),
        None => date.format("%d/%m/%Y").to_string(),
    }
}

/// One issued letter, as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub employee_id: String,
    pub full_name: String,
    pub cin: String,
    pub cnss: String,
    pub admission_date: NaiveDate,
    pub admission_time: Option<NaiveTime>,
    pub hospital: String,
    pub care_type: String,
    pub reference: String,
    pub recorded_at: NaiveDateTime,
}

impl LedgerEntry {
    /// Derive the ledger row for a letter built from `record` and `request`
    pub fn from_issuance(
        record: &EmployeeRecord,
        request: &LetterRequest,
        recorded_at: NaiveDateTime,
    ) -> Self {
        Self {
            employee_id: record.id.clone(),
            full_name: record.full_name(),
            cin: record.cin.clone(),
            cnss: record.cnss.clone(),
            admission_date: request.issue_date,
            admission_time: request.admission_time,
            hospital: request.hospital_name.trim().to_string(),
            care_type: request.care_type.trim().to_string(),
            reference: request.reference(),
            recorded_at,
        }
    }

    pub fn period(&self, granularity: PeriodGranularity) -> Period {
        Period::of(self.admission_date, granularity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_full_name_orders_last_then_first() {
        let record = EmployeeRecord {
            id: "1042".to_string(),
            last_name: "Dupont".to_string(),
            first_name: "Jean".to_string(),
            cin: String::new(),
            cnss: String::new(),
        };
        assert_eq!(record.full_name(), "Dupont Jean");

        let only_last = EmployeeRecord {
            first_name: String::new(),
            ..record
        };
        assert_eq!(only_last.full_name(), "Dupont");
    }

    #[test]
    fn test_parse_admission_formats() {
        assert_eq!(parse_admission("2024-03-01").unwrap(), (date(2024, 3, 1), None));
        assert_eq!(parse_admission("01/03/2024").unwrap(), (date(2024, 3, 1), None));

        let (d, t) = parse_admission("01/03/2024 08:30:15").unwrap();
        assert_eq!(d, date(2024, 3, 1));
        assert_eq!(t, NaiveTime::from_hms_opt(8, 30, 15));

        let (_, t) = parse_admission("2024-03-01T09:05").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(9, 5, 0));

        assert!(parse_admission("March 1st").is_err());
        assert!(parse_admission("2024-03-01 25:00").is_err());
    }

    #[test]
    fn test_period_month_contains_whole_month() {
        let period: Period = "2024-03".parse().unwrap();
        assert_eq!(period, Period::Month { year: 2024, month: 3 });
        assert!(period.contains(date(2024, 3, 1)));
        assert!(period.contains(date(2024, 3, 31)));
        assert!(!period.contains(date(2024, 4, 1)));
        assert!(!period.contains(date(2023, 3, 15)));
        assert_eq!(period.to_string(), "2024-03");
    }

    #[test]
    fn test_period_day_and_alternative_forms() {
        let day: Period = "2024-03-01".parse().unwrap();
        assert_eq!(day, Period::Day(date(2024, 3, 1)));
        assert!(!day.contains(date(2024, 3, 2)));

        let month: Period = "03/2024".parse().unwrap();
        assert_eq!(month, Period::Month { year: 2024, month: 3 });

        assert!("2024-13".parse::<Period>().is_err());
        assert!("soon".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_of_granularity() {
        let d = date(2024, 3, 17);
        assert_eq!(Period::of(d, PeriodGranularity::Day), Period::Day(d));
        assert_eq!(
            Period::of(d, PeriodGranularity::Month),
            Period::Month { year: 2024, month: 3 }
        );
    }

    #[test]
    fn test_request_missing_fields_and_reference() {
        let request = LetterRequest::new("1042", date(2024, 3, 1), "  ", "");
        assert_eq!(request.missing_fields(), vec!["hospital_name", "care_type"]);
        assert_eq!(request.reference(), "LL-1042-20240301");
    }

    #[test]
    fn test_granularity_serde_lowercase() {
        let json = serde_json::to_string(&PeriodGranularity::Day).unwrap();
        assert_eq!(json, "\"day\"");
        let parsed: PeriodGranularity = serde_json::from_str("\"month\"").unwrap();
        assert_eq!(parsed, PeriodGranularity::Month);
    }

    #[test]
    fn test_admission_formatting() {
        let t = NaiveTime::from_hms_opt(8, 30, 0);
        assert_eq!(format_admission_iso(date(2024, 3, 1), t), "2024-03-01 08:30:00");
        assert_eq!(format_admission_fr(date(2024, 3, 1), t), "01/03/2024 08:30");
        assert_eq!(format_admission_fr(date(2024, 3, 1), None), "01/03/2024");
    }
}
