//! Issuance ledger: the spreadsheet of every letter issued
//!
//! The whole workbook is held in memory as text cells. Appending rewrites
//! the file through a temporary sibling and a rename, so a failed write
//! leaves the previous ledger intact.

use crate::directory::normalize::normalize_for_match;
use crate::error::{LiaisonError, Result};
use crate::paths;
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use liaison_types::{format_admission_iso, parse_admission, LedgerEntry, Period, PeriodGranularity};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header written to new ledgers, in column order
pub const LEDGER_COLUMNS: [&str; 9] = [
    "Matricule",
    "Nom & Prénom",
    "CIN",
    "CNSS",
    "Date d'admission",
    "Lieu d'admission",
    "Type de prise en charge",
    "Référence",
    "Date d'enregistrement",
];

const RECORDED_AT_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const RECORDED_AT_FALLBACK_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Id,
    Name,
    Cin,
    Cnss,
    Admission,
    Place,
    /// `Hôpital`, written by older versions next to an empty `Lieu d'admission`
    LegacyHospital,
    Care,
    Reference,
    Recorded,
}

impl Column {
    const STANDARD: [Column; 9] = [
        Column::Id,
        Column::Name,
        Column::Cin,
        Column::Cnss,
        Column::Admission,
        Column::Place,
        Column::Care,
        Column::Reference,
        Column::Recorded,
    ];

    fn classify(header: &str) -> Option<Self> {
        let key = normalize_for_match(header).replace('\u{2019}', "'");
        let column = match key.as_str() {
            "matricule" => Self::Id,
            "nom & prenom" | "nom et prenom" | "nom prenom" => Self::Name,
            "cin" => Self::Cin,
            "cnss" => Self::Cnss,
            "date d'admission" => Self::Admission,
            "lieu d'admission" => Self::Place,
            "hopital" => Self::LegacyHospital,
            "type de prise en charge" => Self::Care,
            "reference" => Self::Reference,
            "date d'enregistrement" => Self::Recorded,
            _ => return None,
        };
        Some(column)
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Id => LEDGER_COLUMNS[0],
            Self::Name => LEDGER_COLUMNS[1],
            Self::Cin => LEDGER_COLUMNS[2],
            Self::Cnss => LEDGER_COLUMNS[3],
            Self::Admission => LEDGER_COLUMNS[4],
            Self::Place => LEDGER_COLUMNS[5],
            Self::LegacyHospital => "Hôpital",
            Self::Care => LEDGER_COLUMNS[6],
            Self::Reference => LEDGER_COLUMNS[7],
            Self::Recorded => LEDGER_COLUMNS[8],
        }
    }
}

/// Header positions of the known columns; unknown columns are carried along untouched
#[derive(Debug, Clone, Default)]
struct ColumnIndex {
    positions: Vec<(Column, usize)>,
}

impl ColumnIndex {
    fn from_header(header: &[String]) -> Self {
        let mut positions: Vec<(Column, usize)> = Vec::new();
        for (index, name) in header.iter().enumerate() {
            if let Some(column) = Column::classify(name) {
                if !positions.iter().any(|(c, _)| *c == column) {
                    positions.push((column, index));
                }
            }
        }
        Self { positions }
    }

    fn get(&self, column: Column) -> Option<usize> {
        self.positions
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, index)| *index)
    }
}

fn cell<'a>(row: &'a [String], column: Option<usize>) -> &'a str {
    column.and_then(|c| row.get(c)).map(|s| s.trim()).unwrap_or("")
}

fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

/// Text form of a cell as the clerk would see it
fn cell_text(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // Matricules saved as numbers by older versions
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{:.0}", f),
        Data::DateTime(dt) => match excel_serial_to_datetime(dt.as_f64()) {
            Some(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        other => other.to_string(),
    }
}

fn parse_recorded_at(text: &str) -> Option<NaiveDateTime> {
    std::iter::once(RECORDED_AT_FORMAT)
        .chain(RECORDED_AT_FALLBACK_FORMATS.iter().copied())
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn persistence(path: &Path, action: &str, e: impl std::fmt::Display) -> LiaisonError {
    LiaisonError::Persistence(format!("Failed to {} ledger {}: {}", action, path.display(), e))
}

pub struct IssuanceLedger {
    path: PathBuf,
    sheet_name: String,
    granularity: PeriodGranularity,
    header: Vec<String>,
    columns: ColumnIndex,
    /// Every data row as stored, including rows that do not parse
    rows: Vec<Vec<String>>,
    entries: Vec<LedgerEntry>,
}

impl IssuanceLedger {
    /// Open the ledger at `path`, or start an empty one if the file does not exist yet.
    ///
    /// An existing workbook is read from `sheet_name`, or from its first sheet
    /// when no sheet has that name.
    pub fn open<P: AsRef<Path>>(path: P, sheet_name: &str, granularity: PeriodGranularity) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let (sheet_name, mut header, rows) = if path.exists() {
            let (sheet, grid) = read_grid(&path, sheet_name)?;
            let mut grid = grid.into_iter().filter(|row| row.iter().any(|c| !c.trim().is_empty()));
            let header: Vec<String> = grid
                .next()
                .map(|row| row.into_iter().map(|c| c.trim().to_string()).collect())
                .unwrap_or_default();
            (sheet, header, grid.collect())
        } else {
            log::info!("Ledger {} does not exist yet, starting empty", path.display());
            (sheet_name.to_string(), Vec::new(), Vec::new())
        };

        if header.iter().all(|h| h.is_empty()) {
            header.clear();
        }
        let mut columns = ColumnIndex::from_header(&header);
        if !header.is_empty() && (columns.get(Column::Id).is_none() || columns.get(Column::Admission).is_none()) {
            return Err(LiaisonError::DataFormat(format!(
                "Ledger {} has no Matricule or Date d'admission column (found: {})",
                path.display(),
                header.join(" | ")
            )));
        }

        // Columns missing from older ledgers are added at the end
        for column in Column::STANDARD {
            if columns.get(column).is_none() {
                header.push(column.title().to_string());
                columns = ColumnIndex::from_header(&header);
            }
        }

        let mut ledger = Self {
            path,
            sheet_name,
            granularity,
            header,
            columns,
            rows,
            entries: Vec::new(),
        };
        ledger.entries = ledger
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| ledger.parse_row(i, row))
            .collect();

        log::info!(
            "Opened ledger {} with {} entries ({} rows)",
            ledger.path.display(),
            ledger.entries.len(),
            ledger.rows.len()
        );
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Period an admission on `date` falls into
    pub fn period_for(&self, date: NaiveDate) -> Period {
        Period::of(date, self.granularity)
    }

    /// Parsed entries in file order; rows without a readable id or date are left out
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Number of data rows on disk, parsed or not
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_duplicate(&self, employee_id: &str, period: &Period) -> bool {
        let employee_id = employee_id.trim();
        self.entries
            .iter()
            .any(|e| e.employee_id == employee_id && period.contains(e.admission_date))
    }

    /// Durably add `entry`. Fails with `DuplicateIssuance` when the employee
    /// already has a letter in the entry's period, and with `Persistence` when
    /// the workbook cannot be written; the ledger is unchanged in both cases.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<()> {
        // Stored the way it reads back, cells are trimmed on load
        let trim = |s: String| s.trim().to_string();
        let entry = LedgerEntry {
            employee_id: trim(entry.employee_id),
            full_name: trim(entry.full_name),
            cin: trim(entry.cin),
            cnss: trim(entry.cnss),
            hospital: trim(entry.hospital),
            care_type: trim(entry.care_type),
            reference: trim(entry.reference),
            ..entry
        };
        let period = entry.period(self.granularity);
        if self.has_duplicate(&entry.employee_id, &period) {
            return Err(LiaisonError::DuplicateIssuance {
                employee_id: entry.employee_id.clone(),
                period: period.to_string(),
            });
        }

        let row = self.row_for(&entry);
        let mut rows = self.rows.clone();
        rows.push(row);

        self.write(&rows)?;

        log::info!(
            "Recorded {} for employee {} in {}",
            entry.reference,
            entry.employee_id,
            self.path.display()
        );
        self.rows = rows;
        self.entries.push(entry);
        Ok(())
    }

    fn parse_row(&self, index: usize, row: &[String]) -> Option<LedgerEntry> {
        let get = |column: Column| cell(row, self.columns.get(column));

        let employee_id = get(Column::Id);
        let admission = get(Column::Admission);
        let (admission_date, admission_time) = match parse_admission(admission) {
            Ok(parsed) if !employee_id.is_empty() => parsed,
            _ => {
                log::warn!(
                    "Skipping ledger row {}: matricule {:?}, admission date {:?}",
                    index + 2,
                    employee_id,
                    admission
                );
                return None;
            }
        };

        let hospital = match get(Column::Place) {
            "" => get(Column::LegacyHospital),
            place => place,
        };

        let recorded_at = parse_recorded_at(get(Column::Recorded)).unwrap_or_else(|| {
            log::debug!("Ledger row {} has no readable registration date", index + 2);
            admission_date.and_time(admission_time.unwrap_or_default())
        });

        Some(LedgerEntry {
            employee_id: employee_id.to_string(),
            full_name: get(Column::Name).to_string(),
            cin: get(Column::Cin).to_string(),
            cnss: get(Column::Cnss).to_string(),
            admission_date,
            admission_time,
            hospital: hospital.to_string(),
            care_type: get(Column::Care).to_string(),
            reference: get(Column::Reference).to_string(),
            recorded_at,
        })
    }

    fn row_for(&self, entry: &LedgerEntry) -> Vec<String> {
        let mut row = vec![String::new(); self.header.len()];
        let mut set = |column: Column, value: String| {
            if let Some(index) = self.columns.get(column) {
                row[index] = value;
            }
        };

        set(Column::Id, entry.employee_id.clone());
        set(Column::Name, entry.full_name.clone());
        set(Column::Cin, entry.cin.clone());
        set(Column::Cnss, entry.cnss.clone());
        set(
            Column::Admission,
            format_admission_iso(entry.admission_date, entry.admission_time),
        );
        set(Column::Place, entry.hospital.clone());
        set(Column::LegacyHospital, entry.hospital.clone());
        set(Column::Care, entry.care_type.clone());
        set(Column::Reference, entry.reference.clone());
        set(
            Column::Recorded,
            entry.recorded_at.format(RECORDED_AT_FORMAT).to_string(),
        );
        row
    }

    fn write(&self, rows: &[Vec<String>]) -> Result<()> {
        let buffer = build_workbook(&self.sheet_name, &self.header, rows)
            .map_err(|e| persistence(&self.path, "build", e))?;

        let dir = paths::ledger_dir(&self.path);
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| persistence(&self.path, "stage", e))?;
        temp.write_all(&buffer)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| persistence(&self.path, "write", e))?;
        temp.persist(&self.path)
            .map_err(|e| persistence(&self.path, "replace", e.error))?;
        Ok(())
    }
}

fn read_grid(path: &Path, wanted_sheet: &str) -> Result<(String, Vec<Vec<String>>)> {
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| persistence(path, "open", e))?;

    let sheet_names = workbook.sheet_names().to_owned();
    let sheet = sheet_names
        .iter()
        .find(|name| name.as_str() == wanted_sheet)
        .or_else(|| sheet_names.first())
        .cloned()
        .ok_or_else(|| persistence(path, "read", "workbook has no sheets"))?;
    if sheet != wanted_sheet {
        log::debug!("Ledger has no sheet {:?}, reading {:?}", wanted_sheet, sheet);
    }

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| persistence(path, "read", e))?;

    let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
    let (row_offset, col_offset) = (row_offset as usize, col_offset as usize);
    let mut grid = vec![vec![String::new(); col_offset + range.width()]; row_offset + range.height()];
    for (row, col, data) in range.cells() {
        grid[row_offset + row][col_offset + col] = cell_text(data);
    }
    Ok((sheet, grid))
}

fn build_workbook(sheet_name: &str, header: &[String], rows: &[Vec<String>]) -> std::result::Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    for (col, title) in header.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, title, &bold)?;
    }
    for (r, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            if !value.is_empty() {
                worksheet.write_string(r as u32 + 1, col as u16, value)?;
            }
        }
    }

    workbook.save_to_buffer()
}
