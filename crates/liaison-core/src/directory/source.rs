//! Decoding and column mapping for the personnel export

use super::normalize::{clean_cell, format_cin, format_cnss, normalize_for_match};
use crate::error::{LiaisonError, Result};
use encoding_rs::WINDOWS_1252;
use liaison_types::EmployeeRecord;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CANDIDATE_DELIMITERS: &[u8] = &[b';', b',', b'\t'];

/// How to turn the raw export bytes into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceEncoding {
    /// UTF-8 when the whole file is valid UTF-8, Windows-1252 otherwise
    #[default]
    Auto,
    Utf8,
    #[serde(alias = "cp1252", alias = "windows-1252")]
    Windows1252,
}

#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// `None` detects the delimiter from the header line
    pub delimiter: Option<u8>,
    pub encoding: SourceEncoding,
}

pub(crate) fn decode_source(bytes: &[u8], encoding: SourceEncoding) -> Result<Cow<'_, str>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    match encoding {
        SourceEncoding::Utf8 => std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|e| LiaisonError::DataFormat(format!("Employee table is not valid UTF-8: {}", e))),
        SourceEncoding::Windows1252 => Ok(WINDOWS_1252.decode_without_bom_handling(bytes).0),
        SourceEncoding::Auto => match std::str::from_utf8(bytes) {
            Ok(text) => Ok(Cow::Borrowed(text)),
            Err(_) => {
                log::debug!("Employee table is not UTF-8, decoding as Windows-1252");
                Ok(WINDOWS_1252.decode_without_bom_handling(bytes).0)
            }
        },
    }
}

/// Pick the most frequent candidate delimiter on the header line.
/// Ties and header lines without any candidate fall back to `;`.
pub(crate) fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");

    let mut best = b';';
    let mut best_count = 0;
    for &candidate in CANDIDATE_DELIMITERS {
        let count = header.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Id,
    LastName,
    FirstName,
    Cin,
    Cnss,
    CnssKey,
}

/// Recognize a column from its header text
pub(crate) fn classify_header(name: &str) -> Option<Field> {
    let key = normalize_for_match(name);
    let has_word = |word: &str| {
        key.split(|c: char| !c.is_alphanumeric())
            .any(|w| w == word)
    };

    if key.contains("matric") {
        Some(Field::Id)
    } else if key.contains("cle du numero de securite") || (key.contains("cle") && has_word("cnss")) {
        Some(Field::CnssKey)
    } else if key.contains("numero de securite") || has_word("cnss") {
        Some(Field::Cnss)
    } else if key.contains("carte de sejour") || key.contains("carte de travail") || has_word("cin") {
        Some(Field::Cin)
    } else if key.contains("prenom") {
        Some(Field::FirstName)
    } else if has_word("nom") {
        Some(Field::LastName)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnMap {
    pub id: usize,
    pub last_name: usize,
    pub first_name: Option<usize>,
    pub cin: Option<usize>,
    pub cnss: Option<usize>,
    pub cnss_key: Option<usize>,
}

pub(crate) fn map_columns(headers: &[String]) -> Result<ColumnMap> {
    let mut id = None;
    let mut last_name = None;
    let mut first_name = None;
    let mut cin = None;
    let mut cnss = None;
    let mut cnss_key = None;

    for (index, header) in headers.iter().enumerate() {
        let slot = match classify_header(header) {
            Some(Field::Id) => &mut id,
            Some(Field::LastName) => &mut last_name,
            Some(Field::FirstName) => &mut first_name,
            Some(Field::Cin) => &mut cin,
            Some(Field::Cnss) => &mut cnss,
            Some(Field::CnssKey) => &mut cnss_key,
            None => continue,
        };
        // A repeated header keeps its first column
        if slot.is_none() {
            *slot = Some(index);
        }
    }

    let mut missing = Vec::new();
    if id.is_none() {
        missing.push("Matricule");
    }
    if last_name.is_none() {
        missing.push("Nom");
    }

    match (id, last_name) {
        (Some(id), Some(last_name)) => {
            let map = ColumnMap {
                id,
                last_name,
                first_name,
                cin,
                cnss,
                cnss_key,
            };
            log::debug!("Employee column mapping: {:?}", map);
            Ok(map)
        }
        _ => Err(LiaisonError::DataFormat(format!(
            "Missing required column(s): {} (found: {})",
            missing.join(", "),
            headers.join(" | ")
        ))),
    }
}

fn field(row: &csv::StringRecord, column: Option<usize>) -> &str {
    column.and_then(|c| row.get(c)).map(clean_cell).unwrap_or("")
}

/// Parse every employee row. Fully blank rows are skipped; any other row
/// without a matricule fails the whole load.
pub(crate) fn read_records(text: &str, delimiter: u8) -> Result<Vec<EmployeeRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LiaisonError::DataFormat(format!("Unreadable header row: {}", e)))?
        .iter()
        .map(|h| clean_cell(h).to_string())
        .collect();
    log::debug!("Employee table columns: {:?}", headers);

    let columns = map_columns(&headers)?;
    let mut records = Vec::new();

    for (index, row) in reader.records().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = row.map_err(|e| LiaisonError::DataFormat(format!("Row {}: {}", line, e)))?;

        if row.iter().all(|field| clean_cell(field).is_empty()) {
            continue;
        }

        let cell = |column: Option<usize>| field(&row, column);

        let id = cell(Some(columns.id));
        if id.is_empty() {
            return Err(LiaisonError::DataFormat(format!("Row {} has no matricule", line)));
        }

        records.push(EmployeeRecord {
            id: id.to_string(),
            last_name: cell(Some(columns.last_name)).to_string(),
            first_name: cell(columns.first_name).to_string(),
            cin: format_cin(cell(columns.cin)),
            cnss: format_cnss(cell(columns.cnss), cell(columns.cnss_key)),
        });
    }

    Ok(records)
}
