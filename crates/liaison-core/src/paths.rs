/// Path constants and naming conventions for generated files
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE_NAME: &str = "liaison.json";
pub const LETTER_FILE_PREFIX: &str = "lettre_liaison";
pub const PREVIEW_FILE_NAME: &str = "apercu_lettre.png";

/// Conventional PDF name: `lettre_liaison_<id>_<yyyymmdd>.pdf`
pub fn letter_file_name(employee_id: &str, issue_date: NaiveDate) -> String {
    format!(
        "{}_{}_{}.pdf",
        LETTER_FILE_PREFIX,
        sanitize_component(employee_id),
        issue_date.format("%Y%m%d")
    )
}

pub fn preview_path(output_dir: &Path) -> PathBuf {
    output_dir.join(PREVIEW_FILE_NAME)
}

/// Directory that holds the ledger; temporary files are created there so the
/// final rename stays on one filesystem
pub fn ledger_dir(ledger_path: &Path) -> PathBuf {
    match ledger_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
