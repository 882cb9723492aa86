//! Collaborators the issuance session drives

use crate::composer::RenderedDocument;
use crate::error::Result;
use crate::preview::PreviewImage;
use chrono::{NaiveDate, NaiveDateTime};
use liaison_types::{EmployeeRecord, LedgerEntry, LetterRequest, Period};
use std::path::PathBuf;

/// One method per step of the issuance flow, with explicit inputs.
///
/// The production implementation is [`super::IssuanceServices`]; tests swap
/// in mocks to exercise the state machine without files.
pub trait IssuanceSteps {
    /// Ranked directory matches for a free-text query
    fn search(&self, query: &str) -> Vec<EmployeeRecord>;

    /// Exact matricule lookup
    fn find_employee(&self, employee_id: &str) -> Option<EmployeeRecord>;

    fn compose(&self, record: &EmployeeRecord, request: &LetterRequest) -> Result<RenderedDocument>;

    fn render_preview(&self, document: &RenderedDocument) -> Result<PreviewImage>;

    /// Duplicate-detection period an admission date belongs to
    fn period_for(&self, date: NaiveDate) -> Period;

    fn has_duplicate(&self, employee_id: &str, period: &Period) -> bool;

    /// Write the PDF to the output directory, returning its path
    fn save_document(&self, document: &RenderedDocument) -> Result<PathBuf>;

    /// Durably append to the ledger
    fn record_issuance(&mut self, entry: LedgerEntry) -> Result<()>;

    /// Registration timestamp for new ledger rows
    fn now(&self) -> NaiveDateTime;
}
