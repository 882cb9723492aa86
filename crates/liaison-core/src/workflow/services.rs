//! Production implementation of the issuance steps

use super::traits::IssuanceSteps;
use crate::composer::{LetterComposer, RenderedDocument};
use crate::config::LiaisonConfig;
use crate::directory::EmployeeDirectory;
use crate::error::Result;
use crate::ledger::IssuanceLedger;
use crate::preview::{PreviewImage, PreviewRenderer};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use liaison_types::{EmployeeRecord, LedgerEntry, LetterRequest, Period};
use std::path::PathBuf;

/// Directory, composer, renderer and ledger, built once at startup
pub struct IssuanceServices {
    directory: EmployeeDirectory,
    composer: LetterComposer,
    renderer: PreviewRenderer,
    ledger: IssuanceLedger,
    output_dir: PathBuf,
}

impl IssuanceServices {
    pub fn new(
        directory: EmployeeDirectory,
        composer: LetterComposer,
        renderer: PreviewRenderer,
        ledger: IssuanceLedger,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            directory,
            composer,
            renderer,
            ledger,
            output_dir,
        }
    }

    /// Load everything the config names. Any failure here is a startup error.
    pub fn from_config(config: &LiaisonConfig) -> Result<Self> {
        let options = config.employees.source_options()?;
        let directory = EmployeeDirectory::load(&config.employees.path, &options)?;
        let composer = LetterComposer::from_config(config)?;
        let renderer = PreviewRenderer::new(config.output.preview_dpi);
        let ledger = IssuanceLedger::open(
            &config.ledger.path,
            &config.ledger.sheet_name,
            config.ledger.period,
        )?;

        Ok(Self::new(
            directory,
            composer,
            renderer,
            ledger,
            config.output.directory.clone(),
        ))
    }

    pub fn directory(&self) -> &EmployeeDirectory {
        &self.directory
    }

    pub fn ledger(&self) -> &IssuanceLedger {
        &self.ledger
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }
}

impl IssuanceSteps for IssuanceServices {
    fn search(&self, query: &str) -> Vec<EmployeeRecord> {
        self.directory.search(query).into_iter().cloned().collect()
    }

    fn find_employee(&self, employee_id: &str) -> Option<EmployeeRecord> {
        self.directory.find_by_id(employee_id).cloned()
    }

    fn compose(&self, record: &EmployeeRecord, request: &LetterRequest) -> Result<RenderedDocument> {
        self.composer.compose(record, request)
    }

    fn render_preview(&self, document: &RenderedDocument) -> Result<PreviewImage> {
        self.renderer.render_first_page(&document.bytes)
    }

    fn period_for(&self, date: NaiveDate) -> Period {
        self.ledger.period_for(date)
    }

    fn has_duplicate(&self, employee_id: &str, period: &Period) -> bool {
        self.ledger.has_duplicate(employee_id, period)
    }

    fn save_document(&self, document: &RenderedDocument) -> Result<PathBuf> {
        document.write_to_dir(&self.output_dir)
    }

    fn record_issuance(&mut self, entry: LedgerEntry) -> Result<()> {
        self.ledger.append(entry)
    }

    fn now(&self) -> NaiveDateTime {
        // The ledger stores whole seconds
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}
