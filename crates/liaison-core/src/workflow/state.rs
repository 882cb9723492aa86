//! States and events of the issuance flow

use crate::composer::RenderedDocument;
use crate::preview::PreviewImage;
use liaison_types::{EmployeeRecord, LedgerEntry, LetterRequest, Period};
use std::fmt;
use std::path::PathBuf;

/// Where the clerk is in producing one letter.
///
/// `Composing` and `Confirmed` are held only while the corresponding event
/// is being processed; `LedgerAppended` and `Cancelled` are terminal.
#[derive(Debug, Clone, Default)]
pub enum IssuanceState {
    #[default]
    Idle,
    Searching {
        query: String,
        hits: Vec<EmployeeRecord>,
    },
    RecordSelected {
        record: EmployeeRecord,
    },
    Composing {
        record: EmployeeRecord,
        request: LetterRequest,
    },
    PreviewReady {
        record: EmployeeRecord,
        request: LetterRequest,
        document: RenderedDocument,
        preview: PreviewImage,
        /// Period already covered in the ledger, if any
        duplicate: Option<Period>,
    },
    Confirmed {
        record: EmployeeRecord,
        request: LetterRequest,
        document: RenderedDocument,
        preview: PreviewImage,
    },
    LedgerAppended {
        entry: LedgerEntry,
        path: PathBuf,
    },
    Cancelled,
}

impl IssuanceState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Searching { .. } => "Searching",
            Self::RecordSelected { .. } => "RecordSelected",
            Self::Composing { .. } => "Composing",
            Self::PreviewReady { .. } => "PreviewReady",
            Self::Confirmed { .. } => "Confirmed",
            Self::LedgerAppended { .. } => "LedgerAppended",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LedgerAppended { .. } | Self::Cancelled)
    }

    /// Record the flow is currently about, if one is selected
    pub fn record(&self) -> Option<&EmployeeRecord> {
        match self {
            Self::RecordSelected { record }
            | Self::Composing { record, .. }
            | Self::PreviewReady { record, .. }
            | Self::Confirmed { record, .. } => Some(record),
            _ => None,
        }
    }
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceEvent {
    Search(String),
    /// Matricule of the chosen employee
    Select(String),
    Compose(LetterRequest),
    Confirm,
    Cancel,
    Reset,
}

impl IssuanceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search(_) => "Search",
            Self::Select(_) => "Select",
            Self::Compose(_) => "Compose",
            Self::Confirm => "Confirm",
            Self::Cancel => "Cancel",
            Self::Reset => "Reset",
        }
    }
}
