//! Liaison Core Library
//!
//! Business logic for the liaison letter workstation: the employee
//! directory, letter composition, the issuance ledger, first-page previews
//! and the issuance session that ties them together.

pub mod composer;
pub mod config;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod paths;
pub mod preview;
pub mod workflow;

// Re-export main types for easy access
pub use config::LiaisonConfig;
pub use error::{LiaisonError, Result};

pub use composer::{LetterAssets, LetterComposer, RenderedDocument};
pub use directory::{EmployeeDirectory, SourceEncoding, SourceOptions};
pub use ledger::IssuanceLedger;
pub use preview::{PreviewImage, PreviewRenderer};

pub use workflow::{IssuanceEvent, IssuanceServices, IssuanceSession, IssuanceState, IssuanceSteps};

pub use liaison_types::{EmployeeRecord, LedgerEntry, LetterRequest, Period, PeriodGranularity};
