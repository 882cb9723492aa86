//! Error types for the liaison workstation

use thiserror::Error;

/// Main error type for all liaison operations
#[derive(Error, Debug)]
pub enum LiaisonError {
    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Letter already issued for employee {employee_id} in period {period}")]
    DuplicateIssuance { employee_id: String, period: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Asset error: {0}")]
    Asset(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiaisonError {
    /// Whether the user can retry or correct input without restarting
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::DataFormat(_) | Self::Config(_) | Self::Asset(_))
    }
}

/// Result type for liaison operations
pub type Result<T> = std::result::Result<T, LiaisonError>;
