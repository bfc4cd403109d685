use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TrialError {
    #[error("failed to read listing at {0}")]
    ListingRead(PathBuf),

    #[error("failed to parse listing: {0}")]
    ListingParse(String),

    #[error("listing source returned no rows")]
    #[diagnostic(help("check that the protocol listing page or export is reachable"))]
    EmptyListing,

    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("invalid alias {from:?} -> {to:?}: {reason}")]
    InvalidAlias {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid trial identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("ClinicalTrials.gov request failed: {0}")]
    CtgovHttp(String),

    #[error("ClinicalTrials.gov returned status {status}: {message}")]
    CtgovStatus { status: u16, message: String },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to write report: {0}")]
    Report(String),
}

impl TrialError {
    /// Process exit code: 2 for bad input or configuration, 3 when the lookup service failed.
    pub fn exit_code(&self) -> u8 {
        match self {
            TrialError::ListingRead(_)
            | TrialError::ListingParse(_)
            | TrialError::EmptyListing
            | TrialError::MissingConfig(_)
            | TrialError::ConfigRead(_)
            | TrialError::ConfigParse(_)
            | TrialError::InvalidConfig(_)
            | TrialError::InvalidAlias { .. }
            | TrialError::InvalidIdentifier(_) => 2,
            TrialError::CtgovHttp(_) | TrialError::CtgovStatus { .. } => 3,
            TrialError::WorkerPool(_) | TrialError::Filesystem(_) | TrialError::Report(_) => 1,
        }
    }
}
