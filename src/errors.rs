use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RomfetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Scan cancelled")]
    ScanCancelled,
    #[error("Transfer cancelled between files")]
    CancelledBetweenFiles,
    #[error("Transfer cancelled while downloading {file}")]
    CancelledMidFile { file: String },
    #[error("Extraction cancelled")]
    ExtractionCancelled,
}

impl RomfetchError {
    /// Cancellation is a clean outcome, not a failure; the orchestrator folds
    /// these into a cancelled summary instead of an error report.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            RomfetchError::ScanCancelled
                | RomfetchError::CancelledBetweenFiles
                | RomfetchError::CancelledMidFile { .. }
                | RomfetchError::ExtractionCancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, RomfetchError>;
