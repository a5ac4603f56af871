use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can abort a relay run.
///
/// None of these are recovered where they happen; they bubble up to
/// [`crate::relay::Relay::run_and_report`], which turns the `Display` text into
/// the single failure notification of the run.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("panel request failed ({status}): {body}")]
    PanelRequest { status: StatusCode, body: String },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),
}

impl RelayError {
    pub(crate) fn upload(stage: &str, detail: impl std::fmt::Display) -> Self {
        RelayError::Upload(format!("{}: {}", stage, detail))
    }
}
