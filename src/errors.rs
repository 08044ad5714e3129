use std::io;

use thiserror::Error;

/// Failure to produce rows for one sector table.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("sector '{sector}' is unavailable: {reason}")]
    DataUnavailable { sector: String, reason: String },
    #[error("workbook could not be opened: {0}")]
    Workbook(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoadError {
    pub fn unavailable(sector: &str, reason: impl Into<String>) -> Self {
        LoadError::DataUnavailable {
            sector: sector.to_string(),
            reason: reason.into(),
        }
    }
}

/// Remote workbook download failures. None of these are retried within a
/// request; the caller decides whether to try again.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP request failed with status: {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("received HTML instead of a workbook - check the share link permissions")]
    HtmlPayload,
    #[error("downloaded file is not a valid workbook")]
    NotAWorkbook,
    #[error("could not stage downloaded workbook: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("no data source configured (set ONEDRIVE_DOWNLOAD_URL or provide a local workbook)")]
    NoSource,
    #[error("failed to download workbook: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Workbook(#[from] LoadError),
    #[error("no sector could be loaded from the source")]
    NothingLoaded,
    #[error("failed to persist snapshot: {0:#}")]
    Persist(anyhow::Error),
    #[error("processing task failed: {0}")]
    Task(String),
}

impl RefreshError {
    /// Remote fetch problems are transient from the caller's point of view.
    pub fn retryable(&self) -> bool {
        matches!(self, RefreshError::Fetch(_))
    }
}
