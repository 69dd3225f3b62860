use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    TransientNetwork,
    TerminalHttp,
    Extraction,
    Merge,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::TerminalHttp => "terminal_http",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Merge => "merge",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid day range {start}..={end}: start must be >= 1 and end >= start")]
    InvalidRange { start: u32, end: u32 },
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),
    #[error("url template must contain a {{day}} placeholder: {0}")]
    InvalidTemplate(String),
    #[error(transparent)]
    Fetcher(#[from] FetchError),
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::Fetcher(err) => err.kind(),
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure for {url} after {attempts} attempt(s): {message}")]
    Transient {
        url: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },
    #[error("non-retryable HTTP status {status} for {url}")]
    TerminalStatus { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid request header {name}: {message}")]
    InvalidHeader { name: String, message: String },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Transient { .. } => ErrorKind::TransientNetwork,
            FetchError::TerminalStatus { .. } | FetchError::Request { .. } => {
                ErrorKind::TerminalHttp
            }
            FetchError::InvalidHeader { .. } | FetchError::Client(_) => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("failed to read table {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse table {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write table {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode table {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("key column must not be empty")]
    EmptyKeyColumn,
}

impl MergeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Merge
    }
}

/// A failed day: always carries the day, the attempted url and the cause.
#[derive(Debug, Clone, Error, Serialize)]
#[error("day {day} ({url}) failed [{kind}]: {cause}")]
pub struct DayFailure {
    pub kind: ErrorKind,
    pub day: u32,
    pub url: String,
    pub cause: String,
}

impl DayFailure {
    pub fn new(kind: ErrorKind, day: u32, url: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            kind,
            day,
            url: url.into(),
            cause: cause.to_string(),
        }
    }

    pub fn from_fetch(day: u32, url: &str, err: &FetchError) -> Self {
        Self::new(err.kind(), day, url, err)
    }

    pub fn extraction(day: u32, url: &str) -> Self {
        Self::new(
            ErrorKind::Extraction,
            day,
            url,
            format!("could not extract readings for day {day}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_errors_report_the_kind_of_their_cause() {
        let transient = FetchError::Transient {
            url: "https://example.test/1".to_string(),
            attempts: 3,
            status: Some(503),
            message: "service unavailable".to_string(),
        };
        assert_eq!(PlanError::from(transient).kind(), ErrorKind::TransientNetwork);
        assert_eq!(
            PlanError::InvalidRange { start: 0, end: 1 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(MergeError::EmptyKeyColumn.kind(), ErrorKind::Merge);
    }
}
