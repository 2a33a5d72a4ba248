use reqwest::StatusCode;
use thiserror::Error;

/// Per-file failures from normalizing a location or talking to the storage backend.
///
/// None of these abort a batch; the batch records the file as of unknown residency
/// and keeps the error as the cause.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StageClientError {
    #[error("Unresolved location: {0}")]
    UnresolvedLocation(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Malformed backend response: {0}")]
    BackendMalformedResponse(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Credential missing: {0}")]
    CredentialMissing(String),

    #[error("HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StageClientError>;

impl StageClientError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    /// Short label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvedLocation(_) => "unresolved_location",
            Self::BackendUnreachable(_) => "backend_unreachable",
            Self::BackendMalformedResponse(_) => "malformed_response",
            Self::FileNotFound(_) => "file_not_found",
            Self::CredentialMissing(_) => "credential_missing",
            Self::HttpStatus { .. } => "http_status",
            Self::ConfigurationError(_) => "configuration",
            Self::IOError(_) => "io",
        }
    }
}

/// Renders an error along with its whole source chain. TLS and DNS failures are only
/// legible through the innermost cause.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        let s = e.to_string();
        if !msg.contains(&s) {
            msg.push_str(": ");
            msg.push_str(&s);
        }
        source = e.source();
    }
    msg
}

impl From<reqwest::Error> for StageClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == StatusCode::NOT_FOUND {
                let path = err.url().map(|u| u.path().to_owned()).unwrap_or_default();
                return StageClientError::FileNotFound(path);
            }
            return StageClientError::HttpStatus {
                status: status.as_u16(),
                message: error_chain(&err),
            };
        }

        if err.is_decode() {
            StageClientError::BackendMalformedResponse(error_chain(&err))
        } else if err.is_builder() {
            StageClientError::ConfigurationError(error_chain(&err))
        } else {
            // connect, timeout, TLS handshake, truncated body
            StageClientError::BackendUnreachable(error_chain(&err))
        }
    }
}

impl From<reqwest_middleware::Error> for StageClientError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => StageClientError::BackendUnreachable(format!("{e:#}")),
        }
    }
}

impl From<serde_json::Error> for StageClientError {
    fn from(err: serde_json::Error) -> Self {
        StageClientError::BackendMalformedResponse(err.to_string())
    }
}
