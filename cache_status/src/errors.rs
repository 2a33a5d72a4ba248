use stage_client::StageClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheStatusError {
    #[error("Storage client error: {0}")]
    StageClientError(#[from] StageClientError),

    /// The catalog does not know a file, or knows no usable location for it.
    #[error("Catalog lookup error: {0}")]
    CatalogLookupError(String),

    /// The catalog could not answer at all. Fatal when resolving a dataset.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Batch cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CacheStatusError>;
