pub use http_client::{Api, RequestLogger, build_auth_http_client, build_http_client, resolve_credential_path};
pub use interface::{Locality, PrestageDispatcher, PrestageOutcome, ResidencyProbe, ResidencyState};
pub use location::{LocationNormalizer, StorageLocation};
pub use pnfs_client::PnfsClient;
pub use rest_client::RestClient;
use tracing::Level;

pub use crate::error::{Result, StageClientError};

mod error;
pub mod http_client;
mod interface;
pub mod location;
mod pnfs_client;
pub mod rest_client;
pub mod retry_wrapper;

#[cfg(not(feature = "elevated_information_level"))]
pub const INFORMATION_LOG_LEVEL: Level = Level::DEBUG;

#[cfg(feature = "elevated_information_level")]
pub const INFORMATION_LOG_LEVEL: Level = Level::INFO;
