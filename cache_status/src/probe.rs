use std::fmt;
use std::sync::Arc;

use stage_client::{PnfsClient, ResidencyProbe, RestClient};
use stage_config::ClientConfig;

use crate::errors::Result;

/// How file residency is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum QueryMethod {
    /// The storage system's REST namespace API.
    #[default]
    Rest,
    /// The locality pseudo-files of a locally mounted namespace.
    Pnfs,
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMethod::Rest => f.write_str("rest"),
            QueryMethod::Pnfs => f.write_str("pnfs"),
        }
    }
}

/// Picks the residency probe for a whole batch.
pub fn create_residency_probe(method: QueryMethod, config: &ClientConfig) -> Result<Arc<dyn ResidencyProbe>> {
    let probe: Arc<dyn ResidencyProbe> = match method {
        QueryMethod::Rest => RestClient::new(config)?,
        QueryMethod::Pnfs => PnfsClient::new(),
    };
    Ok(probe)
}
