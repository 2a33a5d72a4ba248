use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StageClientError};
use crate::location::StorageLocation;

/// Residency tier of a file, as reported by the backend's `fileLocality`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locality {
    Online,
    Nearline,
    OnlineAndNearline,
    Unknown,
}

impl Locality {
    /// Parses the backend's spelling. Localities outside the three tiers (e.g. `UNAVAILABLE`,
    /// `LOST`) map to `Unknown`.
    pub fn from_backend(value: &str) -> Self {
        match value.trim() {
            "ONLINE" => Locality::Online,
            "NEARLINE" => Locality::Nearline,
            "ONLINE_AND_NEARLINE" => Locality::OnlineAndNearline,
            _ => Locality::Unknown,
        }
    }

    /// Whether the file's bytes can be read from disk cache right now.
    pub fn is_online(self) -> bool {
        matches!(self, Locality::Online | Locality::OnlineAndNearline)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Locality::Online => "ONLINE",
            Locality::Nearline => "NEARLINE",
            Locality::OnlineAndNearline => "ONLINE_AND_NEARLINE",
            Locality::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Residency of one file at the moment it was queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidencyState {
    pub locality: Locality,
    /// Non-empty exactly when a prestage is outstanding for the file.
    pub target_qos: Option<String>,
}

impl ResidencyState {
    pub fn new(locality: Locality, target_qos: Option<String>) -> Self {
        Self {
            locality,
            target_qos: target_qos.filter(|q| !q.is_empty()),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.locality.is_online()
    }

    /// False when the backend answered with a locality outside the three tiers. Such a file
    /// is neither confirmed cached nor confirmed tape-only.
    pub fn is_known(&self) -> bool {
        self.locality != Locality::Unknown
    }

    pub fn is_pending(&self) -> bool {
        self.target_qos.as_deref().is_some_and(|q| !q.is_empty())
    }
}

/// Result of one prestage request.
#[derive(Debug)]
pub enum PrestageOutcome {
    /// The backend answered with `"status": "success"`.
    Accepted,
    /// The backend answered, but not with success. Holds whatever status it gave.
    Rejected { status: Option<String> },
    /// The request never produced a usable answer.
    Failed(StageClientError),
}

impl PrestageOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, PrestageOutcome::Accepted)
    }
}

/// A strategy for finding out whether a file is on disk cache.
///
/// Implementations are chosen once when a batch is set up and shared by all of its
/// concurrent queries.
#[async_trait::async_trait]
pub trait ResidencyProbe: Send + Sync {
    async fn query_residency(&self, location: &StorageLocation) -> Result<ResidencyState>;

    /// Whether `target_qos` is meaningful for this probe. Probes that cannot see outstanding
    /// prestage requests always report `None` there.
    fn observes_pending(&self) -> bool {
        true
    }
}

/// Issues prestage ("bring online") requests.
#[async_trait::async_trait]
pub trait PrestageDispatcher: Send + Sync {
    /// Requests that `location` be copied to disk cache while staying on tape. Never retried
    /// and never fails outright; transport problems come back as [`PrestageOutcome::Failed`].
    async fn request_prestage(&self, location: &StorageLocation) -> PrestageOutcome;
}
