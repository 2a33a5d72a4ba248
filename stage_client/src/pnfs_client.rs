use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, event};

use crate::INFORMATION_LOG_LEVEL;
use crate::error::{Result, StageClientError};
use crate::interface::{Locality, ResidencyProbe, ResidencyState};
use crate::location::StorageLocation;

/// Substring of the pseudo-file's first line that marks a file as readable from disk.
const ONLINE_TOKEN: &str = "ONLINE";

/// Residency probe reading the namespace mount's locality pseudo-file,
/// `{dir}/.(get)({name})(locality)`.
///
/// Only works where the namespace is mounted locally. It cannot see outstanding prestage
/// requests.
#[derive(Debug, Default)]
pub struct PnfsClient;

impl PnfsClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    fn locality_path(location: &StorageLocation) -> PathBuf {
        let (dir, name) = location.split();
        PathBuf::from(format!("{dir}/.(get)({name})(locality)"))
    }
}

fn parse_locality_line(line: &str) -> Locality {
    match Locality::from_backend(line) {
        Locality::Unknown if line.contains(ONLINE_TOKEN) => Locality::Online,
        Locality::Unknown => Locality::Nearline,
        // Collapsed to the two states this probe can tell apart.
        l if l.is_online() => Locality::Online,
        _ => Locality::Nearline,
    }
}

#[async_trait::async_trait]
impl ResidencyProbe for PnfsClient {
    async fn query_residency(&self, location: &StorageLocation) -> Result<ResidencyState> {
        let (_, name) = location.split();
        if name.is_empty() {
            return Err(StageClientError::UnresolvedLocation(format!("'{location}' names no file")));
        }

        let pseudo_file = Self::locality_path(location);
        debug!(pseudo_file = %pseudo_file.display(), "Reading locality");

        let content = tokio::fs::read_to_string(&pseudo_file).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StageClientError::FileNotFound(location.to_string()),
            _ => StageClientError::IOError(e),
        })?;

        let Some(line) = content.lines().next().map(str::trim).filter(|l| !l.is_empty()) else {
            return Err(StageClientError::BackendMalformedResponse(format!(
                "empty locality for {location}"
            )));
        };

        let locality = parse_locality_line(line);
        event!(INFORMATION_LOG_LEVEL, %location, %locality, "Read locality");

        Ok(ResidencyState::new(locality, None))
    }

    fn observes_pending(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_locality(dir: &TempDir, name: &str, content: &str) -> StorageLocation {
        fs::write(dir.path().join(format!(".(get)({name})(locality)")), content).unwrap();
        StorageLocation::from_canonical(format!("{}/{name}", dir.path().display()))
    }

    #[test]
    fn test_locality_path() {
        let path = PnfsClient::locality_path(&StorageLocation::from_canonical("/pnfs/fnal.gov/usr/a/f.root"));
        assert_eq!(path, PathBuf::from("/pnfs/fnal.gov/usr/a/.(get)(f.root)(locality)"));
    }

    #[test]
    fn test_parse_locality_line() {
        assert_eq!(parse_locality_line("ONLINE_AND_NEARLINE"), Locality::Online);
        assert_eq!(parse_locality_line("ONLINE"), Locality::Online);
        assert_eq!(parse_locality_line("NEARLINE"), Locality::Nearline);
        assert_eq!(parse_locality_line("UNAVAILABLE"), Locality::Nearline);
        assert_eq!(parse_locality_line("locality: ONLINE"), Locality::Online);
    }

    #[tokio::test]
    async fn test_reads_first_line() {
        let dir = TempDir::new().unwrap();
        let online = write_locality(&dir, "a.root", "ONLINE_AND_NEARLINE\n");
        let tape = write_locality(&dir, "b.root", "NEARLINE\nONLINE\n");

        let probe = PnfsClient::new();
        assert!(!probe.observes_pending());

        let state = probe.query_residency(&online).await.unwrap();
        assert!(state.is_cached());
        assert_eq!(state.target_qos, None);

        let state = probe.query_residency(&tape).await.unwrap();
        assert_eq!(state.locality, Locality::Nearline);
    }

    #[tokio::test]
    async fn test_missing_pseudo_file() {
        let dir = TempDir::new().unwrap();
        let location = StorageLocation::from_canonical(format!("{}/absent.root", dir.path().display()));

        match PnfsClient::new().query_residency(&location).await {
            Err(StageClientError::FileNotFound(p)) => assert_eq!(p, location.as_str()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_pseudo_file() {
        let dir = TempDir::new().unwrap();
        let location = write_locality(&dir, "c.root", "\n");

        let err = PnfsClient::new().query_residency(&location).await.unwrap_err();
        assert!(matches!(err, StageClientError::BackendMalformedResponse(_)));
    }
}
