use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use stage_config::LocationConfig;

use crate::error::{Result, StageClientError};

/// A canonical, backend-addressable path. Both the REST and the filesystem residency
/// probes accept it as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLocation(String);

impl StorageLocation {
    /// Wraps a path that is already known to be canonical, e.g. one read back from a cache list.
    pub fn from_canonical(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Splits the location into its directory and file name.
    pub fn split(&self) -> (&str, &str) {
        match self.0.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", &self.0),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageLocation {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps raw file references onto [`StorageLocation`]s.
///
/// Rules are applied as a pipeline, so that every rule sees the output of the one before:
///   1. data-transfer door prefixes (`root://host:port`) are stripped,
///   2. tape-archive locations (`scheme:/dir(VOLUME)`) are reduced to their path,
///   3. legacy mount aliases are rewritten to their canonical mount.
///
/// Anything no rule applies to passes through unchanged. The construction checks make the
/// mapping idempotent: `normalize(normalize(x)) == normalize(x)`.
#[derive(Debug, Clone)]
pub struct LocationNormalizer {
    protocol_prefixes: Vec<String>,
    mount_aliases: Vec<(String, String)>,
    tape_scheme: String,
    tape_marker: String,
    tape_pattern: Regex,
    managed_root: String,
}

impl LocationNormalizer {
    pub fn new(config: &LocationConfig) -> Result<Self> {
        let protocol_prefixes: Vec<String> = split_list(&config.protocol_prefixes).map(str::to_owned).collect();
        if let Some(p) = protocol_prefixes.iter().find(|p| p.starts_with('/')) {
            return Err(StageClientError::configuration(format!(
                "protocol prefix '{p}' must not be a plain path"
            )));
        }

        let mut mount_aliases = Vec::new();
        for entry in split_list(&config.mount_aliases) {
            let Some((alias, canonical)) = entry.split_once('=') else {
                return Err(StageClientError::configuration(format!(
                    "mount alias '{entry}' is not of the form alias=canonical"
                )));
            };
            let alias = alias.trim().trim_end_matches('/');
            let canonical = canonical.trim().trim_end_matches('/');
            if !alias.starts_with('/') || !canonical.starts_with('/') || canonical.starts_with("//") {
                return Err(StageClientError::configuration(format!(
                    "mount alias '{entry}' must map one absolute path onto another"
                )));
            }
            mount_aliases.push((alias.to_owned(), canonical.to_owned()));
        }

        for (_, canonical) in &mount_aliases {
            for (alias, _) in &mount_aliases {
                if has_path_prefix(canonical, alias) || has_path_prefix(alias, canonical) {
                    return Err(StageClientError::configuration(format!(
                        "canonical mount '{canonical}' overlaps alias '{alias}'"
                    )));
                }
            }
        }

        let tape_scheme = config.tape_scheme.trim();
        if tape_scheme.is_empty()
            || !tape_scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
        {
            return Err(StageClientError::configuration(format!("invalid tape scheme '{tape_scheme}'")));
        }

        // scheme:path with an optional parenthesized volume label
        let tape_pattern = Regex::new(&format!(r"^{}:([^()]+)(\([^()]*\))?$", regex::escape(tape_scheme)))
            .map_err(|e| StageClientError::configuration(e.to_string()))?;

        Ok(Self {
            protocol_prefixes,
            mount_aliases,
            tape_scheme: tape_scheme.to_owned(),
            tape_marker: format!("{tape_scheme}:"),
            tape_pattern,
            managed_root: config.managed_root.trim().trim_end_matches('/').to_owned(),
        })
    }

    /// Whether `raw` claims to be a tape-archive location, well-formed or not.
    pub fn is_tape_location(&self, raw: &str) -> bool {
        raw.starts_with(&self.tape_marker)
    }

    /// Whether `path` lies under the mount managed by the storage backend.
    pub fn is_managed(&self, path: &str) -> bool {
        !self.managed_root.is_empty() && has_path_prefix(path, &self.managed_root)
    }

    pub fn normalize(&self, raw: &str) -> Result<StorageLocation> {
        let mut path = raw.trim();

        while let Some(rest) = self
            .protocol_prefixes
            .iter()
            .find_map(|prefix| path.strip_prefix(prefix.as_str()))
        {
            path = rest.trim_start();
        }

        let path = if self.is_tape_location(path) {
            self.tape_path(path)?
        } else {
            path.trim()
        };

        let path = collapse_leading_slashes(path);

        if path.is_empty() {
            return Err(StageClientError::UnresolvedLocation(format!("'{raw}' names no path")));
        }

        for (alias, canonical) in &self.mount_aliases {
            if has_path_prefix(path, alias) {
                return Ok(StorageLocation(format!("{canonical}{}", &path[alias.len()..])));
            }
        }

        Ok(StorageLocation(path.to_owned()))
    }

    /// Resolves a logical file against the storage locations a catalog reports for it.
    ///
    /// Only tape-archive locations are considered, and the first well-formed one wins; its
    /// directory is joined with `file_name`.
    pub fn locate_on_tape<S: AsRef<str>>(&self, file_name: &str, locations: &[S]) -> Result<StorageLocation> {
        if file_name.is_empty() || file_name.contains('/') {
            return Err(StageClientError::UnresolvedLocation(format!("'{file_name}' is not a bare file name")));
        }

        let mut malformed = None;
        for location in locations.iter().map(AsRef::as_ref).filter(|l| self.is_tape_location(l)) {
            match self.tape_path(location) {
                Ok(dir) => return self.normalize(&format!("{}/{file_name}", dir.trim_end_matches('/'))),
                Err(e) => {
                    malformed.get_or_insert(e);
                },
            }
        }

        Err(malformed.unwrap_or_else(|| {
            StageClientError::UnresolvedLocation(format!(
                "{file_name}: none of {} catalog locations is a {} location",
                locations.len(),
                self.tape_scheme
            ))
        }))
    }

    fn tape_path<'a>(&self, location: &'a str) -> Result<&'a str> {
        let path = self
            .tape_pattern
            .captures(location)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|p| p.starts_with('/'));

        path.ok_or_else(|| {
            StageClientError::UnresolvedLocation(format!("'{location}' is not a valid {} location", self.tape_scheme))
        })
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn collapse_leading_slashes(path: &str) -> &str {
    if path.starts_with("//") {
        &path[path.len() - path.trim_start_matches('/').len() - 1..]
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn normalizer() -> LocationNormalizer {
        LocationNormalizer::new(&LocationConfig::default()).unwrap()
    }

    fn norm(raw: &str) -> String {
        normalizer().normalize(raw).unwrap().into_string()
    }

    #[test]
    fn test_tape_location_with_and_without_volume() {
        assert_eq!(norm("enstore:/a/b/c(TAPE001)"), "/a/b/c");
        assert_eq!(norm("enstore:/a/b/c"), "/a/b/c");
        assert_eq!(norm("enstore:/a/b/c(1234@VR0345M8)"), "/a/b/c");
    }

    #[test]
    fn test_protocol_prefix_stripped() {
        assert_eq!(
            norm("root://fndca1.fnal.gov:1094/pnfs/fnal.gov/usr/uboone/raw/f.root"),
            "/pnfs/fnal.gov/usr/uboone/raw/f.root"
        );
        assert_eq!(
            norm("root://fndca1.fnal.gov:1094//pnfs/fnal.gov/usr/uboone/raw/f.root"),
            "/pnfs/fnal.gov/usr/uboone/raw/f.root"
        );
    }

    #[test]
    fn test_legacy_mount_rewritten() {
        assert_eq!(norm("/pnfs/uboone/raw/f.root"), "/pnfs/fnal.gov/usr/uboone/raw/f.root");
        assert_eq!(norm("enstore:/pnfs/uboone/raw(VOL1)"), "/pnfs/fnal.gov/usr/uboone/raw");
        // Only whole path components match.
        assert_eq!(norm("/pnfs/ubooneX/f.root"), "/pnfs/ubooneX/f.root");
    }

    #[test]
    fn test_same_file_normalizes_identically() {
        let n = normalizer();
        let forms = [
            "enstore:/pnfs/uboone/raw/f.root(VOL1)",
            "/pnfs/uboone/raw/f.root",
            "/pnfs/fnal.gov/usr/uboone/raw/f.root",
            "root://fndca1.fnal.gov:1094/pnfs/fnal.gov/usr/uboone/raw/f.root",
        ];
        let first = n.normalize(forms[0]).unwrap();
        for f in &forms[1..] {
            assert_eq!(n.normalize(f).unwrap(), first, "{f}");
        }
    }

    #[test]
    fn test_passthrough() {
        assert_eq!(norm("/home/user/f.root"), "/home/user/f.root");
        assert_eq!(norm("f.root"), "f.root");
    }

    #[test]
    fn test_malformed_tape_location_is_unresolved() {
        let n = normalizer();
        for raw in ["enstore:", "enstore:relative/dir", "enstore:/a(b", "enstore:/a(V1)(V2)", "enstore:/a(V)trailing"] {
            let err = n.normalize(raw).unwrap_err();
            assert!(matches!(err, StageClientError::UnresolvedLocation(_)), "{raw}: {err}");
        }
        assert!(matches!(n.normalize("   ").unwrap_err(), StageClientError::UnresolvedLocation(_)));
    }

    #[test]
    fn test_idempotent_on_samples() {
        let n = normalizer();
        for raw in [
            "enstore:/a/b/c(TAPE001)",
            "root://fndca1.fnal.gov:1094///pnfs/uboone/x",
            "/pnfs/uboone",
            "  /pnfs/uboone/x  ",
            "enstore:/pnfs/uboone/dir (V)",
            "plain",
        ] {
            let once = n.normalize(raw).unwrap();
            assert_eq!(n.normalize(once.as_str()).unwrap(), once, "{raw}");
        }
    }

    #[test]
    fn test_locate_on_tape_first_match_wins() {
        let n = normalizer();
        let locations = [
            "dcache:/pnfs/other/dir",
            "enstore:/pnfs/uboone/raw/a(V1)",
            "enstore:/pnfs/uboone/raw/b(V2)",
        ];
        let loc = n.locate_on_tape("f.root", &locations).unwrap();
        assert_eq!(loc.as_str(), "/pnfs/fnal.gov/usr/uboone/raw/a/f.root");
        assert_eq!(loc.split(), ("/pnfs/fnal.gov/usr/uboone/raw/a", "f.root"));
    }

    #[test]
    fn test_locate_on_tape_skips_malformed() {
        let n = normalizer();
        let loc = n.locate_on_tape("f.root", &["enstore:bad", "enstore:/good/dir/"]).unwrap();
        assert_eq!(loc.as_str(), "/good/dir/f.root");

        let err = n.locate_on_tape("f.root", &["enstore:bad"]).unwrap_err();
        assert!(err.to_string().contains("enstore:bad"));
    }

    #[test]
    fn test_locate_on_tape_without_tape_location() {
        let n = normalizer();
        let empty: [&str; 0] = [];
        assert!(matches!(
            n.locate_on_tape("f.root", &empty).unwrap_err(),
            StageClientError::UnresolvedLocation(_)
        ));
        assert!(n.locate_on_tape("f.root", &["dcache:/pnfs/x"]).is_err());
    }

    #[test]
    fn test_is_managed() {
        let n = normalizer();
        assert!(n.is_managed("/pnfs/uboone/x"));
        assert!(n.is_managed("/pnfs"));
        assert!(!n.is_managed("/pnfsx/a"));
        assert!(!n.is_managed("/home/a"));
    }

    #[test]
    fn test_rejects_overlapping_aliases() {
        let mut config = LocationConfig::default();
        config.mount_aliases = "/pnfs/a=/pnfs/a/b".into();
        assert!(LocationNormalizer::new(&config).is_err());

        config.mount_aliases = "/pnfs/a=/data/a, /data/a/sub=/x".into();
        assert!(LocationNormalizer::new(&config).is_err());

        config.mount_aliases = "no-equals-sign".into();
        assert!(LocationNormalizer::new(&config).is_err());

        config.mount_aliases = "/pnfs/a=/data/a, /pnfs/b=/data/b".into();
        let n = LocationNormalizer::new(&config).unwrap();
        assert_eq!(n.normalize("/pnfs/b/f").unwrap().as_str(), "/data/b/f");
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let mut config = LocationConfig::default();
        config.tape_scheme = "en:store".into();
        assert!(LocationNormalizer::new(&config).is_err());
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(raw in r"(root://fndca1\.fnal\.gov:1094|enstore:|/pnfs/uboone|/pnfs/fnal\.gov/usr/uboone|/|\s)?[ a-z/()._:]{0,24}") {
            let n = normalizer();
            if let Ok(once) = n.normalize(&raw) {
                prop_assert_eq!(n.normalize(once.as_str()).unwrap(), once);
            }
        }
    }
}
