use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use stage_client::{LocationNormalizer, StorageLocation};
use tracing::{info, warn};

use crate::errors::{CacheStatusError, Result};

/// A dataset as the catalog knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetQuery {
    /// A named, saved dataset definition.
    Definition(String),
    /// A free-form dimension query.
    Dimensions(String),
    /// A frozen snapshot of a saved dataset definition.
    Snapshot { definition: String, snapshot: SnapshotSelector },
}

impl std::fmt::Display for DatasetQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetQuery::Definition(name) => write!(f, "dataset definition '{name}'"),
            DatasetQuery::Dimensions(dims) => write!(f, "dimensions '{dims}'"),
            DatasetQuery::Snapshot {
                definition,
                snapshot: SnapshotSelector::Latest,
            } => write!(f, "newest snapshot of dataset definition '{definition}'"),
            DatasetQuery::Snapshot {
                definition,
                snapshot: SnapshotSelector::Id(id),
            } => write!(f, "snapshot {id} of dataset definition '{definition}'"),
        }
    }
}

/// Which snapshot of a dataset definition to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSelector {
    Latest,
    Id(String),
}

impl From<&str> for SnapshotSelector {
    /// `latest` selects the newest snapshot; anything else is a snapshot id.
    fn from(value: &str) -> Self {
        match value.trim() {
            "latest" => SnapshotSelector::Latest,
            id => SnapshotSelector::Id(id.to_owned()),
        }
    }
}

/// The metadata catalog mapping logical file names onto physical storage locations.
#[async_trait::async_trait]
pub trait FileCatalog: Send + Sync {
    /// All storage locations of one file, of any scheme. Unknown names are a
    /// [`CacheStatusError::CatalogLookupError`].
    async fn locate_file(&self, file_name: &str) -> Result<Vec<String>>;

    /// `(location, file name)` for every file of a dataset, one location per file.
    async fn list_files_and_locations(&self, query: &DatasetQuery) -> Result<Vec<(String, String)>>;
}

/// Stand-in used when no catalog is configured: knows nothing.
pub struct NoCatalog;

#[async_trait::async_trait]
impl FileCatalog for NoCatalog {
    async fn locate_file(&self, file_name: &str) -> Result<Vec<String>> {
        Err(CacheStatusError::CatalogLookupError(format!(
            "{file_name} is not a path and no file catalog is configured"
        )))
    }

    async fn list_files_and_locations(&self, query: &DatasetQuery) -> Result<Vec<(String, String)>> {
        Err(CacheStatusError::CatalogUnavailable(format!("cannot resolve {query}: no file catalog is configured")))
    }
}

/// A catalog snapshot loaded from JSON:
///
/// ```json
/// {
///   "files": { "a.root": ["enstore:/pnfs/x/y(VOL1)", "dcache:/pnfs/x/y"] },
///   "definitions": { "my_dataset": [["enstore:/pnfs/x/y(VOL1)", "a.root"]] },
///   "dimensions": {},
///   "snapshots": { "my_dataset": { "17": [["enstore:/pnfs/x/y(VOL1)", "a.root"]] } }
/// }
/// ```
///
/// Snapshot ids are ordered numerically when they are numbers; the greatest is the newest.
#[derive(Debug, Default, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    files: HashMap<String, Vec<String>>,
    #[serde(default)]
    definitions: HashMap<String, Vec<(String, String)>>,
    #[serde(default)]
    dimensions: HashMap<String, Vec<(String, String)>>,
    #[serde(default)]
    snapshots: HashMap<String, HashMap<String, Vec<(String, String)>>>,
}

impl StaticCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        let invalid = |e: serde_json::Error| CacheStatusError::CatalogUnavailable(format!("invalid catalog snapshot: {e}"));
        let value: serde_json::Value = serde_json::from_str(json).map_err(invalid)?;
        // Struct deserialization would also take a sequence, and every field is optional.
        if !value.is_object() {
            return Err(CacheStatusError::CatalogUnavailable(
                "invalid catalog snapshot: expected a JSON object".to_owned(),
            ));
        }
        serde_json::from_value(value).map_err(invalid)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&json)?;
        info!(path = %path.display(), files = catalog.files.len(), "Loaded catalog snapshot");
        Ok(catalog)
    }

    pub fn with_file(mut self, file_name: &str, locations: &[&str]) -> Self {
        self.files
            .insert(file_name.to_owned(), locations.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn with_definition(mut self, name: &str, entries: &[(&str, &str)]) -> Self {
        self.definitions.insert(
            name.to_owned(),
            entries.iter().map(|(l, f)| (l.to_string(), f.to_string())).collect(),
        );
        self
    }

    pub fn with_snapshot(mut self, definition: &str, id: &str, entries: &[(&str, &str)]) -> Self {
        self.snapshots.entry(definition.to_owned()).or_default().insert(
            id.to_owned(),
            entries.iter().map(|(l, f)| (l.to_string(), f.to_string())).collect(),
        );
        self
    }

    fn snapshot(&self, definition: &str, selector: &SnapshotSelector) -> Option<&Vec<(String, String)>> {
        let snapshots = self.snapshots.get(definition)?;
        match selector {
            SnapshotSelector::Id(id) => snapshots.get(id),
            SnapshotSelector::Latest => snapshots
                .iter()
                .max_by_key(|(id, _)| (id.parse::<u64>().ok(), (*id).clone()))
                .map(|(_, listing)| listing),
        }
    }
}

#[async_trait::async_trait]
impl FileCatalog for StaticCatalog {
    async fn locate_file(&self, file_name: &str) -> Result<Vec<String>> {
        self.files
            .get(file_name)
            .cloned()
            .ok_or_else(|| CacheStatusError::CatalogLookupError(format!("{file_name} is not known to the catalog")))
    }

    async fn list_files_and_locations(&self, query: &DatasetQuery) -> Result<Vec<(String, String)>> {
        let listing = match query {
            DatasetQuery::Definition(name) => self.definitions.get(name),
            DatasetQuery::Dimensions(dims) => self.dimensions.get(dims),
            DatasetQuery::Snapshot { definition, snapshot } => self.snapshot(definition, snapshot),
        };
        listing
            .cloned()
            .ok_or_else(|| CacheStatusError::CatalogUnavailable(format!("{query} is not known to the catalog")))
    }
}

/// An input that could not be turned into a storage location.
#[derive(Debug)]
pub struct UnresolvedInput {
    pub input: String,
    pub error: CacheStatusError,
}

/// Raw inputs sorted into what the batch should query and what it should not.
#[derive(Debug, Default)]
pub struct ResolvedInputs {
    /// Locations to query or prestage, in input order.
    pub locations: Vec<StorageLocation>,
    /// Existing files outside the managed mount; always readable, so counted as cached.
    pub local_files: Vec<String>,
    pub unresolved: Vec<UnresolvedInput>,
}

impl ResolvedInputs {
    fn record_unresolved(&mut self, input: &str, error: CacheStatusError) {
        warn!(input, "Cannot resolve input: {error}");
        self.unresolved.push(UnresolvedInput {
            input: input.to_owned(),
            error,
        });
    }
}

/// Resolves individually named files.
///
/// An existing local file outside the managed mount is taken as cached. Paths, and
/// references the normalizer understands, are normalized. Anything else is a logical file
/// name and is looked up in `catalog`.
pub async fn resolve_inputs<I, S>(inputs: I, normalizer: &LocationNormalizer, catalog: &dyn FileCatalog) -> ResolvedInputs
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resolved = ResolvedInputs::default();

    for input in inputs {
        let input = input.as_ref().trim();
        if input.is_empty() {
            continue;
        }

        let is_local_file = tokio::fs::metadata(input).await.is_ok_and(|m| m.is_file());

        if is_local_file && !normalizer.is_managed(input) {
            resolved.local_files.push(input.to_owned());
            continue;
        }

        if is_local_file || input.contains('/') || normalizer.is_tape_location(input) {
            match normalizer.normalize(input) {
                Ok(location) => resolved.locations.push(location),
                Err(e) => resolved.record_unresolved(input, e.into()),
            }
            continue;
        }

        let located = catalog
            .locate_file(input)
            .await
            .and_then(|locations| Ok(normalizer.locate_on_tape(input, locations.as_slice())?));

        match located {
            Ok(location) => resolved.locations.push(location),
            Err(e) => resolved.record_unresolved(input, e),
        }
    }

    resolved
}

/// Resolves every `sparsification`-th file of a dataset. A catalog failure is fatal;
/// entries without a tape location are reported and skipped.
pub async fn resolve_dataset(
    query: &DatasetQuery,
    sparsification: usize,
    normalizer: &LocationNormalizer,
    catalog: &dyn FileCatalog,
) -> Result<ResolvedInputs> {
    if sparsification == 0 {
        return Err(CacheStatusError::ParameterError("sparsification factor must be at least 1".to_owned()));
    }

    let listing = catalog.list_files_and_locations(query).await?;
    info!(%query, files = listing.len(), sparsification, "Retrieved file list");

    let mut resolved = ResolvedInputs::default();
    for (location, file_name) in listing.iter().step_by(sparsification) {
        match normalizer.locate_on_tape(file_name, std::slice::from_ref(location)) {
            Ok(location) => resolved.locations.push(location),
            Err(e) => resolved.record_unresolved(file_name, e.into()),
        }
    }

    Ok(resolved)
}

/// Reads raw references from a newline-delimited list. Blank lines and `#` comments are
/// skipped.
pub fn read_input_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect())
}
