use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use cache_status::catalog::{read_input_list, resolve_dataset, resolve_inputs};
use cache_status::report::{EXIT_FATAL, prestage_exit_code, write_cache_list, write_interrupted};
use cache_status::{
    CacheStatusError, DatasetQuery, FileCatalog, NoCatalog, PrestageBatch, QueryMethod, ResolvedInputs,
    SnapshotSelector, StaticCatalog, StatusBatch, StatusSummary, create_residency_probe, init_logging,
};
use clap::Parser;
use stage_client::{LocationNormalizer, RestClient};
use stage_config::StageConfig;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const EXIT_CANCELLED: u8 = 130;

const EXAMPLES: &str = "\
Examples:

 Find the cache state of one file, by path or by catalog file name:

    cache_status /pnfs/experiment/tape_backed/run42/f.root
    cache_status --catalog catalog.json f.root

 Show the state of each file, not just the counts:

    cache_status -v /pnfs/experiment/a.root /pnfs/experiment/b.root

 Summarize every tenth file of a dataset:

    cache_status --catalog catalog.json -d run42_raw -s 10

 Use the newest snapshot of a dataset rather than its current contents:

    cache_status --catalog catalog.json -d run42_raw --snapshot latest

 Prestage the files listed in a file:

    cache_status -p -i files.txt

Settings come from TAPESTAGE_{GROUP}_{FIELD} environment variables, e.g.
TAPESTAGE_CLIENT_ENDPOINT. The client credential is read from X509_USER_PROXY,
or /tmp/x509up_u<uid> when unset.";

/// Reports whether files are on disk cache or only on tape, and requests tape
/// recalls (prestage).
#[derive(Parser)]
#[clap(name = "cache_status", version, after_help = EXAMPLES)]
struct CacheStatusCommand {
    /// Files to check: paths, tape-archive locations, or catalog file names.
    files: Vec<String>,

    /// Check the files of a saved catalog dataset definition.
    #[clap(short = 'd', long = "dataset", conflicts_with_all = ["files", "dimensions", "input_list"])]
    dataset: Option<String>,

    /// Use this snapshot id of the dataset, or 'latest' for the newest one. Requires -d.
    #[clap(long, requires = "dataset")]
    snapshot: Option<String>,

    /// Check the files matching a catalog dimension query.
    #[clap(short = 'q', long = "dim", conflicts_with_all = ["files", "input_list"])]
    dimensions: Option<String>,

    /// Read files to check from this list, one per line.
    #[clap(short = 'i', long)]
    input_list: Option<PathBuf>,

    /// JSON catalog snapshot used to resolve file names and datasets.
    #[clap(long)]
    catalog: Option<PathBuf>,

    /// Sparsification factor: only check every N-th file of a dataset.
    #[clap(short, long, default_value_t = 1)]
    sparse: usize,

    /// Print information about individual files.
    #[clap(short, long)]
    verbose: bool,

    /// Prestage the files instead of checking them.
    #[clap(short, long)]
    prestage: bool,

    /// How to look up file status.
    #[clap(short, long, value_enum, default_value_t = QueryMethod::Rest)]
    method: QueryMethod,

    /// Requests in flight at once. Defaults to TAPESTAGE_CLIENT_MAX_CONCURRENT_REQUESTS.
    #[clap(short = 'j', long)]
    concurrency: Option<usize>,

    /// Where to write the list of cached files. Defaults to TAPESTAGE_BATCH_CACHE_LIST_PATH.
    #[clap(short, long)]
    output: Option<PathBuf>,
}

impl CacheStatusCommand {
    async fn run(self, config: StageConfig) -> Result<u8> {
        let normalizer = LocationNormalizer::new(&config.location)?;
        let catalog: Box<dyn FileCatalog> = match &self.catalog {
            Some(path) => Box::new(StaticCatalog::load(path)?),
            None => Box::new(NoCatalog),
        };

        let resolved = self.resolve(&normalizer, catalog.as_ref()).await?;
        for unresolved in &resolved.unresolved {
            eprintln!("Cannot resolve {}: {}", unresolved.input, unresolved.error);
        }

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; abandoning outstanding requests");
                on_interrupt.cancel();
            }
        });

        let concurrency = self.concurrency.unwrap_or(config.client.max_concurrent_requests);
        let threshold = config.batch.progress_announce_threshold;
        let mut stdout = std::io::stdout();

        if self.prestage {
            let dispatcher = RestClient::new(&config.client)?;
            let summary = PrestageBatch::new(dispatcher)
                .with_concurrency(concurrency)
                .with_announce_threshold(threshold)
                .verbose(self.verbose)
                .with_cancellation(cancel)
                .run(&resolved.locations, &mut stdout)
                .await?;

            if summary.cancelled {
                write_interrupted(&mut stdout, summary.requested, resolved.locations.len())?;
                writeln!(stdout, "Prestage requests succeeded: {} of {}", summary.succeeded, summary.requested)?;
                stdout.flush()?;
                return Err(CacheStatusError::Cancelled.into());
            }
            return Ok(prestage_exit_code(&summary, resolved.unresolved.len()));
        }

        let probe = create_residency_probe(self.method, &config.client)?;
        let result = StatusBatch::new(probe)
            .with_concurrency(concurrency)
            .with_announce_threshold(threshold)
            .verbose(self.verbose)
            .with_cancellation(cancel)
            .run(&resolved.locations, &mut stdout)
            .await?;

        let summary = StatusSummary::new(&result, resolved.local_files.len(), resolved.unresolved.len());
        if result.cancelled {
            // The cache list is only written for a complete batch.
            write_interrupted(&mut stdout, result.total, resolved.locations.len())?;
            summary.write_to(&mut stdout)?;
            stdout.flush()?;
            return Err(CacheStatusError::Cancelled.into());
        }

        let cache_list_path = self.output.unwrap_or_else(|| PathBuf::from(&config.batch.cache_list_path));
        write_cache_list(&cache_list_path, &result.cached_list)?;

        summary.write_to(&mut stdout)?;
        stdout.flush()?;

        Ok(summary.exit_code())
    }

    async fn resolve(&self, normalizer: &LocationNormalizer, catalog: &dyn FileCatalog) -> Result<ResolvedInputs> {
        let query = match (&self.dataset, &self.snapshot, &self.dimensions) {
            (Some(name), Some(snapshot), _) => Some(DatasetQuery::Snapshot {
                definition: name.clone(),
                snapshot: SnapshotSelector::from(snapshot.as_str()),
            }),
            (Some(name), None, _) => Some(DatasetQuery::Definition(name.clone())),
            (None, _, Some(dims)) => Some(DatasetQuery::Dimensions(dims.clone())),
            (None, _, None) => None,
        };

        if let Some(query) = query {
            print!("Retrieving file list for {query}...");
            std::io::stdout().flush()?;
            let resolved = resolve_dataset(&query, self.sparse, normalizer, catalog).await?;
            println!(" done.");
            return Ok(resolved);
        }

        let mut inputs = self.files.clone();
        if let Some(list) = &self.input_list {
            inputs.extend(read_input_list(list)?);
        }
        if inputs.is_empty() {
            return Err(CacheStatusError::ParameterError("no files given".to_owned()).into());
        }

        Ok(resolve_inputs(&inputs, normalizer, catalog).await)
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CacheStatusError>() {
        Some(CacheStatusError::Cancelled) => EXIT_CANCELLED,
        _ => EXIT_FATAL,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let command = CacheStatusCommand::parse();
    let config = StageConfig::new();
    init_logging(&config.log);

    match command.run(config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(exit_code_for(&e))
        },
    }
}
