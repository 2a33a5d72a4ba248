use std::io::Write;
use std::sync::Arc;

use futures::StreamExt;
use stage_client::{Locality, PrestageDispatcher, PrestageOutcome, ResidencyProbe, ResidencyState, StageClientError, StorageLocation};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::progress::ProgressReporter;

pub const DEFAULT_CONCURRENCY: usize = 16;

/// Residency of one file, or why it could not be determined.
#[derive(Debug)]
pub struct FileStatus {
    pub location: StorageLocation,
    pub residency: std::result::Result<ResidencyState, StageClientError>,
}

impl FileStatus {
    pub fn is_cached(&self) -> bool {
        self.residency.as_ref().is_ok_and(ResidencyState::is_cached)
    }

    pub fn is_pending(&self) -> bool {
        self.residency.as_ref().is_ok_and(ResidencyState::is_pending)
    }
}

/// Outcome of a status batch. Files whose residency could not be determined, either because
/// the query failed or because the backend reported a locality outside the known tiers, are
/// counted in `errors` and in neither `cached` nor `tape_only`.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub cached: usize,
    pub tape_only: usize,
    /// `None` when the probe cannot see outstanding prestage requests.
    pub pending: Option<usize>,
    pub errors: usize,
    pub total: usize,
    /// Cached locations, in input order.
    pub cached_list: Vec<StorageLocation>,
    /// One record per finished file, in input order.
    pub records: Vec<FileStatus>,
    /// The batch was cancelled before every file finished.
    pub cancelled: bool,
}

impl BatchResult {
    fn new(observes_pending: bool) -> Self {
        Self {
            pending: observes_pending.then_some(0),
            ..Default::default()
        }
    }

    fn record(&mut self, status: FileStatus) {
        self.total += 1;
        match &status.residency {
            Ok(state) if state.is_cached() => {
                self.cached += 1;
                self.cached_list.push(status.location.clone());
            },
            Ok(state) if state.is_known() => self.tape_only += 1,
            Ok(_) | Err(_) => self.errors += 1,
        }
        if status.is_pending()
            && let Some(pending) = self.pending.as_mut()
        {
            *pending += 1;
        }
        self.records.push(status);
    }
}

/// Outcome of a prestage batch.
#[derive(Debug, Default)]
pub struct PrestageSummary {
    pub succeeded: usize,
    pub requested: usize,
    /// One entry per finished request, in input order.
    pub outcomes: Vec<(StorageLocation, PrestageOutcome)>,
    pub cancelled: bool,
}

impl PrestageSummary {
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.requested
    }
}

/// Settings shared by both kinds of batch.
#[derive(Clone)]
struct BatchOptions {
    concurrency: usize,
    verbose: bool,
    announce_threshold: usize,
    cancel: CancellationToken,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            verbose: false,
            announce_threshold: 50,
            cancel: CancellationToken::new(),
        }
    }
}

impl BatchOptions {
    fn reporter(&self, total: usize) -> ProgressReporter {
        if self.verbose {
            ProgressReporter::silent(total)
        } else {
            ProgressReporter::new(total, self.announce_threshold)
        }
    }
}

macro_rules! batch_builder_methods {
    () => {
        /// Upper bound on requests in flight at once.
        pub fn with_concurrency(mut self, concurrency: usize) -> Self {
            self.options.concurrency = concurrency.max(1);
            self
        }

        /// Prints one line per file instead of progress announcements.
        pub fn verbose(mut self, verbose: bool) -> Self {
            self.options.verbose = verbose;
            self
        }

        pub fn with_announce_threshold(mut self, threshold: usize) -> Self {
            self.options.announce_threshold = threshold;
            self
        }

        /// Files not finished when `token` is cancelled are abandoned.
        pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
            self.options.cancel = token;
            self
        }
    };
}

/// Queries the residency of a list of files.
///
/// Queries run concurrently over the probe, but results are consumed in input order, so the
/// per-file lines and the cached list come out in input order.
pub struct StatusBatch {
    probe: Arc<dyn ResidencyProbe>,
    options: BatchOptions,
}

impl StatusBatch {
    pub fn new(probe: Arc<dyn ResidencyProbe>) -> Self {
        Self {
            probe,
            options: BatchOptions::default(),
        }
    }

    batch_builder_methods!();

    pub async fn run<W: Write>(&self, locations: &[StorageLocation], out: &mut W) -> Result<BatchResult> {
        let total = locations.len();
        let observes_pending = self.probe.observes_pending();
        let mut result = BatchResult::new(observes_pending);

        if total > 1 {
            writeln!(out, "Checking {total} files:")?;
        }

        let mut progress = self.options.reporter(total);
        progress.update(0, out)?;

        let probe = self.probe.clone();
        let mut statuses = std::pin::pin!(futures::stream::iter(locations.iter().cloned())
            .map(|location| {
                let probe = probe.clone();
                async move {
                    let residency = probe.query_residency(&location).await;
                    FileStatus { location, residency }
                }
            })
            .buffered(self.options.concurrency)
            .take_until(self.options.cancel.clone().cancelled_owned()));

        while let Some(status) = statuses.next().await {
            if let Err(e) = &status.residency {
                debug!(location = %status.location, kind = e.kind(), "Residency query failed: {e}");
            }
            if self.options.verbose {
                write_status_line(out, &status, observes_pending)?;
            }
            result.record(status);
            progress.update(result.total, out)?;
        }

        result.cancelled = result.total < total;
        if result.cancelled {
            warn!(finished = result.total, total, "Status batch cancelled");
        } else {
            info!(total, cached = result.cached, errors = result.errors, "Status batch complete");
        }

        Ok(result)
    }
}

fn write_status_line<W: Write>(out: &mut W, status: &FileStatus, observes_pending: bool) -> std::io::Result<()> {
    match &status.residency {
        Ok(state) if observes_pending => {
            let pending = if state.is_pending() { " pending" } else { "" };
            writeln!(out, "{} {}{pending}", status.location, state.locality)
        },
        Ok(state) => {
            let locality = match state.locality {
                Locality::Unknown => "UNKNOWN",
                _ if state.is_cached() => "ONLINE",
                _ => "NEARLINE",
            };
            writeln!(out, "{} {locality}", status.location)
        },
        Err(e) => writeln!(out, "{} UNKNOWN ({e})", status.location),
    }
}

/// Requests that a list of files be brought onto disk.
pub struct PrestageBatch {
    dispatcher: Arc<dyn PrestageDispatcher>,
    options: BatchOptions,
}

impl PrestageBatch {
    pub fn new(dispatcher: Arc<dyn PrestageDispatcher>) -> Self {
        Self {
            dispatcher,
            options: BatchOptions::default(),
        }
    }

    batch_builder_methods!();

    pub async fn run<W: Write>(&self, locations: &[StorageLocation], out: &mut W) -> Result<PrestageSummary> {
        let total = locations.len();
        let mut summary = PrestageSummary::default();

        if total > 1 {
            writeln!(out, "Prestaging {total} files:")?;
        }

        let mut progress = self.options.reporter(total);
        progress.update(0, out)?;

        let dispatcher = self.dispatcher.clone();
        let mut outcomes = std::pin::pin!(futures::stream::iter(locations.iter().cloned())
            .map(|location| {
                let dispatcher = dispatcher.clone();
                async move {
                    let outcome = dispatcher.request_prestage(&location).await;
                    (location, outcome)
                }
            })
            .buffered(self.options.concurrency)
            .take_until(self.options.cancel.clone().cancelled_owned()));

        while let Some((location, outcome)) = outcomes.next().await {
            if self.options.verbose {
                let verdict = if outcome.succeeded() { "request succeeded" } else { "request failed" };
                writeln!(out, "{location} {verdict}")?;
            }
            if let PrestageOutcome::Failed(e) = &outcome {
                warn!(%location, "Prestage request failed: {e}");
            }

            summary.requested += 1;
            if outcome.succeeded() {
                summary.succeeded += 1;
            }
            summary.outcomes.push((location, outcome));
            progress.update(summary.requested, out)?;
        }

        summary.cancelled = summary.requested < total;
        if summary.cancelled {
            warn!(finished = summary.requested, total, "Prestage batch cancelled");
        } else {
            info!(total, succeeded = summary.succeeded, "Prestage batch complete");
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use more_asserts::assert_le;
    use proptest::prelude::*;

    use super::*;

    /// Answers from a table, finishing later entries first.
    struct TableProbe {
        states: HashMap<String, ResidencyState>,
        observes_pending: bool,
        calls: AtomicUsize,
    }

    impl TableProbe {
        fn new(entries: &[(&str, Locality, Option<&str>)]) -> Arc<Self> {
            Arc::new(Self {
                states: entries
                    .iter()
                    .map(|(p, l, q)| (p.to_string(), ResidencyState::new(*l, q.map(str::to_owned))))
                    .collect(),
                observes_pending: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ResidencyProbe for TableProbe {
        async fn query_residency(&self, location: &StorageLocation) -> stage_client::Result<ResidencyState> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed) as u64;
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(n * 5))).await;
            self.states
                .get(location.as_str())
                .cloned()
                .ok_or_else(|| StageClientError::FileNotFound(location.to_string()))
        }

        fn observes_pending(&self) -> bool {
            self.observes_pending
        }
    }

    /// Answers instantly from a table. `None` entries fail; paths missing from the table
    /// never answer.
    struct ScriptedProbe {
        answers: HashMap<String, Option<ResidencyState>>,
    }

    impl ScriptedProbe {
        fn new(entries: &[(&str, Option<Locality>)]) -> Arc<Self> {
            Arc::new(Self {
                answers: entries
                    .iter()
                    .map(|(p, l)| (p.to_string(), l.map(|l| ResidencyState::new(l, None))))
                    .collect(),
            })
        }
    }

    #[async_trait::async_trait]
    impl ResidencyProbe for ScriptedProbe {
        async fn query_residency(&self, location: &StorageLocation) -> stage_client::Result<ResidencyState> {
            match self.answers.get(location.as_str()) {
                Some(Some(state)) => Ok(state.clone()),
                Some(None) => Err(StageClientError::BackendUnreachable("down".into())),
                None => futures::future::pending().await,
            }
        }
    }

    struct NeverAnswers;

    #[async_trait::async_trait]
    impl ResidencyProbe for NeverAnswers {
        async fn query_residency(&self, _location: &StorageLocation) -> stage_client::Result<ResidencyState> {
            futures::future::pending().await
        }
    }

    #[async_trait::async_trait]
    impl PrestageDispatcher for NeverAnswers {
        async fn request_prestage(&self, _location: &StorageLocation) -> PrestageOutcome {
            futures::future::pending().await
        }
    }

    struct AcceptEveryThird;

    #[async_trait::async_trait]
    impl PrestageDispatcher for AcceptEveryThird {
        async fn request_prestage(&self, location: &StorageLocation) -> PrestageOutcome {
            let n: usize = location.split().1.parse().unwrap();
            match n % 3 {
                0 => PrestageOutcome::Accepted,
                1 => PrestageOutcome::Rejected {
                    status: Some("failed".into()),
                },
                _ => PrestageOutcome::Failed(StageClientError::BackendUnreachable("down".into())),
            }
        }
    }

    fn locations(paths: &[&str]) -> Vec<StorageLocation> {
        paths.iter().map(|p| StorageLocation::from_canonical(*p)).collect()
    }

    #[tokio::test]
    async fn test_status_batch_counts_and_order() {
        let probe = TableProbe::new(&[
            ("/p/1", Locality::OnlineAndNearline, None),
            ("/p/2", Locality::Nearline, Some("disk+tape")),
            ("/p/3", Locality::Online, Some("disk+tape")),
            ("/p/4", Locality::Nearline, None),
            ("/p/5", Locality::Online, None),
        ]);
        let files = locations(&["/p/1", "/p/2", "/p/3", "/p/4", "/p/5", "/p/missing"]);

        let mut out = Vec::new();
        let result = StatusBatch::new(probe)
            .with_concurrency(4)
            .verbose(true)
            .run(&files, &mut out)
            .await
            .unwrap();

        assert_eq!(result.total, 6);
        assert_eq!(result.cached, 3);
        assert_eq!(result.tape_only, 2);
        assert_eq!(result.errors, 1);
        assert_eq!(result.pending, Some(2));
        assert_le!(result.pending.unwrap(), result.total);
        assert_eq!(result.cached_list, locations(&["/p/1", "/p/3", "/p/5"]));
        assert!(!result.cancelled);

        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            "Checking 6 files:\n\
             /p/1 ONLINE_AND_NEARLINE\n\
             /p/2 NEARLINE pending\n\
             /p/3 ONLINE pending\n\
             /p/4 NEARLINE\n\
             /p/5 ONLINE\n\
             /p/missing UNKNOWN (File not found: /p/missing)\n"
        );
    }

    #[tokio::test]
    async fn test_probe_without_pending() {
        let probe = Arc::new(TableProbe {
            observes_pending: false,
            ..Arc::into_inner(TableProbe::new(&[("/p/1", Locality::OnlineAndNearline, None)])).unwrap()
        });

        let mut out = Vec::new();
        let result = StatusBatch::new(probe)
            .verbose(true)
            .run(&locations(&["/p/1"]), &mut out)
            .await
            .unwrap();

        assert_eq!(result.pending, None);
        assert_eq!(String::from_utf8(out).unwrap(), "/p/1 ONLINE\n");
    }

    #[tokio::test]
    async fn test_progress_only_when_not_verbose() {
        let entries: Vec<_> = (0..60).map(|i| format!("/p/{i}")).collect();
        let table: Vec<_> = entries.iter().map(|p| (p.as_str(), Locality::Nearline, None)).collect();
        let files = locations(&entries.iter().map(String::as_str).collect::<Vec<_>>());

        let mut out = Vec::new();
        StatusBatch::new(TableProbe::new(&table))
            .with_announce_threshold(50)
            .run(&files, &mut out)
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("Checking 60 files:\n 0% "));
        assert!(out.ends_with(" 100% "));
        assert_eq!(out.matches('%').count(), 11);

        let mut out = Vec::new();
        StatusBatch::new(TableProbe::new(&table))
            .with_announce_threshold(50)
            .verbose(true)
            .run(&files, &mut out)
            .await
            .unwrap();
        assert!(!String::from_utf8(out).unwrap().contains('%'));
    }

    #[tokio::test]
    async fn test_single_file_never_announces() {
        let probe = TableProbe::new(&[("/p/1", Locality::Online, None)]);
        for verbose in [false, true] {
            let mut out = Vec::new();
            StatusBatch::new(probe.clone())
                .with_announce_threshold(0)
                .verbose(verbose)
                .run(&locations(&["/p/1"]), &mut out)
                .await
                .unwrap();
            let out = String::from_utf8(out).unwrap();
            assert!(!out.contains('%'));
            assert!(!out.contains("Checking"));
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch_keeps_finished_files() {
        let probe = ScriptedProbe::new(&[
            ("/p/1", Some(Locality::Online)),
            ("/p/2", Some(Locality::Nearline)),
            ("/p/4", Some(Locality::Online)),
        ]);
        let token = CancellationToken::new();
        let batch = StatusBatch::new(probe).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        // /p/3 never answers, so /p/4 is held back behind it.
        let mut out = Vec::new();
        let result = batch
            .run(&locations(&["/p/1", "/p/2", "/p/3", "/p/4"]), &mut out)
            .await
            .unwrap();
        canceller.await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.total, 2);
        assert_eq!(result.cached, 1);
        assert_eq!(result.tape_only, 1);
        assert_eq!(result.errors, 0);
        assert_eq!(result.cached_list, locations(&["/p/1"]));
        let finished: Vec<_> = result.records.iter().map(|r| r.location.as_str()).collect();
        assert_eq!(finished, ["/p/1", "/p/2"]);
    }

    #[tokio::test]
    async fn test_nothing_finishes_before_cancel() {
        let token = CancellationToken::new();
        let batch = StatusBatch::new(Arc::new(NeverAnswers)).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let mut out = Vec::new();
        let result = batch.run(&locations(&["/p/1", "/p/2"]), &mut out).await.unwrap();
        canceller.await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.total, 0);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn test_unrecognised_locality_is_an_error() {
        let probe = ScriptedProbe::new(&[("/p/lost", Some(Locality::Unknown)), ("/p/disk", Some(Locality::Online))]);

        let mut out = Vec::new();
        let result = StatusBatch::new(probe)
            .verbose(true)
            .run(&locations(&["/p/lost", "/p/disk"]), &mut out)
            .await
            .unwrap();

        assert_eq!(result.cached, 1);
        assert_eq!(result.tape_only, 0);
        assert_eq!(result.errors, 1);
        assert_eq!(result.cached_list, locations(&["/p/disk"]));
        assert_eq!(String::from_utf8(out).unwrap(), "Checking 2 files:\n/p/lost UNKNOWN\n/p/disk ONLINE\n");
    }

    fn locality_strategy() -> impl Strategy<Value = Option<Locality>> {
        prop_oneof![
            Just(Some(Locality::Online)),
            Just(Some(Locality::Nearline)),
            Just(Some(Locality::OnlineAndNearline)),
            Just(Some(Locality::Unknown)),
            Just(None),
        ]
    }

    proptest! {
        #[test]
        fn prop_status_counts_partition_the_batch(
            answers in proptest::collection::vec((locality_strategy(), any::<bool>()), 0..40),
            concurrency in 1usize..8,
        ) {
            let paths: Vec<String> = (0..answers.len()).map(|i| format!("/p/{i}")).collect();
            let probe = Arc::new(ScriptedProbe {
                answers: paths
                    .iter()
                    .zip(&answers)
                    .map(|(p, (l, pending))| {
                        let state = l.map(|l| ResidencyState::new(l, pending.then(|| "disk+tape".to_owned())));
                        (p.clone(), state)
                    })
                    .collect(),
            });
            let files = locations(&paths.iter().map(String::as_str).collect::<Vec<_>>());

            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let result = runtime
                .block_on(StatusBatch::new(probe).with_concurrency(concurrency).run(&files, &mut Vec::<u8>::new()))
                .unwrap();

            prop_assert_eq!(result.total, files.len());
            prop_assert_eq!(result.cached + result.tape_only + result.errors, result.total);
            prop_assert!(result.pending.unwrap() <= result.total);
            prop_assert_eq!(result.cached_list.len(), result.cached);
            let order: Vec<_> = result.records.iter().map(|r| r.location.clone()).collect();
            prop_assert_eq!(order, files);
        }
    }

    #[tokio::test]
    async fn test_prestage_batch() {
        let files = locations(&["/p/0", "/p/1", "/p/2", "/p/3"]);

        let mut out = Vec::new();
        let summary = PrestageBatch::new(Arc::new(AcceptEveryThird))
            .verbose(true)
            .run(&files, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.requested, 4);
        assert_eq!(summary.succeeded, 2);
        assert!(!summary.all_succeeded());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Prestaging 4 files:\n\
             /p/0 request succeeded\n\
             /p/1 request failed\n\
             /p/2 request failed\n\
             /p/3 request succeeded\n"
        );
    }

    #[tokio::test]
    async fn test_prestage_batch_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();

        let mut out = Vec::new();
        let summary = PrestageBatch::new(Arc::new(NeverAnswers))
            .with_cancellation(token)
            .run(&locations(&["/p/1"]), &mut out)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.requested, 0);
    }
}
