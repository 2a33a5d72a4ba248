pub mod batch;
pub mod catalog;
pub mod errors;
mod logging;
mod probe;
pub mod progress;
pub mod report;

pub use batch::{BatchResult, FileStatus, PrestageBatch, PrestageSummary, StatusBatch};
pub use catalog::{DatasetQuery, FileCatalog, NoCatalog, ResolvedInputs, SnapshotSelector, StaticCatalog};
pub use errors::CacheStatusError;
pub use logging::init_logging;
pub use probe::{QueryMethod, create_residency_probe};
pub use progress::ProgressReporter;
pub use report::StatusSummary;
