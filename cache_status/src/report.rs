use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use stage_client::StorageLocation;
use tracing::info;

use crate::batch::{BatchResult, PrestageSummary};

pub const EXIT_OK: u8 = 0;
pub const EXIT_INCOMPLETE: u8 = 1;
/// The file list itself could not be obtained.
pub const EXIT_FATAL: u8 = 2;

/// Final tallies of a status run, including inputs that never reached the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    /// Cached files, local files outside the managed mount included.
    pub cached: usize,
    pub tape_only: usize,
    pub pending: Option<usize>,
    pub errors: usize,
    pub unresolved: usize,
}

impl StatusSummary {
    pub fn new(result: &BatchResult, local_files: usize, unresolved: usize) -> Self {
        Self {
            cached: result.cached + local_files,
            tape_only: result.tape_only,
            pending: result.pending,
            errors: result.errors,
            unresolved,
        }
    }

    /// Files whose residency is known; the denominator of every percentage.
    pub fn known(&self) -> usize {
        self.cached + self.tape_only
    }

    pub fn total(&self) -> usize {
        self.known() + self.errors
    }

    /// Writes the closing summary: one line of counts for several files, a single verdict
    /// for one file, nothing for none.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self.total() {
            0 => Ok(()),
            1 => {
                let verdict = if self.cached > 0 {
                    "CACHED"
                } else if self.tape_only > 0 {
                    "NOT CACHED"
                } else {
                    "UNKNOWN"
                };
                let pending = if self.pending.is_some_and(|p| p > 0) { " PENDING" } else { "" };
                writeln!(out, "{verdict}{pending}")
            },
            _ => {
                let known = self.known();
                write!(out, "\nCached: {}{}", self.cached, percent(self.cached, known))?;
                write!(out, "\tTape only: {}{}", self.tape_only, percent(self.tape_only, known))?;
                if let Some(pending) = self.pending {
                    write!(out, "\tPending: {pending}{}", percent(pending, known))?;
                }
                writeln!(out, "\tErrors: {}", self.errors)
            },
        }
    }

    /// Success only when every requested file is on disk.
    pub fn exit_code(&self) -> u8 {
        if self.tape_only == 0 && self.errors == 0 && self.unresolved == 0 {
            EXIT_OK
        } else {
            EXIT_INCOMPLETE
        }
    }
}

fn percent(count: usize, of: usize) -> String {
    if of == 0 {
        return String::new();
    }
    format!(" ({}%)", (count as f64 * 100.0 / of as f64).round() as u64)
}

pub fn prestage_exit_code(summary: &PrestageSummary, unresolved: usize) -> u8 {
    if summary.all_succeeded() && !summary.cancelled && unresolved == 0 {
        EXIT_OK
    } else {
        EXIT_INCOMPLETE
    }
}

/// Marks the output of a batch that was cancelled before every file finished. The counts
/// written after it cover only the `finished` files.
pub fn write_interrupted<W: Write>(out: &mut W, finished: usize, total: usize) -> io::Result<()> {
    writeln!(out, "\nInterrupted after {finished} of {total} files.")
}

/// Overwrites `path` with the cached locations, one per line.
pub fn write_cache_list(path: &Path, cached: &[StorageLocation]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for location in cached {
        writeln!(writer, "{location}")?;
    }
    writer.flush()?;
    info!(path = %path.display(), count = cached.len(), "Wrote cache list");
    Ok(())
}
