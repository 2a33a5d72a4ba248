use std::io::{self, Write};

/// Coarse progress for long batches: one ` N% ` announcement per tenth of the batch.
///
/// The decile of `n` out of `total` is `n * 10 / total`, so the last decile is only reached at
/// `n == total` and 100% is announced exactly once, whatever the batch size. Batches smaller
/// than the announce threshold, and single-file batches, announce nothing.
pub struct ProgressReporter {
    total: usize,
    announce: bool,
    last_decile: Option<usize>,
}

impl ProgressReporter {
    pub fn new(total: usize, announce_threshold: usize) -> Self {
        Self {
            total,
            announce: total > 1 && total >= announce_threshold,
            last_decile: None,
        }
    }

    /// A reporter that never announces, e.g. when per-file lines are printed instead.
    pub fn silent(total: usize) -> Self {
        Self {
            total,
            announce: false,
            last_decile: None,
        }
    }

    /// Records that `n` files are done. Returns the percentage if it was announced.
    pub fn update<W: Write>(&mut self, n: usize, out: &mut W) -> io::Result<Option<usize>> {
        if !self.announce {
            return Ok(None);
        }

        let n = n.min(self.total);
        let decile = n * 10 / self.total;
        if self.last_decile.is_some_and(|last| decile <= last) {
            return Ok(None);
        }
        self.last_decile = Some(decile);

        let percent = n * 100 / self.total;
        write!(out, " {percent}% ")?;
        out.flush()?;
        Ok(Some(percent))
    }
}
