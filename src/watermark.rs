/// Incremental-sync boundary for one run.
///
/// Listings arrive newest first. Items are admitted while they are newer
/// than the stored watermark; the first item at or below it marks the
/// boundary, and everything after that point in listing order counts as
/// already processed. The first admitted timestamp is the newest one seen,
/// so it becomes the next watermark without a second pass.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    current: i64,
    candidate: Option<i64>,
    boundary_reached: bool,
}

impl WatermarkTracker {
    pub fn new(current: i64) -> Self {
        Self {
            current,
            candidate: None,
            boundary_reached: false,
        }
    }

    /// Watermark the run started from.
    pub fn current(&self) -> i64 {
        self.current
    }

    /// Decide whether an item with timestamp `ts` should be processed.
    pub fn admit(&mut self, ts: i64) -> bool {
        if self.boundary_reached {
            return false;
        }
        if ts <= self.current {
            self.boundary_reached = true;
            return false;
        }
        if self.candidate.is_none() {
            self.candidate = Some(ts);
        }
        true
    }

    /// The watermark to persist after a successful run, if anything qualified.
    ///
    /// Always strictly greater than [`current`](Self::current) when `Some`.
    pub fn candidate(&self) -> Option<i64> {
        self.candidate
    }
}
