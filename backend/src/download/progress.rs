//! Percentage tracking for a single transfer

/// Converts transferred bytes into a 0-100 percentage and only lets
/// strictly increasing values through. One tracker per task.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    transferred: u64,
    last_emitted: u8,
}

impl ProgressTracker {
    /// `total` must be positive; unknown lengths never reach a tracker
    pub fn new(total: u64) -> Self {
        debug_assert!(total > 0);
        Self {
            total,
            transferred: 0,
            last_emitted: 0,
        }
    }

    /// `floor(bytes * 100 / total)`, clamped to 100
    pub fn percent_of(bytes: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        let percent = (bytes as u128 * 100) / total as u128;
        percent.min(100) as u8
    }

    pub fn should_emit(&mut self, percent: u8) -> bool {
        if percent > self.last_emitted {
            self.last_emitted = percent;
            true
        } else {
            false
        }
    }

    /// Record `len` more bytes and return the percentage if it should be emitted
    pub fn advance(&mut self, len: usize) -> Option<u8> {
        self.transferred += len as u64;
        let percent = Self::percent_of(self.transferred, self.total);
        self.should_emit(percent).then_some(percent)
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }
}
