//! Counter deciding when an interval-gated action fires.

/// Interval value meaning "never fire".
pub const NEVER: i64 = -1;

/// Fires on every `interval`-th call.
///
/// Not synchronized; callers sharing one gate across workers must restrict
/// its use to the master worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalGate {
    interval: i64,
    count: u64,
}

impl IntervalGate {
    pub fn new(interval: i64) -> Self {
        Self { interval, count: 0 }
    }

    pub fn never() -> Self {
        Self::new(NEVER)
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Count one call; true when the count is a positive multiple of the
    /// interval. Non-positive intervals never fire.
    pub fn should_fire(&mut self) -> bool {
        if self.interval == NEVER {
            return false;
        }
        self.count += 1;
        self.interval > 0 && self.count % self.interval as u64 == 0
    }
}
